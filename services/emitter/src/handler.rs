//! Applies decoded routing events to the table and hands the resulting
//! batches to the emission pipeline.

use std::sync::Arc;

use routesync_events::{DesiredRoute, RoutingEvent};
use routesync_model::{Endpoint, ModelError, RoutingEntry, RoutingKey};
use routesync_table::{MessagesToEmit, RouteMap, RoutingTable, TableChange};
use thiserror::Error;
use tracing::{debug, info};

use crate::emission::{PipelineError, PipelineHandle};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] ModelError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// What an event did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    pub changed: bool,
    pub messages: MessagesToEmit,
}

impl From<TableChange> for HandleOutcome {
    fn from(change: TableChange) -> Self {
        Self {
            changed: change.changed,
            messages: change.messages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteHandler {
    table: Arc<RoutingTable>,
    pipeline: PipelineHandle,
}

impl RouteHandler {
    pub fn new(table: Arc<RoutingTable>, pipeline: PipelineHandle) -> Self {
        Self { table, pipeline }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Apply one event and queue its messages.
    ///
    /// The batch is queued before the table lock is released, so batches
    /// reach the queue in the order their changes hit the table and a resync
    /// pass can never be queued behind a change it predates. The table is
    /// updated even when the pipeline is already shutting down.
    pub async fn handle(&self, event: RoutingEvent) -> Result<HandleOutcome, HandlerError> {
        match &event {
            RoutingEvent::EndpointAdded(payload) => validate(&payload.key, &payload.endpoint)?,
            RoutingEvent::EndpointRemoved(payload) => {
                payload.key.validate()?;
                if payload.endpoint.instance_id.trim().is_empty() {
                    return Err(ModelError::EmptyInstanceId.into());
                }
            }
            RoutingEvent::DesiredStateSync(_) => {}
        }

        let mut table = self.table.lock().await;
        let change = match event {
            RoutingEvent::EndpointAdded(payload) => {
                let key = payload.key.clone();
                let instance_id = payload.endpoint.instance_id.clone();
                let change = table.add_endpoint(payload.key, payload.endpoint);
                debug!(key = %key, instance_id = %instance_id, changed = change.changed, "endpoint added");
                change
            }
            RoutingEvent::EndpointRemoved(payload) => {
                let change = table.remove_endpoint(&payload.key, &payload.endpoint);
                debug!(
                    key = %payload.key,
                    instance_id = %payload.endpoint.instance_id,
                    changed = change.changed,
                    "endpoint removed"
                );
                change
            }
            RoutingEvent::DesiredStateSync(payload) => {
                let route_count = payload.routes.len();
                let desired = desired_table(payload.routes)?;
                let change = table.sync(desired);
                info!(
                    routes = route_count,
                    changed = change.changed,
                    messages = change.messages.message_count(),
                    "desired state applied"
                );
                change
            }
        };

        if !change.messages.is_empty() {
            self.pipeline.submit(change.messages.clone()).await?;
        }
        drop(table);

        Ok(change.into())
    }
}

fn validate(key: &RoutingKey, endpoint: &Endpoint) -> Result<(), ModelError> {
    key.validate()?;
    endpoint.validate()
}

/// Build the desired table, merging routes listed more than once.
///
/// Endpoints merge by instance identity with the usual freshness rule; tags
/// merge with later routes winning.
fn desired_table(routes: Vec<DesiredRoute>) -> Result<RouteMap, ModelError> {
    let mut desired = RouteMap::new();

    for DesiredRoute { key, entry } in routes {
        key.validate()?;
        for endpoint in entry.endpoints() {
            endpoint.validate()?;
        }

        match desired.get_mut(&key) {
            None => {
                desired.insert(key, entry);
            }
            Some(existing) => {
                merge_entry(existing, entry);
            }
        }
    }

    Ok(desired)
}

fn merge_entry(existing: &mut RoutingEntry, incoming: RoutingEntry) {
    existing.tags.extend(incoming.tags.clone());
    for endpoint in incoming.endpoints() {
        existing.upsert(endpoint.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emission::{EmissionPipeline, PipelineConfig};
    use crate::publisher::LogPublisher;
    use routesync_model::FreshnessTag;
    use std::time::Duration;

    fn pipeline(table: &Arc<RoutingTable>) -> EmissionPipeline {
        let config = PipelineConfig {
            resync_interval: Duration::from_secs(3600),
            ..PipelineConfig::default()
        };
        EmissionPipeline::spawn(Arc::clone(table), Arc::new(LogPublisher), config)
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let table = Arc::new(RoutingTable::new());
        let pipeline = pipeline(&table);
        let handler = RouteHandler::new(Arc::clone(&table), pipeline.handle());
        let key = RoutingKey::external("app.test");

        let added = handler
            .handle(RoutingEvent::endpoint_added(
                key.clone(),
                Endpoint::new("a", "10.0.0.1", 8080),
            ))
            .await
            .unwrap();
        assert!(added.changed);
        assert_eq!(added.messages.registration_messages.len(), 1);

        let removed = handler
            .handle(RoutingEvent::endpoint_removed(
                key.clone(),
                Endpoint::new("a", "10.0.0.1", 8080),
            ))
            .await
            .unwrap();
        assert_eq!(removed.messages.unregistration_messages.len(), 1);
        assert!(table.is_empty().await);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_endpoint_rejected() {
        let table = Arc::new(RoutingTable::new());
        let pipeline = pipeline(&table);
        let handler = RouteHandler::new(Arc::clone(&table), pipeline.handle());

        let err = handler
            .handle(RoutingEvent::endpoint_added(
                RoutingKey::external("app.test"),
                Endpoint::new("a", "10.0.0.1", 0),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidEvent(ModelError::ZeroPort { .. })));
        assert!(table.is_empty().await);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_desired_state_merges_duplicate_keys() {
        let table = Arc::new(RoutingTable::new());
        let pipeline = pipeline(&table);
        let handler = RouteHandler::new(Arc::clone(&table), pipeline.handle());
        let key = RoutingKey::external("app.test");

        let routes = vec![
            DesiredRoute {
                key: key.clone(),
                entry: RoutingEntry::from_endpoints([Endpoint::new("a", "10.0.0.1", 80)
                    .with_freshness(FreshnessTag::new("e", 2))]),
            },
            DesiredRoute {
                key: key.clone(),
                entry: RoutingEntry::from_endpoints([
                    Endpoint::new("a", "10.0.0.9", 80).with_freshness(FreshnessTag::new("e", 1)),
                    Endpoint::new("b", "10.0.0.2", 80),
                ])
                .with_tag("component", "web"),
            },
        ];

        let outcome = handler
            .handle(RoutingEvent::desired_state_sync(routes))
            .await
            .unwrap();
        assert!(outcome.changed);

        let entry = table.get(&key).await.unwrap();
        assert_eq!(entry.len(), 2);
        // Stale duplicate lost to the fresher endpoint.
        assert_eq!(entry.get("a").unwrap().host, "10.0.0.1");
        assert_eq!(entry.tags["component"], "web");

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_table_updated_after_shutdown() {
        let table = Arc::new(RoutingTable::new());
        let pipeline = pipeline(&table);
        let handler = RouteHandler::new(Arc::clone(&table), pipeline.handle());
        pipeline.shutdown().await;

        let err = handler
            .handle(RoutingEvent::endpoint_added(
                RoutingKey::internal("svc"),
                Endpoint::new("a", "10.0.0.1", 8080),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Pipeline(PipelineError::ShuttingDown)));
        assert_eq!(table.len().await, 1);
    }
}
