//! Scheduling event feed consumer.
//!
//! Tails the routing events published by the scheduler and applies them to
//! the routing table through the [`RouteHandler`]. The cursor lives in memory
//! only: after a restart the scheduler is expected to send a desired-state
//! sync, and the startup resync re-announces whatever the table holds.

use anyhow::Result;
use routesync_events::EventEnvelope;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::emission::PipelineError;
use crate::handler::{HandlerError, RouteHandler};

#[derive(Debug, Deserialize)]
pub(crate) struct EventsResponse {
    pub(crate) items: Vec<EventEnvelope>,
    pub(crate) next_after_event_id: i64,
}

pub(crate) async fn fetch_events(
    client: &reqwest::Client,
    base_url: &str,
    after_event_id: i64,
    limit: i64,
) -> Result<EventsResponse> {
    let base = base_url.trim_end_matches('/');
    let url = format!("{base}/v1/routing/events");

    let resp = client
        .get(url)
        .query(&[("after_event_id", after_event_id), ("limit", limit)])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "events query failed (status={}): {}",
            status,
            body
        ));
    }

    Ok(resp.json::<EventsResponse>().await?)
}

/// How applying a single feed item ended.
enum Applied {
    Continue,
    ShuttingDown,
}

async fn apply_envelope(handler: &RouteHandler, envelope: &EventEnvelope) -> Applied {
    if !envelope.is_routing() {
        return Applied::Continue;
    }

    let event = match envelope.decode() {
        Ok(event) => event,
        Err(e) => {
            warn!(
                event_id = envelope.event_id,
                event_type = %envelope.event_type,
                error = %e,
                "skipping undecodable routing event"
            );
            return Applied::Continue;
        }
    };

    match handler.handle(event).await {
        Ok(outcome) => {
            debug!(
                event_id = envelope.event_id,
                event_type = %envelope.event_type,
                changed = outcome.changed,
                messages = outcome.messages.message_count(),
                "event applied"
            );
            Applied::Continue
        }
        Err(HandlerError::InvalidEvent(e)) => {
            warn!(
                event_id = envelope.event_id,
                event_type = %envelope.event_type,
                error = %e,
                "rejected invalid routing event"
            );
            Applied::Continue
        }
        Err(HandlerError::Pipeline(PipelineError::ShuttingDown)) => Applied::ShuttingDown,
    }
}

/// Poll routing events and apply them until shutdown.
pub async fn run_event_sync_loop(
    config: &Config,
    handler: RouteHandler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("route-emitter/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mut cursor: i64 = 0;

    loop {
        if *shutdown.borrow() {
            info!(cursor, "event sync stopped");
            return Ok(());
        }

        let resp = tokio::select! {
            resp = fetch_events(&client, &config.event_source_url, cursor, config.fetch_limit) => resp,
            _ = shutdown.wait_for(|stopped| *stopped) => continue,
        };

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, cursor, "failed to fetch events; retrying");
                idle(config, &mut shutdown).await;
                continue;
            }
        };

        if resp.items.is_empty() {
            if config.once {
                let route_count = handler.table().len().await;
                info!(cursor, route_count, "sync complete");
                return Ok(());
            }

            idle(config, &mut shutdown).await;
            continue;
        }

        for envelope in &resp.items {
            cursor = envelope.event_id;
            if let Applied::ShuttingDown = apply_envelope(&handler, envelope).await {
                info!(cursor, "pipeline shutting down; event sync stopped");
                return Ok(());
            }
        }

        cursor = resp.next_after_event_id.max(cursor);
    }
}

async fn idle(config: &Config, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(config.poll_interval) => {}
        _ = shutdown.wait_for(|stopped| *stopped) => {}
    }
}
