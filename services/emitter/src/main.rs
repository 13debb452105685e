//! Route emitter
//!
//! This service:
//! - Tails routing events from the scheduler
//! - Maintains the in-memory routing table
//! - Publishes register/unregister messages to the router tier
//! - Re-announces the full table on a fixed interval

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use routesync_emitter::{
    sync, Config, EmissionPipeline, HttpPublisher, LogPublisher, Publisher, RouteHandler,
};
use routesync_table::RoutingTable;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ROUTESYNC_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting route emitter");
    info!(
        event_source_url = %config.event_source_url,
        bus_url = config.bus_url.as_deref().unwrap_or("<dry-run>"),
        resync_interval_secs = config.resync_interval.as_secs(),
        backpressure = %config.backpressure,
        "Configuration loaded"
    );

    let publisher: Arc<dyn Publisher> = match &config.bus_url {
        Some(url) => Arc::new(
            HttpPublisher::new(url, config.publish_timeout)
                .context("Failed to build bus publisher")?,
        ),
        None => {
            warn!("ROUTESYNC_BUS_URL not set; messages will only be logged");
            Arc::new(LogPublisher)
        }
    };

    let table = Arc::new(RoutingTable::new());
    let pipeline = EmissionPipeline::spawn(Arc::clone(&table), publisher, config.pipeline_config());
    let handler = RouteHandler::new(Arc::clone(&table), pipeline.handle());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_config = config.clone();
    let mut sync_task = tokio::spawn(async move {
        sync::run_event_sync_loop(&sync_config, handler, shutdown_rx).await
    });

    let sync_result = tokio::select! {
        res = &mut sync_task => Some(res),
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            None
        }
    };

    let _ = shutdown_tx.send(true);
    let sync_result = match sync_result {
        Some(res) => res,
        None => sync_task.await,
    };

    if config.once {
        // Let queued batches reach the bus before the queue is closed.
        let handle = pipeline.handle();
        let drained = tokio::time::timeout(config.shutdown_grace, async {
            while handle.queued_batches().await > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Queue not drained before shutdown");
        }
    }

    let stats = pipeline.shutdown().await;
    info!(
        messages_published = stats.messages_published,
        messages_failed = stats.messages_failed,
        resync_passes = stats.resync_passes,
        "Route emitter stopped"
    );

    match sync_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Event sync loop failed");
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("event sync task panicked: {e}")),
    }
}
