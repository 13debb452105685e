//! Publish worker, resync timer, and the handle producers submit through.

use std::sync::Arc;
use std::time::Duration;

use routesync_table::{MessagesToEmit, RegistryMessage, RoutingTable, Subject};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::queue::{BackpressurePolicy, Batch, BatchOrigin, BatchQueue, PushOutcome};
use super::stats::{PipelineStats, PipelineStatsSnapshot};
use super::PipelineError;
use crate::publisher::{PublishError, Publisher};

/// Emission pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between full resyncs. The first resync runs at startup.
    pub resync_interval: Duration,

    /// Maximum number of queued batches.
    pub queue_capacity: usize,

    pub backpressure: BackpressurePolicy,

    pub retry: RetryPolicy,

    /// Minimum spacing between two publishes, across batches.
    pub pacing: Option<Duration>,

    /// Time the in-flight batch gets to finish on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(20),
            queue_capacity: 256,
            backpressure: BackpressurePolicy::Coalesce,
            retry: RetryPolicy::default(),
            pacing: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Cloneable producer side of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    queue: Arc<BatchQueue>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Queue a batch produced by a table mutation.
    ///
    /// Empty batches are dropped without touching the queue.
    pub async fn submit(&self, messages: MessagesToEmit) -> Result<PushOutcome, PipelineError> {
        self.submit_from(BatchOrigin::Event, messages).await
    }

    async fn submit_from(
        &self,
        origin: BatchOrigin,
        messages: MessagesToEmit,
    ) -> Result<PushOutcome, PipelineError> {
        if messages.is_empty() {
            return Ok(PushOutcome::Skipped);
        }

        let message_count = messages.message_count();
        let outcome = self.queue.push(origin, messages).await?;
        self.stats.record_submitted();

        if let PushOutcome::Coalesced { merged } = outcome {
            self.stats.record_coalesced(merged as u64);
            debug!(merged, ?origin, "queue full; batches coalesced");
        } else {
            debug!(message_count, ?origin, "batch queued");
        }

        Ok(outcome)
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn queued_batches(&self) -> usize {
        self.queue.len().await
    }
}

/// Running pipeline: one resync task and one publish worker.
pub struct EmissionPipeline {
    handle: PipelineHandle,
    shutdown_tx: watch::Sender<bool>,
    resync: JoinHandle<()>,
    worker: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl EmissionPipeline {
    /// Start the resync task and publish worker on the current runtime.
    pub fn spawn(
        table: Arc<RoutingTable>,
        publisher: Arc<dyn Publisher>,
        config: PipelineConfig,
    ) -> Self {
        let queue = Arc::new(BatchQueue::new(config.queue_capacity, config.backpressure));
        let stats = Arc::new(PipelineStats::new());
        let handle = PipelineHandle {
            queue: Arc::clone(&queue),
            stats: Arc::clone(&stats),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            resync_interval_secs = config.resync_interval.as_secs_f64(),
            queue_capacity = config.queue_capacity,
            backpressure = %config.backpressure,
            max_attempts = config.retry.max_attempts,
            "starting emission pipeline"
        );

        let resync = tokio::spawn(run_resync_loop(
            table,
            handle.clone(),
            config.resync_interval,
            shutdown_rx.clone(),
        ));

        let worker = PublishWorker {
            queue,
            publisher,
            stats,
            retry: config.retry,
            pacing: config.pacing,
            last_publish: None,
            shutdown: shutdown_rx,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            handle,
            shutdown_tx,
            resync,
            worker,
            shutdown_grace: config.shutdown_grace,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop the pipeline.
    ///
    /// The resync timer stops first, then the queue closes and drops whatever
    /// is still queued. The batch being published gets the grace period to
    /// finish before the worker is aborted.
    pub async fn shutdown(self) -> PipelineStatsSnapshot {
        let Self {
            handle,
            shutdown_tx,
            resync,
            mut worker,
            shutdown_grace,
        } = self;

        let _ = shutdown_tx.send(true);

        let discarded = handle.queue.close().await;
        handle.stats.record_discarded(discarded as u64);

        if let Err(e) = resync.await {
            if !e.is_cancelled() {
                error!(error = %e, "resync task panicked");
            }
        }

        match tokio::time::timeout(shutdown_grace, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "publish worker panicked"),
            Err(_) => {
                warn!(
                    grace_ms = shutdown_grace.as_millis() as u64,
                    "in-flight batch did not finish; aborting publish worker"
                );
                worker.abort();
                let _ = worker.await;
            }
        }

        let stats = handle.stats.snapshot();
        info!(
            discarded_batches = discarded,
            batches_published = stats.batches_published,
            messages_published = stats.messages_published,
            messages_failed = stats.messages_failed,
            "emission pipeline stopped"
        );
        stats
    }
}

/// Re-announce the whole table every interval. The first tick fires
/// immediately and serves as the startup sync.
async fn run_resync_loop(
    table: Arc<RoutingTable>,
    handle: PipelineHandle,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        }

        // Queue under the table lock: a change applied after this snapshot
        // must land behind it.
        let guard = table.lock().await;
        let snapshot = guard.snapshot();
        let messages = snapshot.registrations();
        handle.stats.record_resync();
        debug!(
            routes = snapshot.len(),
            endpoints = snapshot.endpoint_count(),
            messages = messages.message_count(),
            "resync pass"
        );

        let submitted = handle.submit_from(BatchOrigin::Resync, messages).await;
        drop(guard);
        if let Err(PipelineError::ShuttingDown) = submitted {
            break;
        }
    }

    debug!("resync loop stopped");
}

struct PublishWorker {
    queue: Arc<BatchQueue>,
    publisher: Arc<dyn Publisher>,
    stats: Arc<PipelineStats>,
    retry: RetryPolicy,
    pacing: Option<Duration>,
    last_publish: Option<Instant>,
    shutdown: watch::Receiver<bool>,
}

impl PublishWorker {
    async fn run(mut self) {
        while let Some(batch) = self.queue.pop().await {
            self.publish_batch(batch).await;
        }
        debug!("publish worker stopped");
    }

    /// Publish every message of `batch` in subject order.
    async fn publish_batch(&mut self, batch: Batch) {
        let Batch {
            seq,
            origin,
            messages,
        } = batch;
        let mut failed = 0usize;

        for (subject, message) in messages.iter() {
            self.pace().await;
            let result = self.publish_with_retry(subject, message).await;
            self.last_publish = Some(Instant::now());

            match result {
                Ok(()) => self.stats.record_message_published(),
                Err(e) => {
                    failed += 1;
                    self.stats.record_message_failed();
                    warn!(
                        seq,
                        ?origin,
                        subject = %subject,
                        uris = ?message.uris,
                        error = %e,
                        "dropping message; next resync will heal"
                    );
                }
            }
        }

        self.stats.record_batch_published();
        debug!(
            seq,
            ?origin,
            messages = messages.message_count(),
            failed,
            "batch published"
        );
    }

    /// Wait until `pacing` has passed since the previous publish.
    async fn pace(&self) {
        if let (Some(pacing), Some(last)) = (self.pacing, self.last_publish) {
            tokio::time::sleep_until(last + pacing).await;
        }
    }

    async fn publish_with_retry(
        &mut self,
        subject: Subject,
        message: &RegistryMessage,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| PublishError::permanent(subject, format!("encode: {e}")))?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match self.publisher.publish(subject, &body).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !err.is_transient() || !self.retry.should_retry(attempts) {
                return Err(err);
            }

            let delay = self.retry.backoff.delay(attempts - 1);
            self.stats.record_retry();
            debug!(
                subject = %subject,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "publish failed; retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.wait_for(|stopped| *stopped) => return Err(err),
            }
        }
    }
}
