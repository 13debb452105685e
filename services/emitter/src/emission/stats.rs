//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the pipeline tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    batches_submitted: AtomicU64,
    batches_coalesced: AtomicU64,
    batches_published: AtomicU64,
    batches_discarded: AtomicU64,
    messages_published: AtomicU64,
    messages_failed: AtomicU64,
    publish_retries: AtomicU64,
    resync_passes: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub batches_submitted: u64,
    pub batches_coalesced: u64,
    pub batches_published: u64,
    pub batches_discarded: u64,
    pub messages_published: u64,
    pub messages_failed: u64,
    pub publish_retries: u64,
    pub resync_passes: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self, batches: u64) {
        self.batches_coalesced.fetch_add(batches, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_published(&self) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, batches: u64) {
        self.batches_discarded.fetch_add(batches, Ordering::Relaxed);
    }

    pub(crate) fn record_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.publish_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resync(&self) {
        self.resync_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batches_coalesced: self.batches_coalesced.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            batches_discarded: self.batches_discarded.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            resync_passes: self.resync_passes.load(Ordering::Relaxed),
        }
    }
}
