//! Emission pipeline.
//!
//! Turns [`MessagesToEmit`](routesync_table::MessagesToEmit) batches into
//! publishes on the bus.
//!
//! ## Architecture
//!
//! ```text
//! RouteHandler ──submit──┐
//!                        ├──> BatchQueue ──> publish worker ──> Publisher
//! resync timer ──────────┘     (bounded)      (retry/backoff)
//! ```
//!
//! Both batch sources share one queue and one worker, so publishes for a key
//! are never interleaved. The queue is bounded; when full it either blocks
//! the producer or coalesces queued batches into their net per-route effect,
//! per [`BackpressurePolicy`].
//!
//! The resync timer re-announces the whole table every interval so router
//! state with a TTL never expires on a healthy entry, and so any message
//! dropped after exhausting its retries is eventually healed.

mod backoff;
mod pipeline;
mod queue;
mod stats;

pub use backoff::{BackoffPolicy, RetryPolicy};
pub use pipeline::{EmissionPipeline, PipelineConfig, PipelineHandle};
pub use queue::{BackpressurePolicy, Batch, BatchOrigin, PushOutcome};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

use thiserror::Error;

/// Errors returned to batch producers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Shutdown has begun; no new batches are accepted.
    #[error("emission pipeline is shutting down")]
    ShuttingDown,
}
