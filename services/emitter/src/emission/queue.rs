//! Bounded batch queue between producers and the publish worker.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use routesync_table::MessagesToEmit;
use tokio::sync::{Mutex, Notify};

use super::PipelineError;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Wait for the worker to free a slot.
    Block,
    /// Fold every queued batch and the incoming one into a single batch
    /// carrying their net per-route effect.
    #[default]
    Coalesce,
}

impl FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "coalesce" => Ok(Self::Coalesce),
            other => Err(format!(
                "unknown backpressure policy '{other}' (expected 'block' or 'coalesce')"
            )),
        }
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Coalesce => write!(f, "coalesce"),
        }
    }
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    /// A table mutation.
    Event,
    /// A periodic full resync.
    Resync,
    /// Several queued batches folded together under backpressure.
    Coalesced,
}

/// A queued emission batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Monotonic sequence number, assigned on enqueue.
    pub seq: u64,
    pub origin: BatchOrigin,
    pub messages: MessagesToEmit,
}

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The batch took a free slot.
    Queued,
    /// The queue was full; `merged` queued batches were folded together
    /// with the incoming one.
    Coalesced { merged: usize },
    /// The batch carried no messages and was dropped.
    Skipped,
}

#[derive(Debug, Default)]
struct QueueState {
    batches: VecDeque<Batch>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn enqueue(&mut self, origin: BatchOrigin, messages: MessagesToEmit) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.batches.push_back(Batch {
            seq,
            origin,
            messages,
        });
    }
}

/// FIFO of batches with a fixed capacity.
///
/// Single consumer. Closing the queue discards whatever is still queued and
/// wakes every waiter.
#[derive(Debug)]
pub(crate) struct BatchQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: BackpressurePolicy,
    /// Signalled when a batch is queued or the queue closes.
    items: Notify,
    /// Signalled when a slot frees up or the queue closes.
    space: Notify,
}

impl BatchQueue {
    pub(crate) fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            policy,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    pub(crate) async fn push(
        &self,
        origin: BatchOrigin,
        messages: MessagesToEmit,
    ) -> Result<PushOutcome, PipelineError> {
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PipelineError::ShuttingDown);
                }

                if state.batches.len() < self.capacity {
                    state.enqueue(origin, messages);
                    drop(state);
                    self.items.notify_one();
                    return Ok(PushOutcome::Queued);
                }

                if self.policy == BackpressurePolicy::Coalesce {
                    let queued: Vec<MessagesToEmit> =
                        state.batches.drain(..).map(|b| b.messages).collect();
                    let merged = queued.len();
                    let net = MessagesToEmit::coalesce(
                        queued.into_iter().chain(std::iter::once(messages)),
                    );
                    if !net.is_empty() {
                        state.enqueue(BatchOrigin::Coalesced, net);
                    }
                    drop(state);
                    self.items.notify_one();
                    return Ok(PushOutcome::Coalesced { merged });
                }
            }

            space.await;
        }
    }

    /// Next batch, or `None` once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<Batch> {
        loop {
            let items = self.items.notified();
            tokio::pin!(items);
            items.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(batch) = state.batches.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return Some(batch);
                }
                if state.closed {
                    return None;
                }
            }

            items.await;
        }
    }

    /// Refuse further pushes and discard queued batches.
    ///
    /// Returns the number of batches discarded.
    pub(crate) async fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock().await;
            state.closed = true;
            let discarded = state.batches.len();
            state.batches.clear();
            discarded
        };
        self.items.notify_waiters();
        self.space.notify_waiters();
        discarded
    }

    pub(crate) async fn len(&self) -> usize {
        self.state.lock().await.batches.len()
    }
}
