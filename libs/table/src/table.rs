//! The routing table.
//!
//! The table is the only shared mutable state of the emitter. All writes go
//! through [`RoutingTable::add_endpoint`], [`RoutingTable::remove_endpoint`],
//! [`RoutingTable::swap`] and [`RoutingTable::sync`]; each takes the table lock,
//! applies the change, and computes the diff for exactly that change before
//! releasing it. [`RoutingTable::lock`] hands out the lock itself, for callers
//! that must queue a change's messages before the next change can happen.
//!
//! Resync readers take an [`Arc<TableSnapshot>`] from [`RoutingTable::entries`].
//! The snapshot is cached until the next mutation, so repeated resyncs over
//! an idle table share one copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use routesync_model::{Endpoint, RoutingEntry, RoutingKey};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::diff::{diff_entry, diff_tables, registrations};
use crate::messages::MessagesToEmit;

/// Key → entry map. Entries are never empty.
pub type RouteMap = BTreeMap<RoutingKey, RoutingEntry>;

/// Result of a single table mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableChange {
    /// Whether the stored state changed.
    pub changed: bool,
    /// Messages describing the change (may be empty even when `changed`,
    /// e.g. for a freshness-only refresh).
    pub messages: MessagesToEmit,
}

impl TableChange {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// Result of [`RoutingTable::swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    /// The entry that was replaced, if the key existed.
    pub previous: Option<RoutingEntry>,
    pub changed: bool,
    pub messages: MessagesToEmit,
}

/// Immutable point-in-time copy of the table.
#[derive(Debug, Default)]
pub struct TableSnapshot {
    routes: RouteMap,
}

impl TableSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&RoutingKey, &RoutingEntry)> {
        self.routes.iter()
    }

    pub fn get(&self, key: &RoutingKey) -> Option<&RoutingEntry> {
        self.routes.get(key)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &RouteMap {
        &self.routes
    }

    /// Total endpoints across all keys.
    pub fn endpoint_count(&self) -> usize {
        self.routes.values().map(RoutingEntry::len).sum()
    }

    /// Full-resync batch: every announced endpoint registered.
    pub fn registrations(&self) -> MessagesToEmit {
        registrations(self.routes.iter())
    }
}

/// Routing table guarded by a single table-wide lock.
#[derive(Debug)]
pub struct RoutingTable {
    routes: Mutex<RouteMap>,
    /// Cached snapshot; cleared by every mutation.
    snapshot: ArcSwapOption<TableSnapshot>,
}

impl RoutingTable {
    /// Create a new empty routing table.
    pub fn new() -> Self {
        Self::from_routes(RouteMap::new())
    }

    /// Rebuild a table from a full snapshot supplied by the event source.
    ///
    /// Empty entries are dropped.
    pub fn from_routes(mut routes: RouteMap) -> Self {
        routes.retain(|_, entry| !entry.is_empty());
        Self {
            routes: Mutex::new(routes),
            snapshot: ArcSwapOption::empty(),
        }
    }

    /// Take the table lock.
    ///
    /// No other mutation or snapshot can happen while the guard is alive, so
    /// work done under it (queueing a change's messages, say) is ordered
    /// with the table's own history.
    pub async fn lock(&self) -> TableGuard<'_> {
        TableGuard {
            routes: self.routes.lock().await,
            snapshot: &self.snapshot,
        }
    }

    /// See [`TableGuard::add_endpoint`].
    pub async fn add_endpoint(&self, key: RoutingKey, endpoint: Endpoint) -> TableChange {
        self.lock().await.add_endpoint(key, endpoint)
    }

    /// See [`TableGuard::remove_endpoint`].
    pub async fn remove_endpoint(&self, key: &RoutingKey, endpoint: &Endpoint) -> TableChange {
        self.lock().await.remove_endpoint(key, endpoint)
    }

    /// See [`TableGuard::swap`].
    pub async fn swap(&self, key: RoutingKey, entry: RoutingEntry) -> SwapOutcome {
        self.lock().await.swap(key, entry)
    }

    /// See [`TableGuard::sync`].
    pub async fn sync(&self, desired: RouteMap) -> TableChange {
        self.lock().await.sync(desired)
    }

    /// Point-in-time snapshot for resync passes.
    pub async fn entries(&self) -> Arc<TableSnapshot> {
        self.lock().await.snapshot()
    }

    pub async fn get(&self, key: &RoutingKey) -> Option<RoutingEntry> {
        self.routes.lock().await.get(key).cloned()
    }

    /// Number of routing keys.
    pub async fn len(&self) -> usize {
        self.routes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.lock().await.is_empty()
    }
}

/// Held table lock. Dropping it releases the table.
pub struct TableGuard<'a> {
    routes: MutexGuard<'a, RouteMap>,
    snapshot: &'a ArcSwapOption<TableSnapshot>,
}

impl TableGuard<'_> {
    /// Insert or update an endpoint under `key`.
    ///
    /// An endpoint with the same instance identity is replaced only if the
    /// incoming freshness tag is not older; otherwise the call is a no-op.
    pub fn add_endpoint(&mut self, key: RoutingKey, endpoint: Endpoint) -> TableChange {
        let previous = self.routes.get(&key);
        let mut entry = previous.cloned().unwrap_or_default();
        let instance_id = endpoint.instance_id.clone();
        if !entry.upsert(endpoint) {
            debug!(key = %key, instance_id = %instance_id, "add ignored (stale or identical)");
            return TableChange::unchanged();
        }

        let messages = diff_entry(&key, previous, Some(&entry));
        self.routes.insert(key, entry);
        self.snapshot.store(None);

        TableChange {
            changed: true,
            messages,
        }
    }

    /// Remove the endpoint with the same instance identity from `key`.
    ///
    /// Removing an unknown endpoint is a no-op, as is a removal carrying a
    /// freshness tag older than the stored endpoint's. The key disappears
    /// with its last endpoint.
    pub fn remove_endpoint(&mut self, key: &RoutingKey, endpoint: &Endpoint) -> TableChange {
        let Some(previous) = self.routes.get(key) else {
            return TableChange::unchanged();
        };
        let Some(existing) = previous.get(&endpoint.instance_id) else {
            return TableChange::unchanged();
        };
        if existing.freshness.is_newer_than(&endpoint.freshness) {
            debug!(
                key = %key,
                instance_id = %endpoint.instance_id,
                "remove ignored (stale freshness tag)"
            );
            return TableChange::unchanged();
        }

        let mut entry = previous.clone();
        entry.remove(&endpoint.instance_id);

        let messages = if entry.is_empty() {
            let messages = diff_entry(key, Some(previous), None);
            self.routes.remove(key);
            messages
        } else {
            let messages = diff_entry(key, Some(previous), Some(&entry));
            self.routes.insert(key.clone(), entry);
            messages
        };
        self.snapshot.store(None);

        TableChange {
            changed: true,
            messages,
        }
    }

    /// Replace the whole entry for `key`, returning the prior entry.
    ///
    /// An empty replacement removes the key.
    pub fn swap(&mut self, key: RoutingKey, entry: RoutingEntry) -> SwapOutcome {
        let current = (!entry.is_empty()).then_some(entry);
        let messages = diff_entry(&key, self.routes.get(&key), current.as_ref());
        let changed = self.routes.get(&key) != current.as_ref();

        let previous = match current {
            Some(entry) => self.routes.insert(key, entry),
            None => self.routes.remove(&key),
        };
        if changed {
            self.snapshot.store(None);
        }

        SwapOutcome {
            previous,
            changed,
            messages,
        }
    }

    /// Replace the whole table with a desired-state snapshot.
    pub fn sync(&mut self, mut desired: RouteMap) -> TableChange {
        desired.retain(|_, entry| !entry.is_empty());
        if *self.routes == desired {
            return TableChange::unchanged();
        }

        let messages = diff_tables(&self.routes, &desired);
        *self.routes = desired;
        self.snapshot.store(None);

        TableChange {
            changed: true,
            messages,
        }
    }

    /// Snapshot of the table as of this guard, cached until the next mutation.
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        if let Some(snapshot) = self.snapshot.load_full() {
            return snapshot;
        }

        let snapshot = Arc::new(TableSnapshot {
            routes: (*self.routes).clone(),
        });
        self.snapshot.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// Number of routing keys.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
