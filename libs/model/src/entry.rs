//! Per-key routing entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Endpoint, Visibility};

/// The endpoint set and route-level metadata stored for one routing key.
///
/// Endpoints are indexed by instance identity, so two endpoints under the
/// same key can never share an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RoutingEntryRepr", into = "RoutingEntryRepr")]
pub struct RoutingEntry {
    endpoints: BTreeMap<String, Endpoint>,
    /// Route tags echoed in every registration message.
    pub tags: BTreeMap<String, String>,
}

impl RoutingEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an entry from a list that may contain several versions of one instance.
    ///
    /// When an identity repeats, the freshest version wins; on equal freshness
    /// the later element wins.
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let mut entry = Self::new();
        for endpoint in endpoints {
            entry.upsert(endpoint);
        }
        entry
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Insert or replace by instance identity unless the stored version is newer.
    ///
    /// Returns true if the entry changed.
    pub fn upsert(&mut self, endpoint: Endpoint) -> bool {
        match self.endpoints.get(&endpoint.instance_id) {
            Some(existing) if existing.freshness.is_newer_than(&endpoint.freshness) => false,
            Some(existing) if *existing == endpoint => false,
            _ => {
                self.endpoints.insert(endpoint.instance_id.clone(), endpoint);
                true
            }
        }
    }

    /// Remove by instance identity, returning the removed endpoint.
    pub fn remove(&mut self, instance_id: &str) -> Option<Endpoint> {
        self.endpoints.remove(instance_id)
    }

    pub fn get(&self, instance_id: &str) -> Option<&Endpoint> {
        self.endpoints.get(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.endpoints.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// All endpoints, ordered by instance identity.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Endpoints the router tier for `visibility` is told about.
    ///
    /// Internal-only endpoints are withheld from the external tier.
    pub fn announced(&self, visibility: Visibility) -> impl Iterator<Item = &Endpoint> {
        self.endpoints
            .values()
            .filter(move |e| visibility == Visibility::Internal || !e.internal_only)
    }
}

/// Wire form: endpoints travel as a plain list.
#[derive(Serialize, Deserialize)]
struct RoutingEntryRepr {
    endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
}

impl From<RoutingEntryRepr> for RoutingEntry {
    fn from(repr: RoutingEntryRepr) -> Self {
        RoutingEntry::from_endpoints(repr.endpoints).with_tags(repr.tags)
    }
}

impl From<RoutingEntry> for RoutingEntryRepr {
    fn from(entry: RoutingEntry) -> Self {
        Self {
            endpoints: entry.endpoints.into_values().collect(),
            tags: entry.tags,
        }
    }
}
