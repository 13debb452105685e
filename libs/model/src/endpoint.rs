//! Backend endpoints and their freshness tags.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Orders updates to the same backend instance.
///
/// An epoch identifies one incarnation of the record that produced the
/// endpoint; the index increases with every modification inside an epoch.
/// Indexes from different epochs are not comparable, so a new epoch always
/// supersedes the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreshnessTag {
    #[serde(default)]
    pub epoch: String,
    #[serde(default)]
    pub index: u32,
}

impl FreshnessTag {
    pub fn new(epoch: impl Into<String>, index: u32) -> Self {
        Self {
            epoch: epoch.into(),
            index,
        }
    }

    /// Returns true if `other` is strictly older than this tag.
    ///
    /// Only tags from the same non-empty epoch can be older.
    pub fn is_newer_than(&self, other: &FreshnessTag) -> bool {
        !self.epoch.is_empty() && self.epoch == other.epoch && self.index > other.index
    }
}

/// One backend instance bound to a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Opaque identity of the backend instance.
    pub instance_id: String,
    /// Backend address (IP or resolvable host).
    pub host: String,
    pub port: u16,
    /// Backend terminates TLS itself.
    #[serde(default)]
    pub tls: bool,
    /// Never announced to the external router tier.
    #[serde(default)]
    pub internal_only: bool,
    #[serde(default)]
    pub freshness: FreshnessTag,
}

impl Endpoint {
    pub fn new(instance_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: instance_id.into(),
            host: host.into(),
            port,
            tls: false,
            internal_only: false,
            freshness: FreshnessTag::default(),
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessTag) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_internal_only(mut self, internal_only: bool) -> Self {
        self.internal_only = internal_only;
        self
    }

    /// `host:port` as announced to the router.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Same backend entry: address, port, and instance identity all match.
    ///
    /// Freshness is deliberately ignored; a newer tag on the same entry is an update.
    pub fn same_entry(&self, other: &Endpoint) -> bool {
        self.instance_id == other.instance_id && self.host == other.host && self.port == other.port
    }

    /// Returns true if any field the router sees (address, port, TLS) differ.
    pub fn published_fields_differ(&self, other: &Endpoint) -> bool {
        self.host != other.host || self.port != other.port || self.tls != other.tls
    }

    /// Reject endpoints the router could not use.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.instance_id.trim().is_empty() {
            return Err(ModelError::EmptyInstanceId);
        }
        if self.host.trim().is_empty() {
            return Err(ModelError::EmptyHost {
                instance_id: self.instance_id.clone(),
            });
        }
        if self.port == 0 {
            return Err(ModelError::ZeroPort {
                instance_id: self.instance_id.clone(),
            });
        }
        Ok(())
    }
}
