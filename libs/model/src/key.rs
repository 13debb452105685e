//! Routing keys.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Which router tier a key is announced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Public-facing router tier.
    External,
    /// Cluster-private service discovery.
    Internal,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::External => write!(f, "external"),
            Visibility::Internal => write!(f, "internal"),
        }
    }
}

/// Identifies a logical route.
///
/// Names are normalized on construction and on deserialization
/// (lowercase, trailing dot trimmed, leading slash stripped from paths),
/// so structural equality is the routing equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RoutingKeyRepr", into = "RoutingKeyRepr")]
pub enum RoutingKey {
    /// A public hostname, optionally scoped to a path prefix.
    External {
        hostname: String,
        path: Option<String>,
    },
    /// A cluster-internal service identifier.
    Internal { service: String },
}

impl RoutingKey {
    /// Build an external key for a bare hostname.
    pub fn external(hostname: &str) -> Self {
        Self::External {
            hostname: normalize_name(hostname),
            path: None,
        }
    }

    /// Build an external key for a hostname/path pair.
    pub fn external_with_path(hostname: &str, path: &str) -> Self {
        Self::External {
            hostname: normalize_name(hostname),
            path: normalize_path(Some(path)),
        }
    }

    /// Build an internal key for a service name.
    pub fn internal(service: &str) -> Self {
        Self::Internal {
            service: normalize_name(service),
        }
    }

    /// The router tier this key belongs to.
    pub fn visibility(&self) -> Visibility {
        match self {
            Self::External { .. } => Visibility::External,
            Self::Internal { .. } => Visibility::Internal,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.visibility() == Visibility::Internal
    }

    /// The externally visible name announced to the router.
    ///
    /// `host` or `host/path` for external keys, the service name for internal ones.
    pub fn uri(&self) -> String {
        match self {
            Self::External {
                hostname,
                path: Some(path),
            } => format!("{hostname}/{path}"),
            Self::External {
                hostname,
                path: None,
            } => hostname.clone(),
            Self::Internal { service } => service.clone(),
        }
    }

    /// Reject keys whose name normalized to nothing.
    pub fn validate(&self) -> Result<(), ModelError> {
        let name = match self {
            Self::External { hostname, .. } => hostname,
            Self::Internal { service } => service,
        };
        if name.is_empty() {
            return Err(ModelError::EmptyKey);
        }
        Ok(())
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.visibility(), self.uri())
    }
}

/// Normalize a hostname or service name for matching.
fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().trim_end_matches('.').to_string()
}

fn normalize_path(path: Option<&str>) -> Option<String> {
    let trimmed = path?.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Wire form of a routing key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "visibility", rename_all = "snake_case")]
enum RoutingKeyRepr {
    External {
        hostname: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Internal {
        service: String,
    },
}

impl From<RoutingKeyRepr> for RoutingKey {
    fn from(repr: RoutingKeyRepr) -> Self {
        match repr {
            RoutingKeyRepr::External { hostname, path } => Self::External {
                hostname: normalize_name(&hostname),
                path: normalize_path(path.as_deref()),
            },
            RoutingKeyRepr::Internal { service } => Self::internal(&service),
        }
    }
}

impl From<RoutingKey> for RoutingKeyRepr {
    fn from(key: RoutingKey) -> Self {
        match key {
            RoutingKey::External { hostname, path } => Self::External { hostname, path },
            RoutingKey::Internal { service } => Self::Internal { service },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_key_normalized() {
        assert_eq!(
            RoutingKey::external("API.Example.COM."),
            RoutingKey::external("api.example.com")
        );
        assert_eq!(
            RoutingKey::external_with_path("api.example.com", "/v1/"),
            RoutingKey::External {
                hostname: "api.example.com".to_string(),
                path: Some("v1".to_string()),
            }
        );
        assert_eq!(
            RoutingKey::external_with_path("api.example.com", "/"),
            RoutingKey::external("api.example.com")
        );
    }

    #[test]
    fn test_uri_rendering() {
        assert_eq!(RoutingKey::external("a.example.com").uri(), "a.example.com");
        assert_eq!(
            RoutingKey::external_with_path("a.example.com", "docs").uri(),
            "a.example.com/docs"
        );
        assert_eq!(RoutingKey::internal("billing.apps.internal").uri(), "billing.apps.internal");
    }

    #[test]
    fn test_visibility() {
        assert_eq!(RoutingKey::external("a.test").visibility(), Visibility::External);
        assert!(RoutingKey::internal("svc").is_internal());
    }

    #[test]
    fn test_deserialize_normalizes() {
        let key: RoutingKey = serde_json::from_str(
            r#"{"visibility":"external","hostname":"WWW.Example.com.","path":"/shop"}"#,
        )
        .unwrap();
        assert_eq!(key, RoutingKey::external_with_path("www.example.com", "shop"));

        let json = serde_json::to_string(&RoutingKey::internal("svc.internal")).unwrap();
        assert_eq!(json, r#"{"visibility":"internal","service":"svc.internal"}"#);
    }

    #[test]
    fn test_validate_empty_name() {
        assert_eq!(RoutingKey::external(" . ").validate(), Err(ModelError::EmptyKey));
        assert!(RoutingKey::internal("svc").validate().is_ok());
    }
}
