//! Routing event definitions.

use routesync_model::{Endpoint, RoutingEntry, RoutingKey};
use serde::{Deserialize, Serialize};

/// All event type names as constants.
pub mod event_types {
    pub const ENDPOINT_ADDED: &str = "endpoint.added";
    pub const ENDPOINT_REMOVED: &str = "endpoint.removed";
    pub const DESIRED_STATE_SYNC: &str = "routes.desired_state_sync";

    /// Prefixes of event types this service consumes.
    pub const ROUTING_PREFIXES: &[&str] = &["endpoint.", "routes."];

    /// Returns true if the event type belongs to the routing feed.
    pub fn is_routing(event_type: &str) -> bool {
        ROUTING_PREFIXES.iter().any(|p| event_type.starts_with(p))
    }
}

/// Current schema version for every routing event type.
pub const CURRENT_EVENT_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddedPayload {
    pub key: RoutingKey,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRemovedPayload {
    pub key: RoutingKey,
    pub endpoint: Endpoint,
}

/// One key of a desired-state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredRoute {
    pub key: RoutingKey,
    pub entry: RoutingEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateSyncPayload {
    pub routes: Vec<DesiredRoute>,
}

/// A decoded scheduling event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingEvent {
    EndpointAdded(EndpointAddedPayload),
    EndpointRemoved(EndpointRemovedPayload),
    DesiredStateSync(DesiredStateSyncPayload),
}

impl RoutingEvent {
    pub fn endpoint_added(key: RoutingKey, endpoint: Endpoint) -> Self {
        Self::EndpointAdded(EndpointAddedPayload { key, endpoint })
    }

    pub fn endpoint_removed(key: RoutingKey, endpoint: Endpoint) -> Self {
        Self::EndpointRemoved(EndpointRemovedPayload { key, endpoint })
    }

    pub fn desired_state_sync(routes: Vec<DesiredRoute>) -> Self {
        Self::DesiredStateSync(DesiredStateSyncPayload { routes })
    }

    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EndpointAdded(_) => event_types::ENDPOINT_ADDED,
            Self::EndpointRemoved(_) => event_types::ENDPOINT_REMOVED,
            Self::DesiredStateSync(_) => event_types::DESIRED_STATE_SYNC,
        }
    }

    /// Encode the payload as JSON.
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::EndpointAdded(p) => serde_json::to_value(p),
            Self::EndpointRemoved(p) => serde_json::to_value(p),
            Self::DesiredStateSync(p) => serde_json::to_value(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let key = RoutingKey::external("a.example.com");
        let ep = Endpoint::new("inst-1", "10.0.0.1", 8080);

        assert_eq!(
            RoutingEvent::endpoint_added(key.clone(), ep.clone()).event_type(),
            "endpoint.added"
        );
        assert_eq!(
            RoutingEvent::endpoint_removed(key, ep).event_type(),
            "endpoint.removed"
        );
        assert_eq!(
            RoutingEvent::desired_state_sync(vec![]).event_type(),
            "routes.desired_state_sync"
        );
    }

    #[test]
    fn test_is_routing() {
        assert!(event_types::is_routing("endpoint.added"));
        assert!(event_types::is_routing("routes.desired_state_sync"));
        assert!(!event_types::is_routing("node.enrolled"));
    }

    #[test]
    fn test_desired_route_wire_shape() {
        let route = DesiredRoute {
            key: RoutingKey::internal("svc.internal"),
            entry: RoutingEntry::from_endpoints(vec![Endpoint::new("i", "10.0.0.1", 80)])
                .with_tag("component", "api"),
        };
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["key"]["service"], "svc.internal");
        assert_eq!(json["entry"]["endpoints"][0]["instance_id"], "i");
        assert_eq!(json["entry"]["tags"]["component"], "api");

        let parsed: DesiredRoute = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, route);
    }
}
