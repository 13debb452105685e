//! Event envelope - the feed item wrapping every routing event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::types::{
    event_types, DesiredStateSyncPayload, EndpointAddedPayload, EndpointRemovedPayload,
    RoutingEvent, CURRENT_EVENT_VERSION,
};

fn default_event_version() -> i32 {
    CURRENT_EVENT_VERSION
}

/// One item of the scheduling-event feed.
///
/// The payload stays as raw JSON until [`EventEnvelope::decode`] is called so
/// that unrelated event types can be skipped without parsing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally monotonic event identifier (feed cursor).
    pub event_id: i64,

    /// When the event occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,

    /// The event type (e.g., "endpoint.added").
    pub event_type: String,

    /// Schema version for this event type.
    #[serde(default = "default_event_version")]
    pub event_version: i32,

    /// Event-specific payload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl EventEnvelope {
    /// Wrap a typed event for the feed.
    pub fn from_event(event_id: i64, event: &RoutingEvent) -> Result<Self, EventError> {
        Ok(Self {
            event_id,
            occurred_at: Some(Utc::now()),
            event_type: event.event_type().to_string(),
            event_version: CURRENT_EVENT_VERSION,
            payload: Some(event.payload_json().map_err(|source| EventError::Encode {
                event_type: event.event_type(),
                source,
            })?),
        })
    }

    /// Returns true if this item belongs to the routing feed.
    pub fn is_routing(&self) -> bool {
        event_types::is_routing(&self.event_type)
    }

    /// Decode into the closed event enum.
    pub fn decode(&self) -> Result<RoutingEvent, EventError> {
        if self.event_version != CURRENT_EVENT_VERSION {
            return Err(EventError::UnsupportedVersion {
                event_id: self.event_id,
                event_type: self.event_type.clone(),
                version: self.event_version,
            });
        }

        let payload = self
            .payload
            .clone()
            .ok_or_else(|| EventError::MissingPayload {
                event_id: self.event_id,
                event_type: self.event_type.clone(),
            })?;

        let invalid = |source: serde_json::Error| EventError::InvalidPayload {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            source,
        };

        match self.event_type.as_str() {
            event_types::ENDPOINT_ADDED => serde_json::from_value::<EndpointAddedPayload>(payload)
                .map(RoutingEvent::EndpointAdded)
                .map_err(invalid),
            event_types::ENDPOINT_REMOVED => {
                serde_json::from_value::<EndpointRemovedPayload>(payload)
                    .map(RoutingEvent::EndpointRemoved)
                    .map_err(invalid)
            }
            event_types::DESIRED_STATE_SYNC => {
                serde_json::from_value::<DesiredStateSyncPayload>(payload)
                    .map(RoutingEvent::DesiredStateSync)
                    .map_err(invalid)
            }
            other => Err(EventError::UnknownEventType {
                event_id: self.event_id,
                event_type: other.to_string(),
            }),
        }
    }
}
