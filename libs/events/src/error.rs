//! Decoding failures for feed items.

use thiserror::Error;

/// A feed item that could not be turned into a [`RoutingEvent`](crate::RoutingEvent).
///
/// Every variant names the offending event so the consumer can log and skip it.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event {event_id}: unknown routing event type '{event_type}'")]
    UnknownEventType { event_id: i64, event_type: String },

    #[error("event {event_id}: {event_type} v{version} is not supported")]
    UnsupportedVersion {
        event_id: i64,
        event_type: String,
        version: i32,
    },

    #[error("event {event_id} ({event_type}) is missing its payload")]
    MissingPayload { event_id: i64, event_type: String },

    #[error("event {event_id} ({event_type}) has an invalid payload: {source}")]
    InvalidPayload {
        event_id: i64,
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {event_type} payload")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl EventError {
    /// Id of the feed item the error refers to, if any.
    pub fn event_id(&self) -> Option<i64> {
        match self {
            Self::UnknownEventType { event_id, .. }
            | Self::UnsupportedVersion { event_id, .. }
            | Self::MissingPayload { event_id, .. }
            | Self::InvalidPayload { event_id, .. } => Some(*event_id),
            Self::Encode { .. } => None,
        }
    }
}
