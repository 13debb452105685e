//! # routesync-events
//!
//! Scheduling events that drive the routing table.
//!
//! ## Design Principles
//!
//! - The event feed is loosely typed on the wire (`event_type` string plus a
//!   JSON payload); it is decoded once, at the edge, into the closed
//!   [`RoutingEvent`] enum
//! - Consumers dispatch by exhaustive matching, never by inspecting strings
//! - Events are versioned for schema evolution
//!
//! ## Event Types
//!
//! - `endpoint.added`: a backend instance now serves a routing key
//! - `endpoint.removed`: a backend instance no longer serves a routing key
//! - `routes.desired_state_sync`: the full desired table, replacing local state

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
