//! # routesync-model
//!
//! Value types describing what the router should know about a route.
//!
//! ## Concepts
//!
//! - A [`RoutingKey`] names a logical route: an external hostname (optionally
//!   with a path) or a cluster-internal service name.
//! - An [`Endpoint`] is one backend instance bound to a key.
//! - A [`FreshnessTag`] orders updates to the same instance so stale events
//!   can be discarded.
//! - A [`RoutingEntry`] is the endpoint set plus route tags stored per key.
//!
//! These types carry no behavior beyond identity, ordering, and validation.
//! Table mutation and message derivation live in `routesync-table`.

mod endpoint;
mod entry;
mod error;
mod key;

pub use endpoint::{Endpoint, FreshnessTag};
pub use entry::RoutingEntry;
pub use error::ModelError;
pub use key::{RoutingKey, Visibility};
