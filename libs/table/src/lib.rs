//! # routesync-table
//!
//! The in-memory model of what the router tier should know, and the engine
//! that turns changes to it into registration and unregistration messages.
//!
//! ## Components
//!
//! - [`RoutingTable`]: key → entry map behind a single table lock; every
//!   mutation returns the exact [`MessagesToEmit`] delta it produced
//! - [`diff`]: pure functions computing the messages that move the router
//!   from one table state to another
//! - [`MessagesToEmit`]: a batch partitioned into external/internal
//!   registrations/unregistrations, compared as a set
//!
//! ## Invariants
//!
//! - A key present in the table always has a non-empty endpoint set
//! - Endpoint identity is unique per key
//! - Stale updates (older freshness tag) never change the table
//! - The diff engine never emits a message with zero endpoints

pub mod diff;
mod messages;
mod table;

pub use diff::{diff_entry, diff_tables, registrations};
pub use messages::{Action, BackendAddress, MessagesToEmit, RegistryMessage, Subject};
pub use table::{RouteMap, RoutingTable, SwapOutcome, TableChange, TableGuard, TableSnapshot};
