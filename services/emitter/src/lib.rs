//! Route emitter.
//!
//! Keeps the router tier in sync with the routing table:
//! - [`sync`] tails the scheduling event feed
//! - [`handler::RouteHandler`] applies events to the table
//! - [`emission::EmissionPipeline`] publishes the resulting batches and
//!   periodically re-announces the whole table

pub mod config;
pub mod emission;
pub mod handler;
pub mod publisher;
pub mod sync;

pub use config::Config;
pub use emission::{EmissionPipeline, PipelineConfig, PipelineError, PipelineHandle};
pub use handler::{HandleOutcome, HandlerError, RouteHandler};
pub use publisher::{HttpPublisher, LogPublisher, PublishError, Publisher};
