//! Error types for model validation.

use thiserror::Error;

/// Errors raised when an inbound endpoint or key is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The instance identity is empty.
    #[error("endpoint instance_id cannot be empty")]
    EmptyInstanceId,

    /// The backend host is empty.
    #[error("endpoint {instance_id} has an empty host")]
    EmptyHost { instance_id: String },

    /// The backend port is zero.
    #[error("endpoint {instance_id} has port 0")]
    ZeroPort { instance_id: String },

    /// The routing key has no usable name.
    #[error("routing key name cannot be empty")]
    EmptyKey,
}
