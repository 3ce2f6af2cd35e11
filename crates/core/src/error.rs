//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation of inbound
/// payloads). Process and transport concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The payload could not be decoded into the expected message shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// No message kind is routed to the given key.
    #[error("unroutable message: {0}")]
    Unroutable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn unroutable(routing_key: impl Into<String>) -> Self {
        Self::Unroutable(routing_key.into())
    }
}
