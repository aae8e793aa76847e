//! Error types for event-transport core operations.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A mode name that is not one of the five transport modes
    #[error("Unknown transport mode: {0}")]
    UnknownMode(String),

    /// A stream identity with an empty service name or stream id
    #[error("Invalid stream identity: {0}")]
    InvalidIdentity(String),

    /// Error during JSON serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;
