//! Error types for event-transport server operations.

use event_transport_core::TransportError;
use thiserror::Error;

/// Errors that can occur in server-side stream operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] TransportError),

    /// Queue store could not be read, locked or written
    #[error("Queue error: {0}")]
    Queue(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error during event emission
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Channel or stream error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

/// Result type alias using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;
