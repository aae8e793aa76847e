//! Error types for the `evtx-ctl` application layer.

use std::path::PathBuf;

use event_transport_server::{ServerError, TransportError};
use thiserror::Error;

/// Errors surfaced by the CLI, the HTTP server and the client channels.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration file missing or malformed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Negotiation or event model error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Engine or queue store error
    #[error(transparent)]
    Server(#[from] ServerError),

    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// WebSocket handshake or transfer failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A frame or reply could not be decoded
    #[error("Malformed message: {0}")]
    Protocol(String),

    /// Requested streaming service is not registered
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}: {message}", path.display())]
    ParsingFailed { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for application operations
pub type Result<T> = std::result::Result<T, AppError>;
