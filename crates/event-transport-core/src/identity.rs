//! Stream identities and storage keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Addresses one logical event stream: a service name plus a stream id
/// unique within that service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamIdentity {
    service: String,
    stream_id: String,
}

impl StreamIdentity {
    /// Creates an identity without validation.
    pub fn new(service: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            stream_id: stream_id.into(),
        }
    }

    /// Creates an identity, rejecting empty components.
    pub fn try_new(service: impl Into<String>, stream_id: impl Into<String>) -> Result<Self> {
        let identity = Self::new(service, stream_id);
        if identity.service.trim().is_empty() {
            return Err(TransportError::InvalidIdentity("service name is empty".into()));
        }
        if identity.stream_id.trim().is_empty() {
            return Err(TransportError::InvalidIdentity("stream id is empty".into()));
        }
        Ok(identity)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Key-safe token for this identity, see [`sanitize_key`].
    pub fn storage_key(&self) -> String {
        sanitize_key(&format!("{}_{}", self.service, self.stream_id))
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.stream_id)
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_sanitized() {
        let identity = StreamIdentity::new("svc/with spaces", "stream#1");
        assert_eq!(identity.storage_key(), "svc_with_spaces_stream_1");
    }

    #[test]
    fn test_sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_key("chat-bot_01"), "chat-bot_01");
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_key("ümlaut"), "_mlaut");
    }

    #[test]
    fn test_try_new_rejects_empty_parts() {
        assert!(StreamIdentity::try_new("", "abc").is_err());
        assert!(StreamIdentity::try_new("chat", "  ").is_err());
        assert!(StreamIdentity::try_new("chat", "abc").is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(StreamIdentity::new("chat", "42").to_string(), "chat/42");
    }
}
