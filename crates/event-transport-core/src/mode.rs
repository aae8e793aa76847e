//! The five delivery mechanisms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// A delivery mechanism for one event stream.
///
/// The wire name of each variant (`nostream`, `short`, `long`, `sse`, `ws`)
/// is what configuration files, query strings and endpoint maps use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Single-shot response carrying every event at once.
    NoStream,
    /// Client polls a queue endpoint at a fixed interval.
    Short,
    /// Client polls a queue endpoint that blocks until an event or timeout.
    Long,
    /// Server-Sent Events over a held-open response.
    Sse,
    /// JSON frames over an already open WebSocket.
    Ws,
}

impl TransportMode {
    /// Every mode, in no particular preference order.
    pub const ALL: [TransportMode; 5] = [
        TransportMode::NoStream,
        TransportMode::Short,
        TransportMode::Long,
        TransportMode::Sse,
        TransportMode::Ws,
    ];

    /// Returns the wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::NoStream => "nostream",
            TransportMode::Short => "short",
            TransportMode::Long => "long",
            TransportMode::Sse => "sse",
            TransportMode::Ws => "ws",
        }
    }

    /// Whether events for this mode are parked in the queue store.
    pub fn is_queued(&self) -> bool {
        matches!(self, TransportMode::Short | TransportMode::Long)
    }

    /// Whether the mechanism holds a connection that can be lost mid-stream.
    pub fn is_persistent(&self) -> bool {
        matches!(self, TransportMode::Sse | TransportMode::Ws)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "nostream" => Ok(TransportMode::NoStream),
            "short" => Ok(TransportMode::Short),
            "long" => Ok(TransportMode::Long),
            "sse" => Ok(TransportMode::Sse),
            "ws" => Ok(TransportMode::Ws),
            other => Err(TransportError::UnknownMode(other.to_string())),
        }
    }
}
