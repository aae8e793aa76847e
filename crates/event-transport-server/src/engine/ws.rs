//! WebSocket engine.
//!
//! Writes each event as one JSON text message to a connection supplied by
//! the [`ConnectionResolver`](crate::factory::ConnectionResolver). The
//! connection itself is owned elsewhere (see [`crate::socket`]); this engine
//! only formats and hands off frames.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use event_transport_core::{Event, JsonMap};

use crate::error::ServerError;
use crate::producer::{EventStream, StreamState};

/// An open, externally managed WebSocket connection.
pub trait SocketConnection: Send + Sync {
    /// Queues one text message for the peer.
    fn send_text(&self, text: String) -> Result<(), ServerError>;

    /// Liveness of the connection, when the implementation can tell.
    ///
    /// `None` means "unknown" and is treated as connected.
    fn is_open(&self) -> Option<bool> {
        None
    }
}

/// Producer side of a WebSocket stream.
pub struct WebSocketEventStream {
    state: StreamState,
    connection: Arc<dyn SocketConnection>,
}

impl fmt::Debug for WebSocketEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketEventStream")
            .field("state", &self.state)
            .field("open", &self.connection.is_open())
            .finish()
    }
}

impl WebSocketEventStream {
    pub fn new(connection: Arc<dyn SocketConnection>) -> Self {
        Self {
            state: StreamState::default(),
            connection,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn send(&self, event: &Event) -> Result<(), ServerError> {
        let text = serde_json::to_string(event)?;
        if let Err(e) = self.connection.send_text(text) {
            log::debug!("Dropping WebSocket frame '{}': {}", event.event_type, e);
        }
        Ok(())
    }
}

#[async_trait]
impl EventStream for WebSocketEventStream {
    async fn start(&mut self) -> Result<(), ServerError> {
        self.state.begin();
        Ok(())
    }

    async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError> {
        if self.state.is_finished() {
            return Ok(());
        }
        self.state.begin();
        self.send(&Event::new(event_type, data))
    }

    async fn send_comment(&mut self, text: &str) -> Result<(), ServerError> {
        if self.state.is_finished() {
            return Ok(());
        }
        self.state.begin();
        self.send(&Event::comment(text))
    }

    fn is_disconnected(&self) -> bool {
        self.connection.is_open() == Some(false)
    }

    async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError> {
        if !self.state.end() {
            return Ok(());
        }
        self.state.begin();
        self.send(&Event::done(final_payload))
    }
}
