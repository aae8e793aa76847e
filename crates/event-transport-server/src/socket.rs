//! Server-side WebSocket connections.
//!
//! The upgrade route pairs each socket with a [`WsConnection`] (what the
//! WebSocket engine writes to) and a [`WsHandler`] (what pumps frames to the
//! socket). Open connections are kept in a [`ConnectionRegistry`], which is
//! the server's [`ConnectionResolver`].
//!
//! # Example
//!
//! ```rust,ignore
//! async fn ws_endpoint(upgrade: WebSocketUpgrade, State(registry): State<Arc<ConnectionRegistry>>) -> impl IntoResponse {
//!     upgrade.on_upgrade(move |socket| async move {
//!         let (connection, handler) = socket::channel(WsConfig::default());
//!         registry.register(identity.clone(), connection);
//!         let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
//!         handler.serve(socket, inbound_tx).await;
//!         registry.unregister(&identity);
//!     })
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use event_transport_core::StreamIdentity;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::engine::SocketConnection;
use crate::error::ServerError;
use crate::factory::ConnectionResolver;

/// Default ping interval for WebSocket keep-alive (30 seconds).
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Interval between ping messages for keep-alive.
    pub ping_interval: Duration,
    /// Whether to send ping messages.
    pub enable_ping: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            enable_ping: true,
        }
    }
}

impl WsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn disable_ping(mut self) -> Self {
        self.enable_ping = false;
        self
    }
}

/// Writing half of a served socket.
///
/// Sends never block: frames are queued until the handler writes them out.
#[derive(Debug, Clone)]
pub struct WsConnection {
    sender: mpsc::UnboundedSender<String>,
}

impl SocketConnection for WsConnection {
    fn send_text(&self, text: String) -> Result<(), ServerError> {
        self.sender
            .send(text)
            .map_err(|_| ServerError::Connection("WebSocket closed".to_string()))
    }

    fn is_open(&self) -> Option<bool> {
        Some(!self.sender.is_closed())
    }
}

/// Drives one socket until either side closes it.
pub struct WsHandler {
    receiver: mpsc::UnboundedReceiver<String>,
    config: WsConfig,
}

impl WsHandler {
    /// Pumps queued frames to `socket` and forwards every text message the
    /// peer sends to `inbound`.
    ///
    /// Returns when the peer closes the socket, a write fails, or every
    /// [`WsConnection`] for this handler has been dropped (in which case a
    /// close frame is sent first).
    pub async fn serve(self, socket: WebSocket, inbound: mpsc::UnboundedSender<String>) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let mut frames = self.receiver;

        let mut ping_interval = self.config.enable_ping.then(|| interval(self.config.ping_interval));

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }

                _ = async {
                    match ping_interval.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }

                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound.send(text.to_string());
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        // Receiver drops here, so engines holding the connection see it closed.
    }
}

/// Creates a connection/handler pair.
pub fn channel(config: WsConfig) -> (WsConnection, WsHandler) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WsConnection { sender: tx }, WsHandler { receiver: rx, config })
}

/// Open sockets keyed by stream identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<StreamIdentity, WsConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection`, replacing any previous one for `identity`.
    pub fn register(&self, identity: StreamIdentity, connection: WsConnection) {
        log::debug!("Registering WebSocket for {}", identity);
        self.connections.insert(identity, connection);
    }

    pub fn unregister(&self, identity: &StreamIdentity) {
        self.connections.remove(identity);
    }

    /// Number of registered connections, open or not.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl ConnectionResolver for ConnectionRegistry {
    fn resolve(&self, service: &str, stream_id: &str) -> Option<Arc<dyn SocketConnection>> {
        let identity = StreamIdentity::new(service, stream_id);
        let connection = self.connections.get(&identity)?.clone();
        if connection.is_open() == Some(false) {
            self.connections.remove(&identity);
            return None;
        }
        Some(Arc::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = WsConfig::new()
            .ping_interval(Duration::from_secs(10))
            .disable_ping();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert!(!config.enable_ping);
    }

    #[tokio::test]
    async fn test_connection_reports_closed_after_handler_drop() {
        let (connection, handler) = channel(WsConfig::default());
        assert_eq!(connection.is_open(), Some(true));
        connection.send_text("{}".to_string()).unwrap();

        drop(handler);
        assert_eq!(connection.is_open(), Some(false));
        assert!(connection.send_text("{}".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_registry_resolves_open_connections_only() {
        let registry = ConnectionRegistry::new();
        let identity = StreamIdentity::new("chat", "s1");
        assert!(registry.resolve("chat", "s1").is_none());

        let (connection, handler) = channel(WsConfig::default());
        registry.register(identity.clone(), connection);
        assert!(registry.resolve("chat", "s1").is_some());
        assert!(registry.resolve("chat", "other").is_none());

        drop(handler);
        assert!(registry.resolve("chat", "s1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_connection_feeds_handler() {
        let registry = ConnectionRegistry::new();
        let (connection, mut handler) = channel(WsConfig::default());
        registry.register(StreamIdentity::new("chat", "s1"), connection);

        let resolved = registry.resolve("chat", "s1").unwrap();
        resolved.send_text("hello".to_string()).unwrap();
        assert_eq!(handler.receiver.recv().await.unwrap(), "hello");
    }
}
