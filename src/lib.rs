//! # event-transport
//!
//! Pushes ordered event streams (such as streamed model tokens) from a server
//! to clients under deployment constraints that may forbid persistent
//! connections.
//!
//! ## Features
//!
//! - **Five transports**: single-shot, short polling, long polling, SSE and WebSocket
//! - **Negotiated fallback**: the same algorithm picks the engine on the server and the channel on the client
//! - **Durable queues**: polling survives server restarts through a file-backed queue store
//! - **POST-SSE hand-off**: event streams for POST requests behind `EventSource`-only clients
//!
//! ## Example
//!
//! ```rust,no_run
//! use event_transport::config::Config;
//! use event_transport::server::EventServer;
//!
//! # async fn demo() -> event_transport::Result<()> {
//! let server = EventServer::bind(&Config::default()).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use error::{AppError, Result};

pub use event_transport_server as transport;

use cli::{Commands, ConfigCommand, QueueCommand};
use client::{Callbacks, ChannelConfig, ClientCapabilities, TransportResolver};
use config::Config;
use event_transport_server::{json_map, FileQueueStore, QueueStore, StreamIdentity};
use serde_json::json;
use std::time::Duration;

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn run_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Serve { host, port, mode } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(mode) = mode {
                config.transport.negotiation.default_mode = mode;
            }
            let server = server::EventServer::bind(&config).await?;
            println!("Event server listening on http://{}", server.local_addr()?);
            server.run().await
        }
        Commands::Listen {
            url,
            mode,
            fallback,
            ws_url,
            service,
            stream,
            prompt,
        } => {
            let negotiation = &config.transport.negotiation;
            let mut channel_config = ChannelConfig::new(url)
                .with_mode(mode.unwrap_or_else(|| negotiation.default_mode.clone()))
                .with_fallback_modes(fallback.unwrap_or_else(|| negotiation.fallback_order.clone()))
                .with_auto_fallback(negotiation.auto_fallback)
                .with_short_poll_interval(config.polling.short_interval());
            if let Some(ws_url) = ws_url {
                channel_config = channel_config.with_web_socket_url(ws_url);
            }

            let stream_id = stream.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            let identity = StreamIdentity::try_new(service, stream_id)?;
            let channel = TransportResolver::create_channel(
                &channel_config,
                ClientCapabilities::default(),
                identity,
            );
            log::info!("Listening on {} via '{}'", channel.identity(), channel.mode());

            let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel();
            let callbacks = Callbacks::new(|message| println!("{}", message))
                .on_error(move |e| {
                    let _ = error_tx.send(e.to_string());
                });
            channel
                .connect(json_map(json!({ "prompt": prompt })), callbacks)
                .finished()
                .await;

            match error_rx.try_recv() {
                Ok(message) => Err(AppError::Protocol(message)),
                Err(_) => Ok(()),
            }
        }
        Commands::Config { command } => match command {
            ConfigCommand::Show => {
                print!("{}", config::to_toml(&config)?);
                Ok(())
            }
        },
        Commands::Queue { command } => {
            let store = FileQueueStore::new(config.queue.resolved_dir())?;
            match command {
                QueueCommand::Pop { key } => {
                    let reply = store.pop_front(&key).await?;
                    let value = match reply {
                        Some(event) => serde_json::to_value(event)?,
                        None => json!({ "type": "empty" }),
                    };
                    println!("{}", value);
                    Ok(())
                }
                QueueCommand::Purge { max_age_secs } => {
                    let max_age = Duration::from_secs(max_age_secs.unwrap_or(config.queue.max_age_secs));
                    let removed = store.purge_stale(max_age)?;
                    println!("Purged {} queue record(s) from {}", removed, store.dir().display());
                    Ok(())
                }
            }
        }
    }
}
