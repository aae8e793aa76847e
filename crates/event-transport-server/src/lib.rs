//! Event Transport Server
//!
//! Server-side half of event-transport: the producer contract, the five
//! delivery engines, the durable queue stores behind polling, the stream
//! factory, WebSocket connection handling and POST-SSE hand-off records.
//!
//! # Overview
//!
//! - **Producer contract**: [`EventStream`], implemented by every engine
//! - **Engines**: single-shot, short polling, long polling, SSE and WebSocket
//! - **Queue stores**: [`FileQueueStore`] and [`MemoryQueueStore`]
//! - **Factory**: [`EventStreamFactory`] negotiates an engine per stream
//!
//! # Usage
//!
//! ```rust,ignore
//! use event_transport_server::{EventStream, EventStreamFactory, MemoryQueueStore};
//!
//! let factory = EventStreamFactory::new(config, Arc::new(MemoryQueueStore::new()));
//! let mut stream = factory.create_stream("chat", "s1");
//! stream.push("token", data).await?;
//! stream.finish(payload).await?;
//! ```

pub mod engine;
pub mod error;
pub mod factory;
pub mod handoff;
pub mod producer;
pub mod queue;
pub mod socket;

// Re-export core types for convenience
pub use event_transport_core::*;

pub use error::{Result, ServerError};

pub use engine::{
    LongPollingConsumer, LongPollingEventStream, NoStreamEventStream, ShortPollingConsumer,
    ShortPollingEventStream, SingleShotResponse, SocketConnection, SseBody, SseConfig,
    SseEventStream, TransportStream, WebSocketEventStream,
};
pub use factory::{ConnectionResolver, EventStreamFactory, FactoryOptions, NullConnectionResolver};
pub use handoff::{HandoffEntry, HandoffRejection, HandoffStore};
pub use producer::{EventStream, StreamState};
pub use queue::{queue_key, FileQueueStore, MemoryQueueStore, QueueStore};
pub use socket::{ConnectionRegistry, WsConfig, WsConnection, WsHandler};
