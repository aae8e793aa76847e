//! Stream factory: turns the process-wide [`TransportConfig`] into a concrete
//! engine for one stream.

use std::sync::Arc;
use std::time::Duration;

use event_transport_core::{Resolution, StreamIdentity, TransportConfig, TransportMode};

use crate::engine::long_poll::DEFAULT_LONG_POLL_INTERVAL;
use crate::engine::{
    LongPollingConsumer, LongPollingEventStream, NoStreamEventStream, ShortPollingConsumer,
    ShortPollingEventStream, SocketConnection, SseConfig, SseEventStream, TransportStream,
    WebSocketEventStream,
};
use crate::queue::QueueStore;

/// Finds the live WebSocket connection of a stream, if any.
pub trait ConnectionResolver: Send + Sync {
    fn resolve(&self, service: &str, stream_id: &str) -> Option<Arc<dyn SocketConnection>>;
}

/// Resolver that never finds a connection, which disables `ws`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConnectionResolver;

impl ConnectionResolver for NullConnectionResolver {
    fn resolve(&self, _service: &str, _stream_id: &str) -> Option<Arc<dyn SocketConnection>> {
        None
    }
}

/// Engine settings beyond mode selection.
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    /// Whether the runtime can hold a streaming response open. When false
    /// `sse` is treated as unavailable.
    pub sse_supported: bool,
    pub sse: SseConfig,
    pub long_poll_interval: Duration,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            sse_supported: true,
            sse: SseConfig::default(),
            long_poll_interval: DEFAULT_LONG_POLL_INTERVAL,
        }
    }
}

/// Builds event streams for `(service, stream_id)` pairs.
///
/// # Example
///
/// ```rust,ignore
/// let factory = EventStreamFactory::new(config, Arc::new(MemoryQueueStore::new()));
/// let mut stream = factory.create_stream("chat", "s1");
/// stream.push("token", data).await?;
/// stream.finish(payload).await?;
/// ```
#[derive(Clone)]
pub struct EventStreamFactory {
    config: TransportConfig,
    store: Arc<dyn QueueStore>,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    options: FactoryOptions,
}

impl std::fmt::Debug for EventStreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamFactory")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("resolver", &self.resolver.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl EventStreamFactory {
    /// Creates a factory without a connection resolver.
    pub fn new(config: TransportConfig, store: Arc<dyn QueueStore>) -> Self {
        Self {
            config,
            store,
            resolver: None,
            options: FactoryOptions::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_options(mut self, options: FactoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Creates a stream using the configured preferred mode.
    pub fn create_stream(&self, service: &str, stream_id: &str) -> TransportStream {
        self.resolve(&self.config.default_mode, service, stream_id).value
    }

    /// Creates a stream preferring `mode` over the configured default, with
    /// the configured fallback behaviour.
    pub fn create_stream_with_mode(
        &self,
        mode: &str,
        service: &str,
        stream_id: &str,
    ) -> Resolution<TransportStream> {
        self.resolve(mode, service, stream_id)
    }

    /// Consumer for the short-polling queue of a stream.
    pub fn short_poll_consumer(&self, identity: &StreamIdentity) -> ShortPollingConsumer {
        ShortPollingConsumer::new(identity, Arc::clone(&self.store))
    }

    /// Consumer for the long-polling queue of a stream.
    pub fn long_poll_consumer(&self, identity: &StreamIdentity) -> LongPollingConsumer {
        LongPollingConsumer::new(identity, Arc::clone(&self.store))
            .with_interval(self.options.long_poll_interval)
    }

    fn resolve(&self, primary: &str, service: &str, stream_id: &str) -> Resolution<TransportStream> {
        let config = TransportConfig {
            default_mode: primary.to_string(),
            ..self.config.clone()
        };
        let resolution = config.negotiate(
            |mode| self.create_by_mode(mode, service, stream_id),
            || TransportStream::NoStream(NoStreamEventStream::new()),
        );
        log::debug!(
            "Stream {}/{} uses '{}'{}",
            service,
            stream_id,
            resolution.mode,
            if resolution.fell_back { " (fallback)" } else { "" }
        );
        resolution
    }

    fn create_by_mode(
        &self,
        mode: TransportMode,
        service: &str,
        stream_id: &str,
    ) -> Option<TransportStream> {
        let identity = || StreamIdentity::new(service, stream_id);
        match mode {
            TransportMode::NoStream => Some(TransportStream::NoStream(NoStreamEventStream::new())),
            TransportMode::Short => Some(TransportStream::ShortPolling(
                ShortPollingEventStream::new(identity(), Arc::clone(&self.store)),
            )),
            TransportMode::Long => Some(TransportStream::LongPolling(LongPollingEventStream::new(
                identity(),
                Arc::clone(&self.store),
            ))),
            TransportMode::Sse => self
                .options
                .sse_supported
                .then(|| TransportStream::Sse(SseEventStream::new(self.options.sse.clone()))),
            TransportMode::Ws => {
                let connection = self.resolver.as_ref()?.resolve(service, stream_id)?;
                Some(TransportStream::WebSocket(WebSocketEventStream::new(connection)))
            }
        }
    }
}
