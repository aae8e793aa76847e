//! Long polling.
//!
//! Producer side is identical to short polling but writes to the
//! `evq_long_` namespace. The consumer holds the poll request open, retrying
//! the pop at a fixed interval until an event arrives or the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_transport_core::{JsonMap, PollReply, StreamIdentity, TransportMode};
use tokio::time::{sleep, Instant};

use super::queued::QueuedProducer;
use crate::error::ServerError;
use crate::producer::{EventStream, StreamState};
use crate::queue::{queue_key, QueueStore};

/// Default bound on one long-poll request.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Default pause between two pop attempts of a waiting consumer.
pub const DEFAULT_LONG_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Producer side of a long-polling stream.
#[derive(Debug)]
pub struct LongPollingEventStream {
    inner: QueuedProducer,
}

impl LongPollingEventStream {
    pub fn new(identity: StreamIdentity, store: Arc<dyn QueueStore>) -> Self {
        Self {
            inner: QueuedProducer::new(TransportMode::Long, identity, store),
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        self.inner.identity()
    }

    pub fn queue_key(&self) -> &str {
        self.inner.key()
    }

    pub fn state(&self) -> StreamState {
        self.inner.state()
    }
}

#[async_trait]
impl EventStream for LongPollingEventStream {
    async fn start(&mut self) -> Result<(), ServerError> {
        self.inner.start();
        Ok(())
    }

    async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError> {
        self.inner.push(event_type, data).await
    }

    async fn send_comment(&mut self, _text: &str) -> Result<(), ServerError> {
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        false
    }

    async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError> {
        self.inner.finish(final_payload).await
    }
}

/// Consumer side of a long-polling stream.
#[derive(Debug, Clone)]
pub struct LongPollingConsumer {
    key: String,
    store: Arc<dyn QueueStore>,
    interval: Duration,
}

impl LongPollingConsumer {
    pub fn new(identity: &StreamIdentity, store: Arc<dyn QueueStore>) -> Self {
        Self {
            key: queue_key(TransportMode::Long, identity),
            store,
            interval: DEFAULT_LONG_POLL_INTERVAL,
        }
    }

    /// Sets the pause between pop attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// At least one pop is attempted even with a zero timeout. Store errors
    /// are logged and treated as "nothing yet".
    pub async fn wait_next(&self, timeout: Duration) -> PollReply {
        let began = Instant::now();
        loop {
            match self.store.pop_front(&self.key).await {
                Ok(Some(event)) => return PollReply::Event(event),
                Ok(None) => {}
                Err(e) => log::warn!("Long poll on '{}' failed: {}", self.key, e),
            }
            if began.elapsed() >= timeout {
                return PollReply::Timeout;
            }
            sleep(self.interval).await;
        }
    }
}
