//! Short polling.
//!
//! The producer appends to the stream's queue; the client polls a separate
//! endpoint at a fixed interval and each poll pops at most one event. An
//! empty queue answers with the `{"type":"empty"}` sentinel, which is never
//! stored.

use std::sync::Arc;

use async_trait::async_trait;
use event_transport_core::{JsonMap, PollReply, StreamIdentity, TransportMode};

use super::queued::QueuedProducer;
use crate::error::ServerError;
use crate::producer::{EventStream, StreamState};
use crate::queue::{queue_key, QueueStore};

/// Producer side of a short-polling stream.
#[derive(Debug)]
pub struct ShortPollingEventStream {
    inner: QueuedProducer,
}

impl ShortPollingEventStream {
    pub fn new(identity: StreamIdentity, store: Arc<dyn QueueStore>) -> Self {
        Self {
            inner: QueuedProducer::new(TransportMode::Short, identity, store),
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        self.inner.identity()
    }

    /// Key of the queue this stream appends to.
    pub fn queue_key(&self) -> &str {
        self.inner.key()
    }

    pub fn state(&self) -> StreamState {
        self.inner.state()
    }
}

#[async_trait]
impl EventStream for ShortPollingEventStream {
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

/// Consumer side: one call per poll request.
#[derive(Debug, Clone)]
pub struct ShortPollingConsumer {
    key: String,
    store: Arc<dyn QueueStore>,
}

impl ShortPollingConsumer {
    pub fn new(identity: &StreamIdentity, store: Arc<dyn QueueStore>) -> Self {
        Self {
            key: queue_key(TransportMode::Short, identity),
            store,
        }
    }

    /// Pops the next event, or answers [`PollReply::Empty`].
    ///
    /// Store failures also answer `Empty`: the client simply polls again.
    pub async fn poll_next(&self) -> PollReply {
        match self.store.pop_front(&self.key).await {
            Ok(event) => PollReply::from(event),
            Err(e) => {
                log::warn!("Short poll on '{}' failed, answering empty: {}", self.key, e);
                PollReply::Empty
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueStore;
    use event_transport_core::event::json_map;
    use event_transport_core::Event;
    use serde_json::json;

    fn setup() -> (ShortPollingEventStream, ShortPollingConsumer, Arc<dyn QueueStore>) {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
        let identity = StreamIdentity::new("chat", "s1");
        let stream = ShortPollingEventStream::new(identity.clone(), Arc::clone(&store));
        let consumer = ShortPollingConsumer::new(&identity, Arc::clone(&store));
        (stream, consumer, store)
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let (mut stream, consumer, _) = setup();

        stream.push("token", json_map(json!({"t": "He"}))).await.unwrap();
        stream.push("token", json_map(json!({"t": "llo"}))).await.unwrap();
        stream.finish(json_map(json!({"n": 2}))).await.unwrap();

        let replies: Vec<_> = [
            consumer.poll_next().await,
            consumer.poll_next().await,
            consumer.poll_next().await,
            consumer.poll_next().await,
        ]
        .iter()
        .map(|r| serde_json::to_value(r).unwrap())
        .collect();

        assert_eq!(
            replies,
            vec![
                json!({"type": "token", "data": {"t": "He"}}),
                json!({"type": "token", "data": {"t": "llo"}}),
                json!({"type": "done", "data": {"n": 2}}),
                json!({"type": "empty"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let (mut stream, consumer, store) = setup();

        stream.finish(json_map(json!({"ok": true}))).await.unwrap();
        stream.finish(json_map(json!({"ok": false}))).await.unwrap();

        assert_eq!(store.len(stream.queue_key()).await.unwrap(), 1);
        let done = consumer.poll_next().await.into_event().unwrap();
        assert_eq!(done, Event::done(json_map(json!({"ok": true}))));
        assert_eq!(consumer.poll_next().await, PollReply::Empty);
    }

    #[tokio::test]
    async fn test_push_after_finish_is_dropped() {
        let (mut stream, consumer, store) = setup();

        stream.finish(json_map(json!({"final": 1}))).await.unwrap();
        stream.push("later", json_map(json!({"x": 1}))).await.unwrap();

        assert_eq!(store.len(stream.queue_key()).await.unwrap(), 1);
        assert!(consumer.poll_next().await.into_event().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_empty_sentinel_is_not_persisted() {
        let (stream, consumer, store) = setup();

        assert_eq!(consumer.poll_next().await, PollReply::Empty);
        assert_eq!(store.len(stream.queue_key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_comment_is_noop_and_never_disconnected() {
        let (mut stream, _, store) = setup();

        stream.send_comment("hello").await.unwrap();
        assert!(!stream.is_disconnected());
        assert_eq!(store.len(stream.queue_key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_starts_implicitly() {
        let (mut stream, _, _) = setup();
        assert!(!stream.state().is_started());
        stream.push("token", JsonMap::new()).await.unwrap();
        assert!(stream.state().is_started());
    }
}
