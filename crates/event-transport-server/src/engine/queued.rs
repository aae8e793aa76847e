//! Producer half shared by the short- and long-polling engines.

use std::sync::Arc;

use event_transport_core::event::{DONE, EMPTY, TIMEOUT};
use event_transport_core::{Event, JsonMap, StreamIdentity, TransportMode};

use crate::error::ServerError;
use crate::producer::StreamState;
use crate::queue::{queue_key, QueueStore};

/// Appends a stream's events to its queue.
///
/// No response is held open, so `start` emits nothing and the producer never
/// considers itself disconnected.
#[derive(Debug)]
pub(crate) struct QueuedProducer {
    state: StreamState,
    identity: StreamIdentity,
    key: String,
    store: Arc<dyn QueueStore>,
}

impl QueuedProducer {
    pub(crate) fn new(
        mode: TransportMode,
        identity: StreamIdentity,
        store: Arc<dyn QueueStore>,
    ) -> Self {
        let key = queue_key(mode, &identity);
        Self {
            state: StreamState::default(),
            identity,
            key,
            store,
        }
    }

    pub(crate) fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn start(&mut self) {
        self.state.begin();
    }

    /// Queues one event. A pushed `done` finishes the stream; the poll
    /// sentinels `empty` and `timeout` are never stored.
    pub(crate) async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError> {
        if self.state.is_finished() {
            return Ok(());
        }
        match event_type {
            DONE => return self.finish(data).await,
            EMPTY | TIMEOUT => {
                log::warn!("Dropping reserved '{}' event for {}", event_type, self.identity);
                return Ok(());
            }
            _ => {}
        }
        self.start();
        self.store.append(&self.key, &Event::new(event_type, data)).await
    }

    pub(crate) async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError> {
        if !self.state.end() {
            return Ok(());
        }
        self.start();
        log::debug!("Queueing done event for {}", self.identity);
        self.store.append(&self.key, &Event::done(final_payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueStore;
    use event_transport_core::event::json_map;
    use serde_json::json;

    fn setup() -> (QueuedProducer, Arc<dyn QueueStore>) {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
        let producer = QueuedProducer::new(
            TransportMode::Long,
            StreamIdentity::new("chat", "s1"),
            Arc::clone(&store),
        );
        (producer, store)
    }

    #[tokio::test]
    async fn test_sentinel_types_are_never_queued() {
        let (mut producer, store) = setup();

        producer.push("timeout", JsonMap::new()).await.unwrap();
        producer.push("empty", JsonMap::new()).await.unwrap();
        producer.push("token", json_map(json!({"t": "a"}))).await.unwrap();

        assert_eq!(store.len(producer.key()).await.unwrap(), 1);
        assert_eq!(
            store.pop_front(producer.key()).await.unwrap(),
            Some(Event::new("token", json_map(json!({"t": "a"}))))
        );
        assert!(!producer.state().is_finished());
    }

    #[tokio::test]
    async fn test_pushed_done_finishes_the_stream() {
        let (mut producer, store) = setup();

        producer.push("done", json_map(json!({"n": 0}))).await.unwrap();
        producer.push("token", json_map(json!({"t": "late"}))).await.unwrap();
        producer.finish(json_map(json!({"n": 1}))).await.unwrap();

        assert!(producer.state().is_finished());
        assert_eq!(store.len(producer.key()).await.unwrap(), 1);
        assert_eq!(
            store.pop_front(producer.key()).await.unwrap(),
            Some(Event::done(json_map(json!({"n": 0}))))
        );
    }
}
