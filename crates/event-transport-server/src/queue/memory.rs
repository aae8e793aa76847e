//! In-process queue store.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use event_transport_core::Event;

use super::QueueStore;
use crate::error::ServerError;

/// Queue store backed by a concurrent map.
///
/// Each key's queue sits behind its shard lock, which serializes appends and
/// pops on that key. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: DashMap<String, VecDeque<Event>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn append(&self, key: &str, event: &Event) -> Result<(), ServerError> {
        self.queues
            .entry(key.to_string())
            .or_default()
            .push_back(event.clone());
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<Event>, ServerError> {
        Ok(self
            .queues
            .get_mut(key)
            .and_then(|mut queue| queue.pop_front()))
    }

    async fn len(&self, key: &str) -> Result<usize, ServerError> {
        Ok(self.queues.get(key).map_or(0, |queue| queue.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_transport_core::JsonMap;

    #[tokio::test]
    async fn test_fifo_order() {
        let store = MemoryQueueStore::new();
        for name in ["a", "b", "c"] {
            store.append("k", &Event::new(name, JsonMap::new())).await.unwrap();
        }
        assert_eq!(store.len("k").await.unwrap(), 3);

        for name in ["a", "b", "c"] {
            let event = store.pop_front("k").await.unwrap().unwrap();
            assert_eq!(event.event_type, name);
        }
        assert!(store.pop_front("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let store = MemoryQueueStore::new();
        assert!(store.pop_front("nothing").await.unwrap().is_none());
        assert_eq!(store.len("nothing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryQueueStore::new();
        store.append("one", &Event::new("x", JsonMap::new())).await.unwrap();
        assert!(store.pop_front("two").await.unwrap().is_none());
        assert_eq!(store.len("one").await.unwrap(), 1);
    }
}
