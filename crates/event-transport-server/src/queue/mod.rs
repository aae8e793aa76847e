//! Durable per-stream event queues backing the polling engines.
//!
//! A queue is an ordered list of [`Event`]s stored under a key derived from a
//! [`StreamIdentity`]. It has no lifecycle of its own: a missing record reads
//! as an empty queue, the first append materializes it, and the consumer
//! drains it. Every `append` and `pop_front` is one read-modify-write cycle
//! under an exclusive per-key lock, so a producer appending while a consumer
//! pops never loses, reorders or duplicates events.
//!
//! Two stores are provided:
//!
//! - [`FileQueueStore`] - one JSON file per key, survives server restarts
//! - [`MemoryQueueStore`] - a concurrent map for single-process deployments and tests

pub mod file;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use event_transport_core::{Event, StreamIdentity, TransportMode};

use crate::error::ServerError;

pub use file::FileQueueStore;
pub use memory::MemoryQueueStore;

/// Keyed FIFO store with atomic append and pop.
#[async_trait]
pub trait QueueStore: Send + Sync + fmt::Debug {
    /// Appends `event` to the queue under `key`, creating it if absent.
    async fn append(&self, key: &str, event: &Event) -> Result<(), ServerError>;

    /// Removes and returns the oldest event, or `None` when the queue is empty.
    async fn pop_front(&self, key: &str) -> Result<Option<Event>, ServerError>;

    /// Number of events waiting under `key`.
    async fn len(&self, key: &str) -> Result<usize, ServerError>;
}

/// Key under which the queue of `identity` is stored for a polling `mode`.
///
/// Short and long polling keep separate namespaces so a stream restarted in
/// another mode never drains a stale queue of the first.
pub fn queue_key(mode: TransportMode, identity: &StreamIdentity) -> String {
    let prefix = match mode {
        TransportMode::Long => "evq_long_",
        _ => "evq_",
    };
    format!("{}{}", prefix, identity.storage_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_transport_core::event::json_map;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_queue_key_namespaces() {
        let identity = StreamIdentity::new("svc/with spaces", "stream#1");
        assert_eq!(
            queue_key(TransportMode::Short, &identity),
            "evq_svc_with_spaces_stream_1"
        );
        assert_eq!(
            queue_key(TransportMode::Long, &identity),
            "evq_long_svc_with_spaces_stream_1"
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(u32),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u32>().prop_map(Op::Append), Just(Op::Pop)]
    }

    /// Replays `ops` against `store` and a `VecDeque` model.
    async fn check_against_model(store: &dyn QueueStore, ops: &[Op]) {
        let mut model = std::collections::VecDeque::new();
        for op in ops {
            match op {
                Op::Append(n) => {
                    let event = Event::new("n", json_map(json!({ "n": n })));
                    store.append("k", &event).await.unwrap();
                    model.push_back(event);
                }
                Op::Pop => {
                    assert_eq!(store.pop_front("k").await.unwrap(), model.pop_front());
                }
            }
            assert_eq!(store.len("k").await.unwrap(), model.len());
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_memory_store_is_fifo(ops in prop::collection::vec(op(), 0..40)) {
            runtime().block_on(check_against_model(&MemoryQueueStore::new(), &ops));
        }

        #[test]
        fn prop_file_store_is_fifo(ops in prop::collection::vec(op(), 0..40)) {
            let dir = tempfile::TempDir::new().unwrap();
            let store = FileQueueStore::new(dir.path()).unwrap();
            runtime().block_on(check_against_model(&store, &ops));
        }
    }
}
