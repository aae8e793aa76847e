//! POST-SSE hand-off records.
//!
//! `EventSource` can only issue GET requests. To stream the answer to a POST
//! the client first stores `{endpoint, payload}` here and receives an id,
//! then opens an event source on a URL carrying that id. The stream route
//! takes the record exactly once and replays the POST upstream.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use event_transport_core::{JsonMap, JsonValue};
use uuid::Uuid;

/// Default lifetime of an unclaimed record.
pub const DEFAULT_HANDOFF_TTL: Duration = Duration::from_secs(300);

/// A stored POST waiting to be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffEntry {
    pub endpoint: String,
    pub payload: JsonMap,
    created: Instant,
}

/// Why a hand-off request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffRejection {
    #[error("Invalid JSON payload")]
    InvalidJson,

    #[error("Missing endpoint or payload")]
    MissingFields,
}

/// Validates a raw hand-off request body.
///
/// The body must be a JSON object with a non-blank `endpoint`; `payload`
/// defaults to `{}` but must be an object when present.
pub fn parse_request(body: &[u8]) -> Result<(String, JsonMap), HandoffRejection> {
    let value: JsonValue =
        serde_json::from_slice(body).map_err(|_| HandoffRejection::InvalidJson)?;
    let JsonValue::Object(mut fields) = value else {
        return Err(HandoffRejection::InvalidJson);
    };

    let endpoint = fields
        .get("endpoint")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let payload = match fields.remove("payload") {
        None | Some(JsonValue::Null) => JsonMap::new(),
        Some(JsonValue::Object(map)) => map,
        Some(_) => return Err(HandoffRejection::MissingFields),
    };
    if endpoint.is_empty() {
        return Err(HandoffRejection::MissingFields);
    }
    Ok((endpoint, payload))
}

/// Single-use records keyed by random id.
#[derive(Debug)]
pub struct HandoffStore {
    entries: DashMap<String, HandoffEntry>,
    ttl: Duration,
}

impl Default for HandoffStore {
    fn default() -> Self {
        Self::new(DEFAULT_HANDOFF_TTL)
    }
}

impl HandoffStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Stores a record and returns its id (32 hex characters).
    pub fn put(&self, endpoint: impl Into<String>, payload: JsonMap) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.entries.insert(
            id.clone(),
            HandoffEntry {
                endpoint: endpoint.into(),
                payload,
                created: Instant::now(),
            },
        );
        id
    }

    /// Removes and returns the record, unless it is unknown or expired.
    /// Expired records are discarded on the way.
    pub fn take(&self, id: &str) -> Option<HandoffEntry> {
        let (_, entry) = self.entries.remove(id)?;
        if entry.created.elapsed() > self.ttl {
            log::debug!("Hand-off {} expired", id);
            return None;
        }
        Some(entry)
    }

    /// Drops every expired record. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_transport_core::event::json_map;
    use serde_json::json;

    #[test]
    fn test_take_is_single_use() {
        let store = HandoffStore::default();
        let id = store.put("/event/sse", json_map(json!({"prompt": "hi"})));
        assert_eq!(id.len(), 32);

        let entry = store.take(&id).unwrap();
        assert_eq!(entry.endpoint, "/event/sse");
        assert_eq!(entry.payload, json_map(json!({"prompt": "hi"})));
        assert!(store.take(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_id() {
        let store = HandoffStore::default();
        assert!(store.take("nope").is_none());
    }

    #[test]
    fn test_expired_entries() {
        let store = HandoffStore::new(Duration::ZERO);
        let id = store.put("/x", JsonMap::new());
        std::thread::sleep(Duration::from_millis(2));
        assert!(store.take(&id).is_none());

        store.put("/y", JsonMap::new());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_parse_request() {
        let (endpoint, payload) =
            parse_request(br#"{"endpoint":" /event/sse ","payload":{"a":1}}"#).unwrap();
        assert_eq!(endpoint, "/event/sse");
        assert_eq!(payload, json_map(json!({"a": 1})));

        let (_, payload) = parse_request(br#"{"endpoint":"/e"}"#).unwrap();
        assert!(payload.is_empty());

        assert_eq!(parse_request(b"not json"), Err(HandoffRejection::InvalidJson));
        assert_eq!(parse_request(b"[1,2]"), Err(HandoffRejection::InvalidJson));
        assert_eq!(
            parse_request(br#"{"payload":{}}"#),
            Err(HandoffRejection::MissingFields)
        );
        assert_eq!(
            parse_request(br#"{"endpoint":"/e","payload":"text"}"#),
            Err(HandoffRejection::MissingFields)
        );
    }
}
