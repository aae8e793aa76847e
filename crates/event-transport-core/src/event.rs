//! The event model shared by every transport.
//!
//! An [`Event`] is a `{ "type": <string>, "data": <object> }` record. The
//! `done` type is terminal and carries the producer's final payload. Polling
//! consumers additionally see two synthetic replies, `empty` and `timeout`,
//! which are never stored: they are modelled as [`PollReply`] variants rather
//! than as events.

use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::JsonValue;

/// JSON object used as event data and final payloads.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Event type of the terminal event.
pub const DONE: &str = "done";
/// Reply type of a long poll that saw no event before its deadline.
pub const TIMEOUT: &str = "timeout";
/// Reply type of a short poll against an empty queue.
pub const EMPTY: &str = "empty";
/// Message type of a WebSocket keep-alive comment.
pub const COMMENT: &str = "comment";

/// One event of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Application-defined tag such as `token` or `meta`, or `done`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: JsonMap,
}

impl Event {
    /// Creates an event of the given type.
    pub fn new(event_type: impl Into<String>, data: JsonMap) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Creates the terminal event carrying `payload`.
    pub fn done(payload: JsonMap) -> Self {
        Self::new(DONE, payload)
    }

    /// Creates a WebSocket comment message.
    pub fn comment(text: impl Into<String>) -> Self {
        let mut data = JsonMap::new();
        data.insert("text".to_string(), JsonValue::String(text.into()));
        Self::new(COMMENT, data)
    }

    /// Whether this is the terminal event.
    pub fn is_done(&self) -> bool {
        self.event_type == DONE
    }
}

/// The answer of one poll request.
///
/// Serializes to the popped event verbatim, or to `{"type":"empty"}` /
/// `{"type":"timeout"}` for the two sentinels.
#[derive(Debug, Clone, PartialEq)]
pub enum PollReply {
    /// An event popped from the queue.
    Event(Event),
    /// The queue was empty (short polling).
    Empty,
    /// Nothing arrived before the deadline (long polling).
    Timeout,
}

impl PollReply {
    /// Returns the event, if this reply carries one.
    pub fn into_event(self) -> Option<Event> {
        match self {
            PollReply::Event(event) => Some(event),
            PollReply::Empty | PollReply::Timeout => None,
        }
    }

    /// Wire type of the reply.
    pub fn reply_type(&self) -> &str {
        match self {
            PollReply::Event(event) => &event.event_type,
            PollReply::Empty => EMPTY,
            PollReply::Timeout => TIMEOUT,
        }
    }
}

impl From<Option<Event>> for PollReply {
    fn from(event: Option<Event>) -> Self {
        event.map_or(PollReply::Empty, PollReply::Event)
    }
}

impl Serialize for PollReply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PollReply::Event(event) => event.serialize(serializer),
            PollReply::Empty | PollReply::Timeout => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("type", self.reply_type())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for PollReply {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let event = Event::deserialize(deserializer)?;
        match event.event_type.as_str() {
            EMPTY => Ok(PollReply::Empty),
            TIMEOUT => Ok(PollReply::Timeout),
            "" => Err(D::Error::custom("event type must not be empty")),
            _ => Ok(PollReply::Event(event)),
        }
    }
}

/// Body of a single-shot response: every buffered event plus the final payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedPayload {
    /// Always `done`.
    #[serde(rename = "type")]
    pub payload_type: String,
    /// Events in push order.
    pub events: Vec<Event>,
    /// The final payload passed to `finish`.
    pub data: JsonMap,
}

impl CombinedPayload {
    /// Builds the combined payload from buffered events.
    pub fn new(events: Vec<Event>, data: JsonMap) -> Self {
        Self {
            payload_type: DONE.to_string(),
            events,
            data,
        }
    }
}

/// Builds a [`JsonMap`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty map.
pub fn json_map(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}
