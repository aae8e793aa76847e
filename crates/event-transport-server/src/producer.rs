//! The producer-side lifecycle contract shared by every engine.
//!
//! Application code obtains a stream from the
//! [`EventStreamFactory`](crate::factory::EventStreamFactory), calls
//! [`EventStream::push`] any number of times and [`EventStream::finish`]
//! exactly once. Which mechanism carries the events is invisible to it.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut stream = factory.create_stream("chat", &stream_id);
//! stream.push("token", json_map(json!({"t": "He"}))).await?;
//! stream.push("token", json_map(json!({"t": "llo"}))).await?;
//! stream.finish(json_map(json!({"n": 2}))).await?;
//! ```

use async_trait::async_trait;
use event_transport_core::JsonMap;

use crate::error::ServerError;

/// Lifecycle of one outgoing event stream.
///
/// Every engine follows the same rules:
///
/// - [`start`](Self::start) is idempotent and runs implicitly before the first
///   `push`, `send_comment` or `finish`.
/// - After [`finish`](Self::finish), `push` and `send_comment` are silent
///   no-ops and a second `finish` does nothing.
/// - Errors are only returned when events could not be stored; a lost client
///   connection is never an error.
#[async_trait]
pub trait EventStream: Send {
    /// Performs one-time setup before any output.
    async fn start(&mut self) -> Result<(), ServerError>;

    /// Delivers or stores one event.
    async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError>;

    /// Sends a keep-alive comment where the mechanism supports one.
    async fn send_comment(&mut self, text: &str) -> Result<(), ServerError>;

    /// Best-effort check whether the client has gone away.
    fn is_disconnected(&self) -> bool;

    /// Delivers the terminal `done` event carrying `final_payload`.
    async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError>;
}

/// The monotonic `started` / `finished` flags every engine carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    started: bool,
    finished: bool,
}

impl StreamState {
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Marks the stream started. Returns `true` only for the first call.
    pub fn begin(&mut self) -> bool {
        !std::mem::replace(&mut self.started, true)
    }

    /// Marks the stream finished. Returns `true` only for the first call.
    pub fn end(&mut self) -> bool {
        !std::mem::replace(&mut self.finished, true)
    }
}
