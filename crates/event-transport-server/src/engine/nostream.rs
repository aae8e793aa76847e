//! Single-shot delivery: everything in one response.
//!
//! Works behind any proxy. The client sees nothing until the producer
//! finishes, then receives one `{"type":"done","events":[..],"data":..}`
//! document.

use async_trait::async_trait;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use event_transport_core::{CombinedPayload, Event, JsonMap};

use crate::error::ServerError;
use crate::producer::{EventStream, StreamState};

/// Buffers pushed events until `finish`.
#[derive(Debug, Default)]
pub struct NoStreamEventStream {
    state: StreamState,
    events: Vec<Event>,
    output: Option<CombinedPayload>,
}

impl NoStreamEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Events buffered so far.
    pub fn buffered(&self) -> &[Event] {
        &self.events
    }

    /// The combined payload, once `finish` has run. Can be taken once.
    pub fn take_output(&mut self) -> Option<CombinedPayload> {
        self.output.take()
    }
}

#[async_trait]
impl EventStream for NoStreamEventStream {
    async fn start(&mut self) -> Result<(), ServerError> {
        self.state.begin();
        Ok(())
    }

    async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError> {
        if self.state.is_finished() {
            return Ok(());
        }
        self.state.begin();
        self.events.push(Event::new(event_type, data));
        Ok(())
    }

    async fn send_comment(&mut self, _text: &str) -> Result<(), ServerError> {
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        false
    }

    async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError> {
        if !self.state.end() {
            return Ok(());
        }
        self.state.begin();
        let events = std::mem::take(&mut self.events);
        self.output = Some(CombinedPayload::new(events, final_payload));
        Ok(())
    }
}

/// HTTP response carrying a combined payload.
#[derive(Debug)]
pub struct SingleShotResponse(pub CombinedPayload);

impl IntoResponse for SingleShotResponse {
    fn into_response(self) -> Response {
        (
            [(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")],
            Json(self.0),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_transport_core::event::json_map;
    use serde_json::json;

    #[tokio::test]
    async fn test_combines_events_and_payload() {
        let mut stream = NoStreamEventStream::new();
        stream.push("token", json_map(json!({"t": "He"}))).await.unwrap();
        stream.push("token", json_map(json!({"t": "llo"}))).await.unwrap();
        assert!(stream.take_output().is_none());

        stream.finish(json_map(json!({"n": 2}))).await.unwrap();

        let output = serde_json::to_value(stream.take_output().unwrap()).unwrap();
        assert_eq!(
            output,
            json!({
                "type": "done",
                "events": [
                    {"type": "token", "data": {"t": "He"}},
                    {"type": "token", "data": {"t": "llo"}}
                ],
                "data": {"n": 2}
            })
        );
    }

    #[tokio::test]
    async fn test_second_finish_and_late_push_are_ignored() {
        let mut stream = NoStreamEventStream::new();
        stream.finish(json_map(json!({"first": true}))).await.unwrap();
        stream.push("token", JsonMap::new()).await.unwrap();
        stream.finish(json_map(json!({"first": false}))).await.unwrap();

        let output = stream.take_output().unwrap();
        assert!(output.events.is_empty());
        assert_eq!(output.data, json_map(json!({"first": true})));
        assert!(stream.take_output().is_none());
    }

    #[tokio::test]
    async fn test_never_disconnected() {
        let mut stream = NoStreamEventStream::new();
        stream.send_comment("ping").await.unwrap();
        assert!(!stream.is_disconnected());
        assert!(stream.buffered().is_empty());
    }

    #[test]
    fn test_response_disables_caching() {
        let response = SingleShotResponse(CombinedPayload::new(Vec::new(), JsonMap::new()))
            .into_response();
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
