//! Server-Sent Events engine.
//!
//! The producer writes pre-formatted frames into a bounded channel whose
//! receiver is the body of the held-open HTTP response:
//!
//! - [`SseEventStream`] - the producer side, used through [`EventStream`]
//! - [`SseBody`] - converted into the axum response returned to the client
//!
//! When the client goes away axum drops the body, the receiver closes and
//! the producer observes [`EventStream::is_disconnected`].
//!
//! # Example
//!
//! ```rust,ignore
//! async fn events() -> impl IntoResponse {
//!     let mut stream = SseEventStream::new(SseConfig::default());
//!     let body = stream.take_body().expect("fresh stream");
//!
//!     tokio::spawn(async move {
//!         stream.push("token", json_map(json!({"t": "hi"}))).await.ok();
//!         stream.finish(JsonMap::new()).await.ok();
//!     });
//!
//!     body.into_response()
//! }
//! ```

use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use event_transport_core::event::DONE;
use event_transport_core::JsonMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ServerError;
use crate::producer::{EventStream, StreamState};

/// Default number of frames buffered between producer and response body.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default size of a padding comment.
pub const DEFAULT_PADDING_BYTES: usize = 2048;

/// Tuning for SSE output.
///
/// Some proxies hold back small responses until a buffer fills; padding
/// comments push frames through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseConfig {
    /// Emit a padding comment right after the initial frame.
    pub initial_padding: bool,
    /// Emit a padding comment after every N events. Zero disables it.
    pub padding_every: usize,
    /// Size in bytes of each padding comment.
    pub padding_bytes: usize,
    /// Capacity of the frame channel.
    pub channel_capacity: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            initial_padding: false,
            padding_every: 0,
            padding_bytes: DEFAULT_PADDING_BYTES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Producer side of an SSE response.
#[derive(Debug)]
pub struct SseEventStream {
    state: StreamState,
    config: SseConfig,
    sender: Option<mpsc::Sender<Bytes>>,
    body: Option<SseBody>,
    peer_gone: bool,
    pushed: usize,
}

impl SseEventStream {
    pub fn new(config: SseConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            state: StreamState::default(),
            config,
            sender: Some(tx),
            body: Some(SseBody { receiver: rx }),
            peer_gone: false,
            pushed: 0,
        }
    }

    /// Takes the response body. Must happen before the first write: a body
    /// still held by the stream at `start` is discarded and the stream then
    /// reports itself disconnected.
    pub fn take_body(&mut self) -> Option<SseBody> {
        self.body.take()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    async fn write(&mut self, frame: String) {
        if self.is_disconnected() {
            return;
        }
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(Bytes::from(frame)).await.is_err() {
            log::debug!("SSE client went away");
            self.peer_gone = true;
        }
    }

    async fn ensure_started(&mut self) {
        if !self.state.begin() {
            return;
        }
        if self.body.take().is_some() {
            log::warn!("SSE stream started without a response body attached");
            self.peer_gone = true;
            return;
        }
        self.write("\n".to_string()).await;
        if self.config.initial_padding {
            self.write(padding_frame(self.config.padding_bytes)).await;
        }
    }
}

#[async_trait]
impl EventStream for SseEventStream {
    async fn start(&mut self) -> Result<(), ServerError> {
        self.ensure_started().await;
        Ok(())
    }

    async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError> {
        if self.state.is_finished() {
            return Ok(());
        }
        self.ensure_started().await;
        if self.is_disconnected() {
            return Ok(());
        }

        self.write(format_sse_event(event_type, &data)?).await;
        self.pushed += 1;
        if self.config.padding_every > 0 && self.pushed % self.config.padding_every == 0 {
            self.write(padding_frame(self.config.padding_bytes)).await;
        }
        Ok(())
    }

    async fn send_comment(&mut self, text: &str) -> Result<(), ServerError> {
        if self.state.is_finished() {
            return Ok(());
        }
        self.ensure_started().await;
        self.write(format_sse_comment(text)).await;
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.peer_gone || self.sender.as_ref().is_none_or(|s| s.is_closed())
    }

    async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError> {
        if !self.state.end() {
            return Ok(());
        }
        self.ensure_started().await;
        if !self.is_disconnected() {
            self.write(format_sse_event(DONE, &final_payload)?).await;
        }
        // Dropping the sender ends the response body.
        self.sender = None;
        Ok(())
    }
}

/// Receiving side of an SSE stream, returned to the client as the response.
#[derive(Debug)]
pub struct SseBody {
    receiver: mpsc::Receiver<Bytes>,
}

impl IntoResponse for SseBody {
    /// Streams the frames as a `text/event-stream` response that ends when
    /// the producer finishes or is dropped.
    fn into_response(self) -> Response {
        let stream = ReceiverStream::new(self.receiver).map(Ok::<_, Infallible>);
        let mut response = Body::from_stream(stream).into_response();

        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        response
    }
}

/// Formats one named event: `event: <type>\ndata: <json>\n\n`.
pub fn format_sse_event(event_type: &str, data: &JsonMap) -> Result<String, ServerError> {
    let json = serde_json::to_string(data)?;
    Ok(format!("event: {}\ndata: {}\n\n", event_type, json))
}

/// Formats a comment frame. Line breaks would end the comment early, so they
/// are replaced by spaces.
pub fn format_sse_comment(text: &str) -> String {
    let text: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!(": {}\n\n", text)
}

fn padding_frame(bytes: usize) -> String {
    format!(":{}\n\n", " ".repeat(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_transport_core::event::json_map;
    use serde_json::json;

    async fn drain(mut body: SseBody) -> String {
        let mut out = String::new();
        while let Some(frame) = body.receiver.recv().await {
            out.push_str(std::str::from_utf8(&frame).unwrap());
        }
        out
    }

    fn attached() -> (SseEventStream, SseBody) {
        let mut stream = SseEventStream::new(SseConfig::default());
        let body = stream.take_body().unwrap();
        (stream, body)
    }

    #[tokio::test]
    async fn test_start_writes_single_newline_once() {
        let (mut stream, body) = attached();
        stream.start().await.unwrap();
        stream.start().await.unwrap();
        drop(stream);

        assert_eq!(drain(body).await, "\n");
    }

    #[tokio::test]
    async fn test_push_starts_and_writes_named_event() {
        let (mut stream, body) = attached();
        stream.push("my_event", json_map(json!({"a": 1}))).await.unwrap();
        drop(stream);

        assert_eq!(drain(body).await, "\nevent: my_event\ndata: {\"a\":1}\n\n");
    }

    #[tokio::test]
    async fn test_comment_frame() {
        let (mut stream, body) = attached();
        stream.send_comment("hello\nworld").await.unwrap();
        drop(stream);

        assert_eq!(drain(body).await, "\n: hello world\n\n");
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_and_blocks_later_output() {
        let (mut stream, body) = attached();
        stream.finish(json_map(json!({"ok": true}))).await.unwrap();
        stream.finish(json_map(json!({"ok": false}))).await.unwrap();
        stream.push("later", json_map(json!({"x": 1}))).await.unwrap();
        stream.send_comment("later").await.unwrap();

        // The body ends after finish even though the stream is still alive.
        assert_eq!(drain(body).await, "\nevent: done\ndata: {\"ok\":true}\n\n");
        assert!(stream.state().is_finished());
    }

    #[tokio::test]
    async fn test_dropped_body_is_disconnect() {
        let (mut stream, body) = attached();
        assert!(!stream.is_disconnected());
        drop(body);

        assert!(stream.is_disconnected());
        // Writes after the client left are silent.
        stream.push("token", JsonMap::new()).await.unwrap();
        stream.finish(JsonMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unattached_body_counts_as_disconnected() {
        let mut stream = SseEventStream::new(SseConfig::default());
        stream.push("token", JsonMap::new()).await.unwrap();
        assert!(stream.is_disconnected());
        assert!(stream.take_body().is_none());
    }

    #[tokio::test]
    async fn test_padding_every_n_events() {
        let config = SseConfig {
            initial_padding: true,
            padding_every: 2,
            padding_bytes: 4,
            ..SseConfig::default()
        };
        let mut stream = SseEventStream::new(config);
        let body = stream.take_body().unwrap();
        for _ in 0..3 {
            stream.push("t", JsonMap::new()).await.unwrap();
        }
        drop(stream);

        let pad = ":    \n\n";
        let event = "event: t\ndata: {}\n\n";
        assert_eq!(
            drain(body).await,
            format!("\n{pad}{event}{event}{pad}{event}")
        );
    }

    #[test]
    fn test_response_headers() {
        let mut stream = SseEventStream::new(SseConfig::default());
        let response = stream.take_body().unwrap().into_response();
        let headers = response.headers();

        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "keep-alive");
    }
}
