//! SSE channel.
//!
//! Browsers open an `EventSource` on `GET ...&prompt=`. This client can POST,
//! so it sends the payload to the SSE endpoint and reads the event stream
//! from the response body. Every named event is delivered as
//! `{"type": <event>, "data": <data>}`; comments are ignored.

use event_transport_server::{JsonMap, JsonValue, TransportMode};
use futures_util::StreamExt;
use serde_json::json;

use super::{check_status, is_done, ChannelContext};
use crate::error::{AppError, Result};

/// Name of the event the server uses to report a failed stream.
const ERROR_EVENT: &str = "error";

pub(crate) async fn run(ctx: &mut ChannelContext<'_>, payload: JsonMap) -> Result<()> {
    let url = ctx.url(TransportMode::Sse);
    let request = ctx
        .http
        .post(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(&payload)
        .send();
    let Some(response) = ctx.unless_closed(request).await else {
        return Ok(());
    };
    let response = check_status(response?, &url)?;

    let is_event_stream = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));
    if !is_event_stream {
        return Err(AppError::Protocol(format!("{} did not answer with an event stream", url)));
    }
    ctx.callbacks.opened(TransportMode::Sse);

    let mut body = response.bytes_stream();
    let mut parser = SseParser::default();
    loop {
        let Some(chunk) = ctx.unless_closed(body.next()).await else {
            return Ok(());
        };
        let Some(chunk) = chunk else {
            return Err(AppError::Protocol("event stream ended before done".to_string()));
        };
        for frame in parser.feed(&chunk?) {
            let data: JsonValue = serde_json::from_str(&frame.data)
                .map_err(|e| AppError::Protocol(format!("bad data in '{}' event: {}", frame.event, e)))?;
            if frame.event == ERROR_EVENT {
                return Err(AppError::Protocol(format!("server reported: {}", data)));
            }
            let message = json!({ "type": frame.event, "data": data });
            let done = is_done(&message);
            ctx.callbacks.message(message);
            if done {
                return Ok(());
            }
        }
    }
}

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Accepts arbitrary chunk boundaries and `\n`, `\r\n` or `\r` line endings.
/// Events without data are not dispatched, an event without a name is
/// `message`, and `id`/`retry` fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data: Option<String>,
    /// A `\r` ended the previous chunk; a leading `\n` belongs to it.
    pending_cr: bool,
}

impl SseParser {
    /// Feeds a chunk and returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        let mut bytes = chunk;
        if self.pending_cr && bytes.first() == Some(&b'\n') {
            bytes = &bytes[1..];
        }
        self.pending_cr = false;

        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'\n' || b == b'\r' {
                self.buffer.extend_from_slice(&bytes[start..i]);
                let line = String::from_utf8_lossy(&self.buffer).into_owned();
                self.buffer.clear();
                if let Some(frame) = self.line(&line) {
                    frames.push(frame);
                }
                if b == b'\r' {
                    if i + 1 == bytes.len() {
                        self.pending_cr = true;
                    } else if bytes[i + 1] == b'\n' {
                        i += 1;
                    }
                }
                start = i + 1;
            }
            i += 1;
        }
        self.buffer.extend_from_slice(&bytes[start.min(bytes.len())..]);
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let data = self.data.take();
            let event = std::mem::take(&mut self.event);
            return data.map(|data| SseFrame {
                event: if event.is_empty() { "message".to_string() } else { event },
                data,
            });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            _ => {}
        }
        None
    }
}
