//! The five delivery engines.
//!
//! Every engine implements [`EventStream`]. [`TransportStream`] is the tagged
//! union the [`EventStreamFactory`](crate::factory::EventStreamFactory) hands
//! out, so callers never name a concrete engine.

pub mod long_poll;
pub mod nostream;
mod queued;
pub mod short_poll;
pub mod sse;
pub mod ws;

use async_trait::async_trait;
use event_transport_core::{CombinedPayload, JsonMap, TransportMode};

use crate::error::ServerError;
use crate::producer::EventStream;

pub use long_poll::{LongPollingConsumer, LongPollingEventStream};
pub use nostream::{NoStreamEventStream, SingleShotResponse};
pub use short_poll::{ShortPollingConsumer, ShortPollingEventStream};
pub use sse::{SseBody, SseConfig, SseEventStream};
pub use ws::{SocketConnection, WebSocketEventStream};

/// An event stream over whichever mechanism was negotiated.
#[derive(Debug)]
pub enum TransportStream {
    NoStream(NoStreamEventStream),
    ShortPolling(ShortPollingEventStream),
    LongPolling(LongPollingEventStream),
    Sse(SseEventStream),
    WebSocket(WebSocketEventStream),
}

impl TransportStream {
    /// Mechanism carrying this stream.
    pub fn mode(&self) -> TransportMode {
        match self {
            TransportStream::NoStream(_) => TransportMode::NoStream,
            TransportStream::ShortPolling(_) => TransportMode::Short,
            TransportStream::LongPolling(_) => TransportMode::Long,
            TransportStream::Sse(_) => TransportMode::Sse,
            TransportStream::WebSocket(_) => TransportMode::Ws,
        }
    }

    /// Combined payload of a finished single-shot stream.
    pub fn take_output(&mut self) -> Option<CombinedPayload> {
        match self {
            TransportStream::NoStream(stream) => stream.take_output(),
            _ => None,
        }
    }

    /// Response body of an SSE stream, if not yet taken.
    pub fn take_sse_body(&mut self) -> Option<SseBody> {
        match self {
            TransportStream::Sse(stream) => stream.take_body(),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn EventStream {
        match self {
            TransportStream::NoStream(s) => s,
            TransportStream::ShortPolling(s) => s,
            TransportStream::LongPolling(s) => s,
            TransportStream::Sse(s) => s,
            TransportStream::WebSocket(s) => s,
        }
    }

    fn inner_ref(&self) -> &dyn EventStream {
        match self {
            TransportStream::NoStream(s) => s,
            TransportStream::ShortPolling(s) => s,
            TransportStream::LongPolling(s) => s,
            TransportStream::Sse(s) => s,
            TransportStream::WebSocket(s) => s,
        }
    }
}

#[async_trait]
impl EventStream for TransportStream {
    async fn start(&mut self) -> Result<(), ServerError> {
        self.inner().start().await
    }

    async fn push(&mut self, event_type: &str, data: JsonMap) -> Result<(), ServerError> {
        self.inner().push(event_type, data).await
    }

    async fn send_comment(&mut self, text: &str) -> Result<(), ServerError> {
        self.inner().send_comment(text).await
    }

    fn is_disconnected(&self) -> bool {
        self.inner_ref().is_disconnected()
    }

    async fn finish(&mut self, final_payload: JsonMap) -> Result<(), ServerError> {
        self.inner().finish(final_payload).await
    }
}
