//! Client channels: the consuming side of every transport.
//!
//! [`TransportResolver`] negotiates a mode with the same fallback algorithm
//! the server factory uses, and the resulting [`Channel`] drives the matching
//! request pattern, reporting through [`Callbacks`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ChannelConfig::new("http://127.0.0.1:8787/event")
//!     .with_mode("sse")
//!     .with_fallback_modes(["short", "nostream"]);
//! let channel = TransportResolver::create_channel(
//!     &config,
//!     ClientCapabilities::default(),
//!     StreamIdentity::new("echo", "s1"),
//! );
//! let handle = channel.connect(
//!     json_map(json!({"prompt": "hello"})),
//!     Callbacks::new(|msg| println!("{}", msg)).on_error(|e| eprintln!("{}", e)),
//! );
//! handle.finished().await;
//! ```

pub mod long_poll;
pub mod nostream;
pub mod short_poll;
pub mod sse;
pub mod ws;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use event_transport_server::{JsonMap, JsonValue, StreamIdentity, TransportConfig, TransportMode};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// Default pause between two short polls.
pub const DEFAULT_SHORT_POLL_INTERVAL: Duration = Duration::from_millis(120);

/// Where and how a client reaches the event endpoints.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Preferred mode
    pub mode: String,
    /// Modes to try after the preferred one
    pub fallback_modes: Vec<String>,
    pub auto_fallback: bool,
    /// Prefix of every HTTP endpoint, e.g. `http://host/event`
    pub base_http_url: String,
    /// Path appended to `base_http_url` per mode
    pub endpoints: HashMap<TransportMode, String>,
    /// WebSocket endpoint; `ws` is unavailable without one
    pub web_socket_url: Option<String>,
    pub short_poll_interval: Duration,
}

impl ChannelConfig {
    pub fn new(base_http_url: impl Into<String>) -> Self {
        let endpoints = [
            TransportMode::NoStream,
            TransportMode::Short,
            TransportMode::Long,
            TransportMode::Sse,
        ]
        .into_iter()
        .map(|mode| (mode, format!("/{}", mode)))
        .collect();

        Self {
            mode: TransportMode::NoStream.to_string(),
            fallback_modes: vec![
                TransportMode::Short.to_string(),
                TransportMode::Long.to_string(),
                TransportMode::NoStream.to_string(),
            ],
            auto_fallback: true,
            base_http_url: base_http_url.into().trim_end_matches('/').to_string(),
            endpoints,
            web_socket_url: None,
            short_poll_interval: DEFAULT_SHORT_POLL_INTERVAL,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_fallback_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_modes = modes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = enabled;
        self
    }

    pub fn with_web_socket_url(mut self, url: impl Into<String>) -> Self {
        self.web_socket_url = Some(url.into());
        self
    }

    pub fn with_short_poll_interval(mut self, interval: Duration) -> Self {
        self.short_poll_interval = interval;
        self
    }

    /// Endpoint URL of `mode` for `identity`.
    pub fn http_url(&self, mode: TransportMode, identity: &StreamIdentity) -> String {
        let path = self.endpoints.get(&mode).map(String::as_str).unwrap_or_default();
        format!(
            "{}{}?{}",
            self.base_http_url,
            path,
            stream_params(identity)
        )
    }

    /// WebSocket URL for `identity`, if one is configured.
    pub fn socket_url(&self, identity: &StreamIdentity) -> Option<String> {
        self.web_socket_url
            .as_ref()
            .map(|url| format!("{}?{}", url, stream_params(identity)))
    }

    fn negotiation(&self) -> TransportConfig {
        TransportConfig::new(self.mode.clone())
            .with_fallback_order(self.fallback_modes.iter().cloned())
            .with_auto_fallback(self.auto_fallback)
    }
}

fn stream_params(identity: &StreamIdentity) -> String {
    format!(
        "service={}&stream={}",
        urlencoding::encode(identity.service()),
        urlencoding::encode(identity.stream_id())
    )
}

/// What the client runtime can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// Can consume `text/event-stream` responses
    pub event_source: bool,
    /// Can open WebSocket connections
    pub web_socket: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            event_source: true,
            web_socket: true,
        }
    }
}

type OpenFn = Box<dyn FnMut(TransportMode) + Send>;
type MessageFn = Box<dyn FnMut(JsonValue) + Send>;
type ErrorFn = Box<dyn FnMut(&AppError) + Send>;

/// Open, message and error notifications of a channel.
pub struct Callbacks {
    open: Option<OpenFn>,
    message: MessageFn,
    error: Option<ErrorFn>,
}

impl Callbacks {
    pub fn new(on_message: impl FnMut(JsonValue) + Send + 'static) -> Self {
        Self {
            open: None,
            message: Box::new(on_message),
            error: None,
        }
    }

    pub fn on_open(mut self, f: impl FnMut(TransportMode) + Send + 'static) -> Self {
        self.open = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&AppError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub(crate) fn opened(&mut self, mode: TransportMode) {
        if let Some(f) = self.open.as_mut() {
            f(mode);
        }
    }

    pub(crate) fn message(&mut self, message: JsonValue) {
        (self.message)(message);
    }

    pub(crate) fn failed(&mut self, error: &AppError) {
        match self.error.as_mut() {
            Some(f) => f(error),
            None => log::warn!("Channel error: {}", error),
        }
    }
}

/// Picks a channel for a configuration.
pub struct TransportResolver;

impl TransportResolver {
    /// Negotiates a mode and builds the channel for `identity`.
    ///
    /// Single-shot is the last resort when no candidate is available.
    pub fn create_channel(
        config: &ChannelConfig,
        capabilities: ClientCapabilities,
        identity: StreamIdentity,
    ) -> Channel {
        let resolution = config.negotiation().negotiate(
            |mode| Self::available(mode, config, capabilities).then_some(mode),
            || TransportMode::NoStream,
        );
        log::debug!(
            "Client channel for {} uses '{}'{}",
            identity,
            resolution.mode,
            if resolution.fell_back { " (fallback)" } else { "" }
        );

        Channel {
            mode: resolution.value,
            config: Arc::new(config.clone()),
            identity,
            http: reqwest::Client::new(),
        }
    }

    fn available(mode: TransportMode, config: &ChannelConfig, capabilities: ClientCapabilities) -> bool {
        match mode {
            TransportMode::NoStream | TransportMode::Short | TransportMode::Long => true,
            TransportMode::Sse => capabilities.event_source,
            TransportMode::Ws => capabilities.web_socket && config.web_socket_url.is_some(),
        }
    }
}

/// A negotiated client channel, not yet connected.
#[derive(Debug, Clone)]
pub struct Channel {
    mode: TransportMode,
    config: Arc<ChannelConfig>,
    identity: StreamIdentity,
    http: reqwest::Client,
}

impl Channel {
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Starts the stream with `payload` and delivers its messages on a
    /// background task.
    pub fn connect(self, payload: JsonMap, mut callbacks: Callbacks) -> ChannelHandle {
        let (close_tx, close_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ctx = ChannelContext {
                http: self.http.clone(),
                config: Arc::clone(&self.config),
                identity: self.identity.clone(),
                callbacks: &mut callbacks,
                closed: close_rx,
            };
            let result = match self.mode {
                TransportMode::NoStream => nostream::run(&mut ctx, payload).await,
                TransportMode::Short => short_poll::run(&mut ctx, payload).await,
                TransportMode::Long => long_poll::run(&mut ctx, payload).await,
                TransportMode::Sse => sse::run(&mut ctx, payload).await,
                TransportMode::Ws => ws::run(&mut ctx, payload).await,
            };
            if let Err(e) = result {
                ctx.callbacks.failed(&e);
            }
        });
        ChannelHandle { close_tx, task }
    }
}

/// Controls a connected channel.
#[derive(Debug)]
pub struct ChannelHandle {
    close_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Stops the channel's loops. No callbacks fire afterwards except for a
    /// message already being delivered.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the channel has stopped.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            log::warn!("Channel task failed: {}", e);
        }
    }
}

/// State shared by the per-mode loops.
pub(crate) struct ChannelContext<'a> {
    pub(crate) http: reqwest::Client,
    pub(crate) config: Arc<ChannelConfig>,
    pub(crate) identity: StreamIdentity,
    pub(crate) callbacks: &'a mut Callbacks,
    closed: watch::Receiver<bool>,
}

impl ChannelContext<'_> {
    pub(crate) fn url(&self, mode: TransportMode) -> String {
        self.config.http_url(mode, &self.identity)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Runs `fut` unless the channel is closed first.
    pub(crate) async fn unless_closed<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_closed() {
            return None;
        }
        let mut closed = self.closed.clone();
        tokio::select! {
            out = fut => Some(out),
            _ = wait_closed(&mut closed) => None,
        }
    }

    /// Sleeps for `duration`. Returns `false` if the channel closed meanwhile.
    pub(crate) async fn pause(&mut self, duration: Duration) -> bool {
        self.unless_closed(tokio::time::sleep(duration)).await.is_some()
    }

    /// POSTs `payload` as JSON to `url` and returns the successful response.
    pub(crate) async fn post_json(&mut self, url: &str, payload: &JsonMap) -> Result<Option<reqwest::Response>> {
        let request = self.http.post(url).json(payload).send();
        match self.unless_closed(request).await {
            Some(response) => Ok(Some(check_status(response?, url)?)),
            None => Ok(None),
        }
    }

    /// GETs `url` and decodes the JSON reply.
    pub(crate) async fn get_json(&mut self, url: &str) -> Result<Option<JsonValue>> {
        let http = self.http.clone();
        let url_owned = url.to_string();
        let request = async move {
            let response = http
                .get(&url_owned)
                .header(reqwest::header::ACCEPT, "application/json")
                .header(reqwest::header::CACHE_CONTROL, "no-cache")
                .send()
                .await?;
            let response = check_status(response, &url_owned)?;
            Ok::<_, AppError>(response.json::<JsonValue>().await?)
        };
        self.unless_closed(request).await.transpose()
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|closed| *closed).await.is_err() {
        // Handle dropped without closing: run to completion.
        std::future::pending::<()>().await;
    }
}

pub(crate) fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(AppError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

/// Whether a delivered message ends the stream.
pub(crate) fn is_done(message: &JsonValue) -> bool {
    message.get("type").and_then(JsonValue::as_str) == Some(event_transport_server::event::DONE)
}
