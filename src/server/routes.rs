//! HTTP handlers for the `/event` routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use event_transport_server::handoff::parse_request;
use event_transport_server::{
    json_map, socket, EventStream, JsonMap, JsonValue, SingleShotResponse, SocketConnection,
    SseConfig, SseEventStream, StreamIdentity, TransportMode, TransportStream,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::services::StreamingService;
use super::AppState;

/// `?service=&stream=` of every stream route.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub stream: String,
}

impl StreamQuery {
    fn identity(&self) -> Result<StreamIdentity, String> {
        StreamIdentity::try_new(self.service.as_str(), self.stream.as_str()).map_err(|e| e.to_string())
    }
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "service": "event-transport",
        "default_mode": state.factory.config().default_mode,
        "services": state.services.names(),
    }))
}

pub async fn produce_nostream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    body: Bytes,
) -> Response {
    produce(state, TransportMode::NoStream, query, body).await
}

pub async fn produce_short(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    body: Bytes,
) -> Response {
    produce(state, TransportMode::Short, query, body).await
}

pub async fn produce_long(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    body: Bytes,
) -> Response {
    produce(state, TransportMode::Long, query, body).await
}

pub async fn produce_sse(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    body: Bytes,
) -> Response {
    produce(state, TransportMode::Sse, query, body).await
}

/// `GET /event/sse?service=&stream=&prompt=` for clients that cannot POST.
pub async fn sse_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = StreamQuery {
        service: params.get("service").cloned().unwrap_or_default(),
        stream: params.get("stream").cloned().unwrap_or_default(),
    };
    let mut payload = JsonMap::new();
    if let Some(prompt) = params.get("prompt") {
        payload.insert("prompt".to_string(), JsonValue::String(prompt.clone()));
    }
    start_stream(state, TransportMode::Sse, query, payload).await
}

/// Short-poll consumer: the next event or `{"type":"empty"}`.
pub async fn poll_short(State(state): State<AppState>, Query(query): Query<StreamQuery>) -> Response {
    let identity = match query.identity() {
        Ok(identity) => identity,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e),
    };
    let reply = state.factory.short_poll_consumer(&identity).poll_next().await;
    no_store(Json(reply).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct LongPollQuery {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub stream: String,
    /// Wait bound in seconds, capped at the configured timeout
    pub timeout: Option<u64>,
}

/// Long-poll consumer: the next event, or `{"type":"timeout"}` after the wait bound.
pub async fn poll_long(State(state): State<AppState>, Query(query): Query<LongPollQuery>) -> Response {
    let stream_query = StreamQuery {
        service: query.service,
        stream: query.stream,
    };
    let identity = match stream_query.identity() {
        Ok(identity) => identity,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e),
    };
    let max = state.polling.long_timeout();
    let timeout = query.timeout.map(Duration::from_secs).map_or(max, |t| t.min(max));
    let reply = state
        .factory
        .long_poll_consumer(&identity)
        .wait_next(timeout)
        .await;
    no_store(Json(reply).into_response())
}

async fn produce(state: AppState, requested: TransportMode, query: StreamQuery, body: Bytes) -> Response {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(message) if requested == TransportMode::Sse => return sse_error(&message).await,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };
    start_stream(state, requested, query, payload).await
}

/// Resolves a stream for the request and runs the service on it.
async fn start_stream(
    state: AppState,
    requested: TransportMode,
    query: StreamQuery,
    payload: JsonMap,
) -> Response {
    let checked = query.identity().and_then(|identity| {
        state
            .services
            .get(identity.service())
            .map(|service| (identity, service))
            .ok_or_else(|| format!("Unknown service: {}", query.service))
    });
    let (identity, service) = match checked {
        Ok(found) => found,
        Err(message) if requested == TransportMode::Sse => return sse_error(&message).await,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };

    let resolution = state.factory.create_stream_with_mode(
        requested.as_str(),
        identity.service(),
        identity.stream_id(),
    );
    let mode = resolution.mode;
    let mut stream = resolution.value;
    info!(stream = %identity, mode = %mode, fell_back = resolution.fell_back, "Starting stream");

    match mode {
        TransportMode::NoStream => {
            run_service(service, &mut stream, payload).await;
            match stream.take_output() {
                Some(output) => SingleShotResponse(output).into_response(),
                None => json_error(StatusCode::INTERNAL_SERVER_ERROR, "stream produced no output"),
            }
        }
        TransportMode::Sse => {
            let Some(body) = stream.take_sse_body() else {
                return sse_error("stream body unavailable").await;
            };
            tokio::spawn(async move { run_service(service, &mut stream, payload).await });
            body.into_response()
        }
        TransportMode::Short | TransportMode::Long | TransportMode::Ws => {
            tokio::spawn(async move { run_service(service, &mut stream, payload).await });
            Json(json!({ "ok": true, "mode": mode })).into_response()
        }
    }
}

/// Runs `service`, making sure the stream ends with a `done` event.
///
/// A service that returns without finishing gets an empty final payload;
/// a failed one gets `{"error":..}`.
async fn run_service(service: Arc<dyn StreamingService>, stream: &mut TransportStream, payload: JsonMap) {
    let final_payload = match service.run(stream, payload).await {
        Ok(()) => JsonMap::new(),
        Err(e) => {
            warn!(mode = %stream.mode(), "Streaming service failed: {}", e);
            json_map(json!({ "error": e.to_string() }))
        }
    };
    if let Err(e) = stream.finish(final_payload).await {
        warn!("Could not finish stream: {}", e);
    }
}

/// Empty bodies are `{}`; anything else must be a JSON object.
fn parse_payload(body: &[u8]) -> Result<JsonMap, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonMap::new());
    }
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err("Payload must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid JSON payload: {}", e)),
    }
}

/// WebSocket endpoint. The socket is registered for its stream identity
/// and the producer starts on the client's `init` message.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let identity = match query.identity() {
        Ok(identity) => identity,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e),
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, state, identity))
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: JsonMap,
}

async fn handle_websocket(socket: WebSocket, state: AppState, identity: StreamIdentity) {
    let (connection, handler) = socket::channel(state.ws.clone());
    state.connections.register(identity.clone(), connection.clone());
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();

    let dispatcher = {
        let state = state.clone();
        let identity = identity.clone();
        tokio::spawn(async move {
            while let Some(text) = inbound_rx.recv().await {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) if message.message_type == "init" => {
                        debug!(stream = %identity, "Received init over WebSocket");
                        start_socket_stream(&state, &identity, &connection, message.payload);
                    }
                    Ok(message) => debug!("Ignoring WebSocket message '{}'", message.message_type),
                    Err(e) => warn!("Failed to parse WebSocket message: {}", e),
                }
            }
        })
    };

    handler.serve(socket, inbound_tx).await;
    state.connections.unregister(&identity);
    // The dispatcher ends once the inbound sender is gone; a running
    // producer notices the closed connection on its own.
    let _ = dispatcher.await;
}

fn start_socket_stream(
    state: &AppState,
    identity: &StreamIdentity,
    connection: &socket::WsConnection,
    payload: JsonMap,
) {
    let Some(service) = state.services.get(identity.service()) else {
        let frame = json!({
            "type": "error",
            "data": { "error": format!("Unknown service: {}", identity.service()) }
        });
        let _ = connection.send_text(frame.to_string());
        return;
    };
    let resolution = state.factory.create_stream_with_mode(
        TransportMode::Ws.as_str(),
        identity.service(),
        identity.stream_id(),
    );
    let mut stream = resolution.value;
    tokio::spawn(async move { run_service(service, &mut stream, payload).await });
}

/// `POST /event/postsse`: stores `{endpoint, payload}` for a later GET.
pub async fn handoff_create(State(state): State<AppState>, body: Bytes) -> Response {
    match parse_request(&body) {
        Ok((endpoint, payload)) => {
            let id = state.handoffs.put(endpoint, payload);
            let stream = format!(
                "{}/event/postsse?id={}",
                state.public_base_url,
                urlencoding::encode(&id)
            );
            no_store(Json(json!({ "ok": true, "id": id, "stream": stream })).into_response())
        }
        Err(rejection) => json_error(StatusCode::BAD_REQUEST, rejection.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HandoffQuery {
    #[serde(default)]
    pub id: String,
}

/// `GET /event/postsse?id=`: replays the stored POST upstream and forwards
/// the event stream unchanged.
pub async fn handoff_stream(State(state): State<AppState>, Query(query): Query<HandoffQuery>) -> Response {
    let Some(entry) = state.handoffs.take(&query.id) else {
        return sse_error("Invalid or expired stream id").await;
    };

    let url = format!(
        "{}/{}",
        state.public_base_url,
        entry.endpoint.trim_start_matches('/')
    );
    debug!(url = %url, "Replaying hand-off upstream");

    let upstream = state
        .http
        .post(&url)
        .header(header::ACCEPT, "text/event-stream")
        .json(&entry.payload)
        .send()
        .await;

    match upstream {
        Ok(response) if response.status().is_success() => {
            sse_headers(Body::from_stream(response.bytes_stream()).into_response())
        }
        Ok(response) => sse_error(&format!("Upstream returned {}", response.status())).await,
        Err(e) => {
            warn!("Hand-off upstream request failed: {}", e);
            sse_error("Upstream request failed").await
        }
    }
}

/// `{"ok":false,"error":..}` with `status`.
fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = json!({ "ok": false, "error": message.into() });
    (status, Json(body)).into_response()
}

/// An event stream consisting of a single `event: error` frame.
async fn sse_error(message: &str) -> Response {
    let mut stream = SseEventStream::new(SseConfig::default());
    let Some(body) = stream.take_body() else {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, message);
    };
    let _ = stream.push("error", json_map(json!({ "error": message }))).await;
    drop(stream);
    body.into_response()
}

fn sse_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

fn no_store(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentService;

    #[async_trait::async_trait]
    impl StreamingService for SilentService {
        async fn run(
            &self,
            stream: &mut dyn EventStream,
            _payload: JsonMap,
        ) -> Result<(), event_transport_server::ServerError> {
            stream.push("token", json_map(json!({"t": "only"}))).await
        }
    }

    struct FailingService;

    #[async_trait::async_trait]
    impl StreamingService for FailingService {
        async fn run(
            &self,
            _stream: &mut dyn EventStream,
            _payload: JsonMap,
        ) -> Result<(), event_transport_server::ServerError> {
            Err(event_transport_server::ServerError::Channel("boom".into()))
        }
    }

    fn single_shot() -> TransportStream {
        TransportStream::NoStream(event_transport_server::NoStreamEventStream::new())
    }

    #[tokio::test]
    async fn test_run_service_finishes_unfinished_stream() {
        let mut stream = single_shot();
        run_service(Arc::new(SilentService), &mut stream, JsonMap::new()).await;

        let output = stream.take_output().unwrap();
        assert_eq!(output.events.len(), 1);
        assert!(output.data.is_empty());
    }

    #[tokio::test]
    async fn test_run_service_reports_failure_in_final_payload() {
        let mut stream = single_shot();
        run_service(Arc::new(FailingService), &mut stream, JsonMap::new()).await;

        let output = stream.take_output().unwrap();
        assert_eq!(output.data, json_map(json!({"error": "Channel error: boom"})));
    }

    #[test]
    fn test_parse_payload() {
        assert!(parse_payload(b"").unwrap().is_empty());
        assert!(parse_payload(b"  \n").unwrap().is_empty());
        assert_eq!(
            parse_payload(br#"{"prompt":"hi"}"#).unwrap(),
            json_map(json!({"prompt": "hi"}))
        );
        assert!(parse_payload(b"[1]").is_err());
        assert!(parse_payload(b"{oops").unwrap_err().starts_with("Invalid JSON payload"));
    }

    #[test]
    fn test_stream_query_identity() {
        let query = StreamQuery {
            service: "echo".into(),
            stream: "s1".into(),
        };
        assert_eq!(query.identity().unwrap(), StreamIdentity::new("echo", "s1"));
        assert!(StreamQuery::default().identity().is_err());
    }

    #[tokio::test]
    async fn test_sse_error_frame() {
        let response = sse_error("Invalid or expired stream id").await;
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "\nevent: error\ndata: {\"error\":\"Invalid or expired stream id\"}\n\n"
        );
    }

    #[test]
    fn test_json_error_shape() {
        let response = json_error(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
