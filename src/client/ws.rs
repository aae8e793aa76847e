//! WebSocket channel.
//!
//! Connects, sends `{"type":"init","payload":..}` to start the producer and
//! delivers every text frame. Ends after `done` or when the server closes.

use event_transport_server::{JsonMap, JsonValue, StreamIdentity, TransportMode};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{is_done, ChannelContext};
use crate::error::{AppError, Result};

pub(crate) async fn run(ctx: &mut ChannelContext<'_>, payload: JsonMap) -> Result<()> {
    let url = socket_url(ctx)?;

    let Some(connected) = ctx.unless_closed(connect_async(url.as_str())).await else {
        return Ok(());
    };
    let (mut socket, _) = connected.map_err(|e| AppError::WebSocket(format!("{}: {}", url, e)))?;
    ctx.callbacks.opened(TransportMode::Ws);

    let init = json!({ "type": "init", "payload": payload }).to_string();
    socket
        .send(Message::Text(init))
        .await
        .map_err(|e| AppError::WebSocket(e.to_string()))?;

    loop {
        let Some(next) = ctx.unless_closed(socket.next()).await else {
            let _ = socket.close(None).await;
            return Ok(());
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let message: JsonValue = serde_json::from_str(&text)
                    .map_err(|e| AppError::Protocol(format!("bad WebSocket frame: {}", e)))?;
                let done = is_done(&message);
                ctx.callbacks.message(message);
                if done {
                    let _ = socket.close(None).await;
                    return Ok(());
                }
            }
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(AppError::WebSocket(e.to_string())),
        }
    }
}

fn socket_url(ctx: &ChannelContext<'_>) -> Result<String> {
    let identity: &StreamIdentity = &ctx.identity;
    ctx.config
        .socket_url(identity)
        .ok_or_else(|| AppError::WebSocket("no WebSocket URL configured".to_string()))
}
