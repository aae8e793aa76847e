//! Short-polling channel.
//!
//! One POST starts the producer, then a GET every interval pops at most one
//! event. `empty` replies are skipped; the loop ends after `done`.

use event_transport_server::event::EMPTY;
use event_transport_server::{JsonMap, JsonValue, TransportMode};

use super::{is_done, ChannelContext};
use crate::error::Result;

pub(crate) async fn run(ctx: &mut ChannelContext<'_>, payload: JsonMap) -> Result<()> {
    let url = ctx.url(TransportMode::Short);
    ctx.callbacks.opened(TransportMode::Short);

    if ctx.post_json(&url, &payload).await?.is_none() {
        return Ok(());
    }

    let interval = ctx.config.short_poll_interval;
    loop {
        let Some(reply) = ctx.get_json(&url).await? else {
            return Ok(());
        };
        if reply.get("type").and_then(JsonValue::as_str) != Some(EMPTY) {
            let done = is_done(&reply);
            ctx.callbacks.message(reply);
            if done {
                return Ok(());
            }
        }
        if !ctx.pause(interval).await {
            return Ok(());
        }
    }
}
