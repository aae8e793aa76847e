//! Long-polling channel.
//!
//! Like short polling, but each GET waits server-side, so polls are issued
//! back to back. `timeout` replies are skipped.

use event_transport_server::event::TIMEOUT;
use event_transport_server::{JsonMap, JsonValue, TransportMode};

use super::{is_done, ChannelContext};
use crate::error::Result;

pub(crate) async fn run(ctx: &mut ChannelContext<'_>, payload: JsonMap) -> Result<()> {
    let url = ctx.url(TransportMode::Long);
    ctx.callbacks.opened(TransportMode::Long);

    if ctx.post_json(&url, &payload).await?.is_none() {
        return Ok(());
    }

    loop {
        let Some(reply) = ctx.get_json(&url).await? else {
            return Ok(());
        };
        if reply.get("type").and_then(JsonValue::as_str) == Some(TIMEOUT) {
            continue;
        }
        let done = is_done(&reply);
        ctx.callbacks.message(reply);
        if done {
            return Ok(());
        }
    }
}
