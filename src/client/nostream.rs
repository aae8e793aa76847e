//! Single-shot channel: one POST, one message.

use event_transport_server::{JsonMap, JsonValue, TransportMode};

use super::ChannelContext;
use crate::error::Result;

pub(crate) async fn run(ctx: &mut ChannelContext<'_>, payload: JsonMap) -> Result<()> {
    let url = ctx.url(TransportMode::NoStream);
    ctx.callbacks.opened(TransportMode::NoStream);

    let Some(response) = ctx.post_json(&url, &payload).await? else {
        return Ok(());
    };
    let Some(body) = ctx.unless_closed(response.json::<JsonValue>()).await else {
        return Ok(());
    };
    ctx.callbacks.message(body?);
    Ok(())
}
