//! Telegram update handlers: convert a message into an [`InboundEvent`] and
//! hand it to the rule engine.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::debug;

use tfw_core::domain::{EventSource, InboundEvent, MessageId, PlatformChatId};

use crate::router::AppState;

pub fn inbound_event(msg: &Message, source: EventSource) -> InboundEvent {
    let mut event = InboundEvent::new(PlatformChatId(msg.chat.id.0), MessageId(msg.id.0), source);
    if let Some(group) = msg.media_group_id() {
        event = event.with_media_group(group);
    }
    // In a discussion group the thread root is the automatic forward of the
    // channel post, which still carries the post's id.
    if let Some(post) = msg
        .reply_to_message()
        .and_then(|parent| parent.forward_from_message_id())
    {
        event = event.replying_to(MessageId(post));
    }
    event
}

/// Whether the message should go through rule resolution at all.
fn is_forwardable(msg: &Message, state: &AppState) -> bool {
    // Telegram mirrors every channel post into the linked group; that copy
    // is not a comment.
    if msg.is_automatic_forward() {
        return false;
    }
    !matches!(msg.from(), Some(user) if user.id == state.bot_id)
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !is_forwardable(&msg, &state) {
        debug!(chat = msg.chat.id.0, message = msg.id.0, "skipping message");
        return Ok(());
    }
    let event = inbound_event(&msg, EventSource::Bot);
    state.engine.handle(&event, state.sink.as_ref()).await;
    Ok(())
}

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !state.forward_channel_posts {
        return Ok(());
    }
    let event = inbound_event(&msg, EventSource::Bot);
    state.engine.handle(&event, state.sink.as_ref()).await;
    Ok(())
}
