use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Internal (database) chat id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChatDbId(pub i64);

/// Telegram chat id as reported by the Bot API (channels are `-100…`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlatformChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(pub i32);

impl fmt::Display for ChatDbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for PlatformChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PlatformChatId {
    /// Id used inside `t.me/c/<id>/<post>` links: the channel id with the
    /// `-100` marker removed.
    pub fn link_component(&self) -> String {
        let raw = self.0.unsigned_abs().to_string();
        raw.strip_prefix("100").map(str::to_string).unwrap_or(raw)
    }
}

/// A chat known to the forwarder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatIdentity {
    pub id: ChatDbId,
    pub platform_chat_id: PlatformChatId,
    pub name: Option<String>,
}

/// Cached channel → discussion-group relationship.
///
/// `linked_chat_id == None` is a cached "no linked group" answer, which is
/// different from the row being absent (never checked).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelLinkMapping {
    pub channel_chat_id: ChatDbId,
    pub linked_chat_id: Option<ChatDbId>,
    pub last_checked: DateTime<Utc>,
}

pub const DEFAULT_COMMENT_PREFIX: &str = "💬 Comment:";

/// A forwarding rule, read-only from the core's point of view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ForwardRule {
    pub id: i64,
    pub source_chat_id: ChatDbId,
    pub source_platform_id: PlatformChatId,
    pub target_chat_id: ChatDbId,
    pub target_platform_id: PlatformChatId,
    pub enabled: bool,
    pub comment_forward_enabled: bool,
    pub comment_message_prefix: Option<String>,
    pub comment_context_enabled: bool,
}

impl ForwardRule {
    pub fn comment_prefix(&self) -> &str {
        self.comment_message_prefix
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_COMMENT_PREFIX)
    }
}

/// Which upstream connection delivered an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EventSource {
    UserClient,
    Bot,
}

/// One inbound message, reduced to what rule resolution needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: PlatformChatId,
    pub message_id: MessageId,
    pub media_group_id: Option<String>,
    pub source: EventSource,
    /// For discussion-group messages: id of the channel post this comment
    /// replies to, when the platform exposes it.
    pub reply_to_channel_post: Option<MessageId>,
}

impl InboundEvent {
    pub fn new(chat_id: PlatformChatId, message_id: MessageId, source: EventSource) -> Self {
        Self {
            chat_id,
            message_id,
            media_group_id: None,
            source,
            reply_to_channel_post: None,
        }
    }

    pub fn with_media_group(mut self, group_id: impl Into<String>) -> Self {
        self.media_group_id = Some(group_id.into());
        self
    }

    pub fn replying_to(mut self, post: MessageId) -> Self {
        self.reply_to_channel_post = Some(post);
        self
    }
}
