//! Telegram adapter (teloxide).
//!
//! Implements the `tfw-core` [`PlatformClient`] and [`DispatchSink`] ports over
//! the Telegram Bot API and feeds bot updates into the rule engine.

use async_trait::async_trait;
use teloxide::{prelude::*, types::Chat, ApiError, RequestError};
use tokio::time::sleep;
use tracing::{debug, warn};

pub mod handlers;
pub mod router;

use tfw_core::{
    dispatch::{CommentContext, DispatchJob},
    domain::{InboundEvent, MessageId, PlatformChatId},
    errors::{Error, PlatformError, PlatformResult},
    ports::{ChannelEntity, ChatSummary, DispatchSink, FullChannel, PlatformClient},
    Result,
};

fn tg_chat(id: PlatformChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(id.0)
}

fn tg_msg_id(id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(id.0)
}

/// Collapse a Bot API failure into the platform error kinds the core knows.
pub fn map_request_error(e: RequestError) -> PlatformError {
    let text = e.to_string();
    match e {
        RequestError::RetryAfter(wait) => PlatformError::RateLimited(wait),
        RequestError::Api(
            ApiError::ChatNotFound | ApiError::BotKicked | ApiError::BotKickedFromSupergroup,
        ) => PlatformError::PrivateOrUnavailable(text),
        RequestError::Api(ApiError::Unknown(ref raw)) if raw.contains("CHANNEL_PRIVATE") => {
            PlatformError::PrivateOrUnavailable(text)
        }
        _ => PlatformError::Other(text),
    }
}

/// Text sent ahead of a forwarded comment.
pub fn comment_header(ctx: &CommentContext<'_>) -> String {
    match ctx.original_message_id {
        Some(post) if ctx.include_context_link => format!(
            "{}\nhttps://t.me/c/{}/{}",
            ctx.prefix,
            ctx.parent_channel.link_component(),
            post.0
        ),
        _ => ctx.prefix.to_string(),
    }
}

// ============== Platform client ==============

/// The discussion group a `getChat` answer points at.
///
/// Supergroups report their parent channel in `linked_chat_id`; only channels
/// count.
pub fn linked_group(chat: &Chat) -> Option<PlatformChatId> {
    if chat.is_channel() {
        chat.linked_chat_id().map(PlatformChatId)
    } else {
        None
    }
}

/// Channel lookups over `getChat`.
///
/// Bot API chat ids need no resolution, so [`PlatformClient::get_entity`] is
/// local and a refresh costs a single `getChat`. The group title is not part
/// of that answer and stays unknown.
#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl PlatformClient for TelegramPlatform {
    async fn get_entity(&self, id: PlatformChatId) -> PlatformResult<ChannelEntity> {
        Ok(ChannelEntity { id, title: None })
    }

    async fn get_full_channel(&self, entity: &ChannelEntity) -> PlatformResult<FullChannel> {
        let chat = self
            .bot
            .get_chat(tg_chat(entity.id))
            .await
            .map_err(map_request_error)?;

        let Some(linked) = linked_group(&chat) else {
            debug!(channel = %entity.id, "no discussion group");
            return Ok(FullChannel::default());
        };
        Ok(FullChannel {
            linked_chat_id: Some(linked),
            chats: vec![ChatSummary {
                id: linked,
                title: None,
            }],
        })
    }
}

// ============== Dispatch sink ==============

/// Copies the inbound message to the rule's target chat.
///
/// Comment jobs get a header message first. For albums only the first part is
/// copied.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(wait)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    warn!(retry_after = ?wait, "send rate limited, waiting");
                    sleep(wait).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl DispatchSink for TelegramSink {
    async fn dispatch(&self, event: &InboundEvent, job: &DispatchJob) -> Result<()> {
        let target = tg_chat(job.rule.target_platform_id);

        if let Some(ctx) = job.comment_context(event) {
            let header = comment_header(&ctx);
            self.with_retry(|| self.bot.send_message(target, header.clone()))
                .await?;
        }

        self.with_retry(|| {
            self.bot
                .copy_message(target, tg_chat(event.chat_id), tg_msg_id(event.message_id))
        })
        .await?;

        debug!(
            rule = job.rule.id,
            chat = %event.chat_id,
            message = event.message_id.0,
            target = %job.rule.target_platform_id,
            comment = job.is_comment,
            "message forwarded"
        );
        Ok(())
    }
}
