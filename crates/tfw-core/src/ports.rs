use async_trait::async_trait;

use crate::{
    dispatch::DispatchJob,
    domain::{ChannelLinkMapping, ChatDbId, ChatIdentity, ForwardRule, InboundEvent, PlatformChatId},
    errors::PlatformResult,
    Result,
};

// ============== Platform ==============

/// A channel as returned by the platform's entity lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEntity {
    pub id: PlatformChatId,
    pub title: Option<String>,
}

/// A chat mentioned in a full-channel response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: PlatformChatId,
    pub title: Option<String>,
}

/// Full channel info; only the discussion-group link matters here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FullChannel {
    pub linked_chat_id: Option<PlatformChatId>,
    /// Chats bundled with the response (used for a best-effort group title).
    pub chats: Vec<ChatSummary>,
}

impl FullChannel {
    pub fn title_of(&self, id: PlatformChatId) -> Option<&str> {
        self.chats
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| c.title.as_deref())
    }
}

/// Hexagonal port for the messaging platform (Telegram today).
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_entity(&self, id: PlatformChatId) -> PlatformResult<ChannelEntity>;
    async fn get_full_channel(&self, entity: &ChannelEntity) -> PlatformResult<FullChannel>;
}

// ============== Persistence ==============

/// Outcome of an optimistic insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Written(T),
    /// A unique constraint fired: someone else wrote the row first. The
    /// attempt has been rolled back; re-read to pick up the winner.
    Conflict,
}

/// Chats and channel → discussion-group cache rows.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn chat_by_id(&self, id: ChatDbId) -> Result<Option<ChatIdentity>>;
    async fn chat_by_platform_id(&self, id: PlatformChatId) -> Result<Option<ChatIdentity>>;
    async fn insert_chat(
        &self,
        id: PlatformChatId,
        name: Option<&str>,
    ) -> Result<WriteOutcome<ChatIdentity>>;

    async fn mapping_for_channel(&self, channel: ChatDbId) -> Result<Option<ChannelLinkMapping>>;
    /// Update the channel's row in place, or insert it when absent, in one
    /// short transaction. Returns `Conflict` if a concurrent insert won.
    async fn save_mapping(
        &self,
        mapping: &ChannelLinkMapping,
    ) -> Result<WriteOutcome<ChannelLinkMapping>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub enabled_only: bool,
    pub comment_forward_only: bool,
}

impl RuleFilter {
    pub fn enabled() -> Self {
        Self {
            enabled_only: true,
            comment_forward_only: false,
        }
    }

    pub fn comment_forwarding() -> Self {
        Self {
            enabled_only: true,
            comment_forward_only: true,
        }
    }

    pub fn matches(&self, rule: &ForwardRule) -> bool {
        (!self.enabled_only || rule.enabled)
            && (!self.comment_forward_only || rule.comment_forward_enabled)
    }
}

/// Rules of a channel whose linked discussion group is the event's chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRules {
    pub channel: ChatIdentity,
    pub rules: Vec<ForwardRule>,
}

/// Everything rule resolution needs for one chat, read in one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchSet {
    pub chat: ChatIdentity,
    /// Enabled rules whose source is `chat`.
    pub direct: Vec<ForwardRule>,
    /// Enabled, comment-forwarding rules of the channel `chat` is linked to.
    pub parent: Option<ParentRules>,
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn rules_for_source(&self, source: ChatDbId, filter: RuleFilter)
        -> Result<Vec<ForwardRule>>;

    /// `None` when the chat is not registered.
    async fn dispatch_set(&self, chat: PlatformChatId) -> Result<Option<DispatchSet>>;
}

// ============== Dispatch ==============

/// Downstream consumer of resolved jobs (context building + sending).
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn dispatch(&self, event: &InboundEvent, job: &DispatchJob) -> Result<()>;
}
