//! Raw table rows and their conversion into domain types.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tfw_core::{
    domain::{ChannelLinkMapping, ChatDbId, ChatIdentity, ForwardRule, PlatformChatId},
    Error, Result,
};

pub(crate) const CHAT_COLUMNS: &str = "id, telegram_chat_id, name";

/// Rule columns plus both endpoints' Telegram ids; expects `forward_rules r`
/// joined with `chats s` (source) and `chats t` (target).
pub(crate) const RULE_SELECT: &str = r#"
    SELECT r.id, r.source_chat_id, s.telegram_chat_id AS source_telegram_id,
           r.target_chat_id, t.telegram_chat_id AS target_telegram_id,
           r.enable_rule, r.enable_comment_forward, r.comment_message_prefix,
           r.enable_comment_context
    FROM forward_rules r
    JOIN chats s ON s.id = r.source_chat_id
    JOIN chats t ON t.id = r.target_chat_id
"#;

#[derive(Debug, FromRow)]
pub(crate) struct ChatRow {
    pub id: i64,
    pub telegram_chat_id: String,
    pub name: Option<String>,
}

#[derive(Debug, FromRow)]
pub(crate) struct MappingRow {
    pub channel_chat_id: i64,
    pub linked_chat_id: Option<i64>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub(crate) struct RuleRow {
    pub id: i64,
    pub source_chat_id: i64,
    pub source_telegram_id: String,
    pub target_chat_id: i64,
    pub target_telegram_id: String,
    pub enable_rule: bool,
    pub enable_comment_forward: bool,
    pub comment_message_prefix: Option<String>,
    pub enable_comment_context: bool,
}

/// Telegram ids are stored as text; anything else is a corrupt row.
fn platform_id(raw: &str) -> Result<PlatformChatId> {
    raw.trim()
        .parse::<i64>()
        .map(PlatformChatId)
        .map_err(|_| Error::Store(format!("invalid telegram_chat_id {raw:?}")))
}

impl TryFrom<ChatRow> for ChatIdentity {
    type Error = Error;

    fn try_from(row: ChatRow) -> Result<Self> {
        Ok(Self {
            id: ChatDbId(row.id),
            platform_chat_id: platform_id(&row.telegram_chat_id)?,
            name: row.name,
        })
    }
}

impl From<MappingRow> for ChannelLinkMapping {
    fn from(row: MappingRow) -> Self {
        Self {
            channel_chat_id: ChatDbId(row.channel_chat_id),
            linked_chat_id: row.linked_chat_id.map(ChatDbId),
            last_checked: row.last_checked,
        }
    }
}

impl TryFrom<RuleRow> for ForwardRule {
    type Error = Error;

    fn try_from(row: RuleRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            source_chat_id: ChatDbId(row.source_chat_id),
            source_platform_id: platform_id(&row.source_telegram_id)?,
            target_chat_id: ChatDbId(row.target_chat_id),
            target_platform_id: platform_id(&row.target_telegram_id)?,
            enabled: row.enable_rule,
            comment_forward_enabled: row.enable_comment_forward,
            comment_message_prefix: row.comment_message_prefix,
            comment_context_enabled: row.enable_comment_context,
        })
    }
}

pub(crate) fn rules(rows: Vec<RuleRow>) -> Result<Vec<ForwardRule>> {
    rows.into_iter().map(ForwardRule::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_telegram_id_is_a_store_error() {
        let row = ChatRow {
            id: 1,
            telegram_chat_id: "not-a-number".to_string(),
            name: None,
        };
        assert!(matches!(ChatIdentity::try_from(row), Err(Error::Store(_))));
    }

    #[test]
    fn chat_row_parses_negative_ids() {
        let row = ChatRow {
            id: 3,
            telegram_chat_id: "-1001234".to_string(),
            name: Some("news".to_string()),
        };
        let chat = ChatIdentity::try_from(row).unwrap();
        assert_eq!(chat.platform_chat_id, PlatformChatId(-1001234));
        assert_eq!(chat.id, ChatDbId(3));
    }
}
