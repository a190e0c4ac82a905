//! Rule administration used by the CLI. The forwarding core never writes rules.

use tfw_core::{
    domain::{ChatIdentity, ForwardRule, PlatformChatId},
    ports::WriteOutcome,
    Error, Result,
};
use tracing::info;

use crate::{
    db, is_unique_violation,
    rows::{self, ChatRow, RuleRow, CHAT_COLUMNS, RULE_SELECT},
    SqliteStore,
};

/// Partial update of a rule's comment-forwarding settings; `None` leaves a
/// field as it is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommentSettings {
    pub forward: Option<bool>,
    /// `Some(None)` resets to the default prefix.
    pub prefix: Option<Option<String>>,
    pub include_context: Option<bool>,
}

impl SqliteStore {
    /// Insert the chat, or refresh its name if it already exists. A `None`
    /// name never clears a known one.
    pub async fn register_chat(&self, id: PlatformChatId, name: Option<&str>) -> Result<ChatIdentity> {
        let sql = format!(
            "INSERT INTO chats (telegram_chat_id, name) VALUES (?, ?)
             ON CONFLICT (telegram_chat_id) DO UPDATE SET name = COALESCE(excluded.name, chats.name)
             RETURNING {CHAT_COLUMNS}"
        );
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(id.0.to_string())
            .bind(name)
            .fetch_one(self.pool())
            .await
            .map_err(db)?
            .try_into()
    }

    /// Create a rule between two chats, registering both. `Conflict` when a
    /// rule for the same pair already exists.
    pub async fn add_rule(
        &self,
        source: PlatformChatId,
        target: PlatformChatId,
    ) -> Result<WriteOutcome<ForwardRule>> {
        if source == target {
            return Err(Error::Config(format!(
                "rule source and target must differ (both {source})"
            )));
        }
        let source_chat = self.register_chat(source, None).await?;
        let target_chat = self.register_chat(target, None).await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO forward_rules (source_chat_id, target_chat_id) VALUES (?, ?) RETURNING id",
        )
        .bind(source_chat.id.0)
        .bind(target_chat.id.0)
        .fetch_one(self.pool())
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => return Ok(WriteOutcome::Conflict),
            Err(e) => return Err(db(e)),
        };
        info!(rule = id, %source, %target, "forward rule created");

        self.rule(id)
            .await?
            .map(WriteOutcome::Written)
            .ok_or_else(|| Error::Store(format!("rule {id} missing right after insert")))
    }

    pub async fn list_rules(&self) -> Result<Vec<ForwardRule>> {
        let sql = format!("{RULE_SELECT} ORDER BY r.id");
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(db)?;
        rows::rules(rows)
    }

    pub async fn rule(&self, id: i64) -> Result<Option<ForwardRule>> {
        let sql = format!("{RULE_SELECT} WHERE r.id = ?");
        sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db)?
            .map(ForwardRule::try_from)
            .transpose()
    }

    /// Returns `false` if no rule has this id.
    pub async fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let done = sqlx::query("UPDATE forward_rules SET enable_rule = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db)?;
        Ok(done.rows_affected() > 0)
    }

    /// Returns `false` if no rule has this id.
    pub async fn update_comment_settings(&self, id: i64, settings: &CommentSettings) -> Result<bool> {
        let (set_prefix, prefix) = match &settings.prefix {
            Some(prefix) => (true, prefix.as_deref()),
            None => (false, None),
        };
        let done = sqlx::query(
            "UPDATE forward_rules SET
                 enable_comment_forward = COALESCE(?, enable_comment_forward),
                 enable_comment_context = COALESCE(?, enable_comment_context),
                 comment_message_prefix = CASE WHEN ? THEN ? ELSE comment_message_prefix END
             WHERE id = ?",
        )
        .bind(settings.forward)
        .bind(settings.include_context)
        .bind(set_prefix)
        .bind(prefix)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db)?;
        Ok(done.rows_affected() > 0)
    }
}
