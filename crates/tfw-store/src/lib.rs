//! SQLite persistence for chats, forwarding rules and channel link mappings.
//!
//! [`SqliteStore`] implements both [`RelationshipStore`] and
//! [`RuleRepository`]. Every port call is one short statement or one short
//! transaction; nothing here ever waits on the network.

mod admin;
mod rows;

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use tfw_core::{
    domain::{ChannelLinkMapping, ChatDbId, ChatIdentity, ForwardRule, PlatformChatId},
    ports::{
        DispatchSet, ParentRules, RelationshipStore, RuleFilter, RuleRepository, WriteOutcome,
    },
    Error, Result,
};
use tracing::{debug, info};

use crate::rows::{ChatRow, MappingRow, RuleRow, CHAT_COLUMNS, RULE_SELECT};

pub use admin::CommentSettings;

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

pub(crate) fn db(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db)?;
        info!(url, max_connections, "database pool ready");
        Ok(Self { pool })
    }

    /// Private in-memory database, already migrated.
    ///
    /// Backed by a single connection that is never recycled: each new
    /// connection to `sqlite::memory:` would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("migration failed: {e}")))?;
        debug!("schema migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn fetch_rules<'e, E>(exec: E, source: ChatDbId, filter: RuleFilter) -> Result<Vec<ForwardRule>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let mut sql = format!("{RULE_SELECT} WHERE r.source_chat_id = ?");
    if filter.enabled_only {
        sql.push_str(" AND r.enable_rule = 1");
    }
    if filter.comment_forward_only {
        sql.push_str(" AND r.enable_comment_forward = 1");
    }
    sql.push_str(" ORDER BY r.id");

    let rows = sqlx::query_as::<_, RuleRow>(&sql)
        .bind(source.0)
        .fetch_all(exec)
        .await
        .map_err(db)?;
    rows::rules(rows)
}

#[async_trait]
impl RelationshipStore for SqliteStore {
    async fn chat_by_id(&self, id: ChatDbId) -> Result<Option<ChatIdentity>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?");
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .map(ChatIdentity::try_from)
            .transpose()
    }

    async fn chat_by_platform_id(&self, id: PlatformChatId) -> Result<Option<ChatIdentity>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE telegram_chat_id = ?");
        sqlx::query_as::<_, ChatRow>(&sql)
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .map(ChatIdentity::try_from)
            .transpose()
    }

    async fn insert_chat(
        &self,
        id: PlatformChatId,
        name: Option<&str>,
    ) -> Result<WriteOutcome<ChatIdentity>> {
        let sql = format!(
            "INSERT INTO chats (telegram_chat_id, name) VALUES (?, ?) RETURNING {CHAT_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(id.0.to_string())
            .bind(name)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(row) => Ok(WriteOutcome::Written(row.try_into()?)),
            Err(e) if is_unique_violation(&e) => {
                debug!(platform_id = %id, "chat insert lost a race");
                Ok(WriteOutcome::Conflict)
            }
            Err(e) => Err(db(e)),
        }
    }

    async fn mapping_for_channel(&self, channel: ChatDbId) -> Result<Option<ChannelLinkMapping>> {
        let row = sqlx::query_as::<_, MappingRow>(
            "SELECT channel_chat_id, linked_chat_id, last_checked
             FROM channel_comment_mappings WHERE channel_chat_id = ?",
        )
        .bind(channel.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.map(ChannelLinkMapping::from))
    }

    async fn save_mapping(
        &self,
        mapping: &ChannelLinkMapping,
    ) -> Result<WriteOutcome<ChannelLinkMapping>> {
        let channel = mapping.channel_chat_id.0;
        let linked = mapping.linked_chat_id.map(|c| c.0);

        let mut tx = self.pool.begin().await.map_err(db)?;
        let updated = sqlx::query(
            "UPDATE channel_comment_mappings SET linked_chat_id = ?, last_checked = ?
             WHERE channel_chat_id = ?",
        )
        .bind(linked)
        .bind(mapping.last_checked)
        .bind(channel)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if updated.rows_affected() == 0 {
            let inserted = sqlx::query(
                "INSERT INTO channel_comment_mappings (channel_chat_id, linked_chat_id, last_checked)
                 VALUES (?, ?, ?)",
            )
            .bind(channel)
            .bind(linked)
            .bind(mapping.last_checked)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    tx.rollback().await.map_err(db)?;
                    debug!(channel, "mapping insert lost a race");
                    return Ok(WriteOutcome::Conflict);
                }
                Err(e) => return Err(db(e)),
            }
        }

        tx.commit().await.map_err(db)?;
        Ok(WriteOutcome::Written(mapping.clone()))
    }
}

#[async_trait]
impl RuleRepository for SqliteStore {
    async fn rules_for_source(
        &self,
        source: ChatDbId,
        filter: RuleFilter,
    ) -> Result<Vec<ForwardRule>> {
        fetch_rules(&self.pool, source, filter).await
    }

    async fn dispatch_set(&self, chat: PlatformChatId) -> Result<Option<DispatchSet>> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE telegram_chat_id = ?");
        let Some(row) = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(chat.0.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
        else {
            return Ok(None);
        };
        let chat = ChatIdentity::try_from(row)?;

        let direct = fetch_rules(&mut *tx, chat.id, RuleFilter::enabled()).await?;

        let parent_row = sqlx::query_as::<_, ChatRow>(
            "SELECT c.id, c.telegram_chat_id, c.name
             FROM channel_comment_mappings m
             JOIN chats c ON c.id = m.channel_chat_id
             WHERE m.linked_chat_id = ?
             ORDER BY m.last_checked DESC, m.id DESC
             LIMIT 1",
        )
        .bind(chat.id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;

        let parent = match parent_row {
            Some(row) => {
                let channel = ChatIdentity::try_from(row)?;
                let rules = fetch_rules(&mut *tx, channel.id, RuleFilter::comment_forwarding()).await?;
                Some(ParentRules { channel, rules })
            }
            None => None,
        };

        tx.commit().await.map_err(db)?;
        Ok(Some(DispatchSet {
            chat,
            direct,
            parent,
        }))
    }
}
