//! Channel → linked discussion group resolution.
//!
//! [`LinkResolver`] is a read-through cache over the [`RelationshipStore`].
//! A fresh mapping row is answered locally; a missing or stale one triggers a
//! single platform lookup whose result (positive or negative) is written back.
//!
//! No store transaction is open while the platform call is in flight: the
//! cache read, the chat insert and the mapping upsert are each their own short
//! store call. Concurrent refreshes of the same channel race on the unique
//! constraints and converge by re-reading the winner's row.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{self, Clock},
    domain::{ChannelLinkMapping, ChatDbId, ChatIdentity, PlatformChatId},
    errors::{Error, LinkError, PlatformError},
    ports::{PlatformClient, RelationshipStore, WriteOutcome},
    Result,
};

/// Attempts at the mapping upsert before giving up on a write storm.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkPolicy {
    /// A mapping checked at least this long ago is refreshed.
    pub ttl: Duration,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// What the cache currently says about a channel, without touching the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    NeverChecked,
    NoLinkedGroup { last_checked: DateTime<Utc> },
    Linked {
        group: ChatIdentity,
        last_checked: DateTime<Utc>,
    },
}

/// Read the cached relationship for `channel` without any platform call.
pub async fn status(store: &dyn RelationshipStore, channel: ChatDbId) -> Result<LinkStatus> {
    let Some(mapping) = store.mapping_for_channel(channel).await? else {
        return Ok(LinkStatus::NeverChecked);
    };
    let Some(linked) = mapping.linked_chat_id else {
        return Ok(LinkStatus::NoLinkedGroup {
            last_checked: mapping.last_checked,
        });
    };
    let group = store
        .chat_by_id(linked)
        .await?
        .ok_or_else(|| Error::Store(format!("linked chat {linked} has no chat record")))?;
    Ok(LinkStatus::Linked {
        group,
        last_checked: mapping.last_checked,
    })
}

#[derive(Clone, Debug)]
struct LinkedGroup {
    id: PlatformChatId,
    title: Option<String>,
}

pub struct LinkResolver {
    store: Arc<dyn RelationshipStore>,
    platform: Arc<dyn PlatformClient>,
    clock: Arc<dyn Clock>,
    policy: LinkPolicy,
    /// Channel → earliest instant the platform may be asked again.
    not_before: Mutex<HashMap<ChatDbId, DateTime<Utc>>>,
}

impl LinkResolver {
    pub fn new(
        store: Arc<dyn RelationshipStore>,
        platform: Arc<dyn PlatformClient>,
        clock: Arc<dyn Clock>,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            store,
            platform,
            clock,
            policy,
            not_before: Mutex::new(HashMap::new()),
        }
    }

    /// Linked discussion group of `channel`, if any.
    ///
    /// `Ok(None)` covers both "no linked group" and a logged store failure
    /// (the latter is not cached, so the next call retries).
    pub async fn resolve(&self, channel: ChatDbId) -> std::result::Result<Option<ChatDbId>, LinkError> {
        match self.store.mapping_for_channel(channel).await {
            Ok(Some(mapping)) if self.is_fresh(&mapping) => {
                debug!(%channel, linked = ?mapping.linked_chat_id, "link cache hit");
                return Ok(mapping.linked_chat_id);
            }
            Ok(Some(_)) => debug!(%channel, "link cache stale"),
            Ok(None) => debug!(%channel, "link cache miss"),
            Err(e) => {
                error!(%channel, error = %e, "failed to read link cache");
                return Ok(None);
            }
        }

        self.check_backoff(channel).await?;
        self.refresh(channel).await
    }

    /// Cached relationship for `channel`, regardless of age.
    pub async fn status(&self, channel: ChatDbId) -> Result<LinkStatus> {
        status(self.store.as_ref(), channel).await
    }

    fn is_fresh(&self, mapping: &ChannelLinkMapping) -> bool {
        clock::elapsed(mapping.last_checked, self.clock.now()) < self.policy.ttl
    }

    async fn check_backoff(&self, channel: ChatDbId) -> std::result::Result<(), LinkError> {
        let now = self.clock.now();
        let mut not_before = self.not_before.lock().await;
        match not_before.get(&channel) {
            Some(until) if *until > now => {
                let retry_after = clock::elapsed(now, *until);
                debug!(%channel, ?retry_after, "platform lookup still backing off");
                Err(LinkError::RateLimited { retry_after })
            }
            Some(_) => {
                not_before.remove(&channel);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn defer(&self, channel: ChatDbId, retry_after: Duration) {
        let until = clock::after(self.clock.now(), retry_after);
        self.not_before.lock().await.insert(channel, until);
    }

    async fn refresh(&self, channel: ChatDbId) -> std::result::Result<Option<ChatDbId>, LinkError> {
        let chat = match self.store.chat_by_id(channel).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                warn!(%channel, "no chat record for channel, cannot query platform");
                return Err(LinkError::Unavailable {
                    channel,
                    reason: "no chat record".to_string(),
                });
            }
            Err(e) => {
                error!(%channel, error = %e, "failed to load channel chat record");
                return Ok(None);
            }
        };

        info!(%channel, platform_id = %chat.platform_chat_id, "refreshing linked discussion group");

        let linked = match self.fetch_linked(chat.platform_chat_id).await {
            Ok(linked) => linked,
            Err(PlatformError::RateLimited(retry_after)) => {
                warn!(%channel, platform_id = %chat.platform_chat_id, ?retry_after, "linked group lookup rate limited");
                self.defer(channel, retry_after).await;
                return Err(LinkError::RateLimited { retry_after });
            }
            Err(e) => {
                warn!(%channel, platform_id = %chat.platform_chat_id, error = %e, "linked group lookup failed, caching as no linked group");
                None
            }
        };

        let linked_id = match linked {
            None => None,
            Some(group) => match self.ensure_chat(&group).await {
                Ok(identity) => Some(identity.id),
                Err(e) => {
                    error!(%channel, group = %group.id, error = %e, "failed to record linked group chat");
                    return Ok(None);
                }
            },
        };

        match self.persist(channel, linked_id).await {
            Ok(()) => {
                info!(%channel, linked = ?linked_id, "linked discussion group cached");
                Ok(linked_id)
            }
            Err(e) => {
                error!(%channel, error = %e, "failed to cache linked discussion group");
                Ok(None)
            }
        }
    }

    async fn fetch_linked(
        &self,
        channel: PlatformChatId,
    ) -> std::result::Result<Option<LinkedGroup>, PlatformError> {
        let entity = self.platform.get_entity(channel).await?;
        let full = self.platform.get_full_channel(&entity).await?;
        Ok(full.linked_chat_id.map(|id| LinkedGroup {
            id,
            title: full.title_of(id).map(str::to_string),
        }))
    }

    async fn ensure_chat(&self, group: &LinkedGroup) -> Result<ChatIdentity> {
        if let Some(existing) = self.store.chat_by_platform_id(group.id).await? {
            return Ok(existing);
        }

        match self.store.insert_chat(group.id, group.title.as_deref()).await? {
            WriteOutcome::Written(created) => {
                debug!(group = %group.id, id = %created.id, "recorded linked group chat");
                Ok(created)
            }
            WriteOutcome::Conflict => {
                debug!(group = %group.id, "linked group chat inserted concurrently, re-reading");
                self.store
                    .chat_by_platform_id(group.id)
                    .await?
                    .ok_or_else(|| Error::Store(format!("chat {} missing after insert conflict", group.id)))
            }
        }
    }

    async fn persist(&self, channel: ChatDbId, linked: Option<ChatDbId>) -> Result<()> {
        let mapping = ChannelLinkMapping {
            channel_chat_id: channel,
            linked_chat_id: linked,
            last_checked: self.clock.now(),
        };

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.store.save_mapping(&mapping).await? {
                WriteOutcome::Written(_) => return Ok(()),
                WriteOutcome::Conflict => {
                    debug!(%channel, attempt, "mapping inserted concurrently, retrying as update");
                }
            }
        }

        Err(Error::Store(format!(
            "mapping for channel {channel} kept conflicting after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }
}
