use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    clock::{self, Clock},
    domain::PlatformChatId,
};

pub const DEFAULT_MEDIA_GROUP_WINDOW: Duration = Duration::from_secs(300);

/// Expiring set of `(chat, media group)` markers.
///
/// Every part of an album arrives as its own update; only the first one should
/// trigger rule resolution. Markers are advisory: losing one early costs at
/// most one duplicate dispatch.
pub struct MediaGroupDedup {
    clock: Arc<dyn Clock>,
    window: Duration,
    seen: Mutex<HashMap<(PlatformChatId, String), DateTime<Utc>>>,
}

impl MediaGroupDedup {
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            clock,
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Mark the group as handled. Returns `false` if it was already marked
    /// within the window.
    pub async fn try_mark(&self, chat: PlatformChatId, group_id: &str) -> bool {
        let now = self.clock.now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, expires_at| *expires_at > now);

        let key = (chat, group_id.to_string());
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, clock::after(now, self.window));
        true
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}
