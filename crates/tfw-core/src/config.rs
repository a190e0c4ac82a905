use std::{env, time::Duration};

use crate::{errors::Error, Result};

/// Upper bound for `MEDIA_GROUP_DEDUP_SECS` (one day).
pub const MAX_MEDIA_GROUP_SECS: u64 = 86_400;

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: Option<String>,
    pub forward_channel_posts: bool,

    // Persistence
    pub database_url: String,
    pub db_max_connections: u32,

    // Link cache / dedup
    pub link_cache_ttl: Duration,
    pub media_group_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Existing env vars win over `.env` entries.
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").and_then(non_empty);
        let forward_channel_posts = parse_bool(&get, "FORWARD_CHANNEL_POSTS")?.unwrap_or(true);

        let database_url = get("DATABASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "sqlite://tfw.db".to_string());
        let db_max_connections = parse_num::<u32>(&get, "DB_MAX_CONNECTIONS")?.unwrap_or(5);
        if db_max_connections == 0 {
            return Err(Error::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        let ttl_hours = parse_num::<u64>(&get, "LINK_CACHE_TTL_HOURS")?.unwrap_or(24);
        if ttl_hours == 0 {
            return Err(Error::Config(
                "LINK_CACHE_TTL_HOURS must be at least 1".to_string(),
            ));
        }
        let link_cache_ttl = ttl_hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::Config(format!("LINK_CACHE_TTL_HOURS is too large: {ttl_hours}")))?;

        let media_group_secs = parse_num::<u64>(&get, "MEDIA_GROUP_DEDUP_SECS")?.unwrap_or(300);
        if media_group_secs > MAX_MEDIA_GROUP_SECS {
            return Err(Error::Config(format!(
                "MEDIA_GROUP_DEDUP_SECS must be at most {MAX_MEDIA_GROUP_SECS}"
            )));
        }
        let media_group_window = Duration::from_secs(media_group_secs);

        Ok(Self {
            telegram_bot_token,
            forward_channel_posts,
            database_url,
            db_max_connections,
            link_cache_ttl,
            media_group_window,
        })
    }

    pub fn require_bot_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })
    }
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {raw:?}"))),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.telegram_bot_token, None);
        assert_eq!(cfg.database_url, "sqlite://tfw.db");
        assert_eq!(cfg.db_max_connections, 5);
        assert_eq!(cfg.link_cache_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.media_group_window, Duration::from_secs(300));
        assert!(cfg.forward_channel_posts);
        assert!(cfg.require_bot_token().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("LINK_CACHE_TTL_HOURS", "6"),
            ("MEDIA_GROUP_DEDUP_SECS", "60"),
            ("FORWARD_CHANNEL_POSTS", "off"),
        ]))
        .unwrap();
        assert_eq!(cfg.require_bot_token().unwrap(), "123:abc");
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.link_cache_ttl, Duration::from_secs(6 * 3600));
        assert_eq!(cfg.media_group_window, Duration::from_secs(60));
        assert!(!cfg.forward_channel_posts);
    }

    #[test]
    fn rejects_zero_ttl_and_garbage() {
        assert!(Config::from_lookup(lookup(&[("LINK_CACHE_TTL_HOURS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "many")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FORWARD_CHANNEL_POSTS", "maybe")])).is_err());
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let err = Config::from_lookup(lookup(&[("LINK_CACHE_TTL_HOURS", "18446744073709551615")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("LINK_CACHE_TTL_HOURS")));

        let err = Config::from_lookup(lookup(&[("MEDIA_GROUP_DEDUP_SECS", "10000000000000")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("MEDIA_GROUP_DEDUP_SECS")));

        let cfg = Config::from_lookup(lookup(&[("MEDIA_GROUP_DEDUP_SECS", "86400")])).unwrap();
        assert_eq!(cfg.media_group_window, Duration::from_secs(MAX_MEDIA_GROUP_SECS));
    }
}
