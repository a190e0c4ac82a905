use std::time::Duration;

use crate::domain::ChatDbId;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so callers can
/// tell configuration problems from persistence or delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a messaging platform client.
///
/// Platform adapters collapse their own error hierarchy into these three kinds
/// so the link resolver never sees transport-specific types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("chat is private or unavailable: {0}")]
    PrivateOrUnavailable(String),

    #[error("{0}")]
    Other(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Errors surfaced by [`crate::links::LinkResolver::resolve`].
///
/// "No linked group" is not an error; it is `Ok(None)`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The platform throttled the lookup. Do not retry this channel before
    /// `retry_after` has elapsed.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The channel cannot be queried at all (no local record to look up).
    #[error("channel {channel} unavailable: {reason}")]
    Unavailable { channel: ChatDbId, reason: String },
}
