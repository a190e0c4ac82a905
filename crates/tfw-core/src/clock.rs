use std::{sync::Mutex, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};

/// Source of "now" for cache and dedup expiry.
///
/// Production code uses [`SystemClock`]; tests drive time with [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = after(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

const MAX_DELTA: TimeDelta = TimeDelta::days(36_500);

/// Convert a std duration into a chrono delta, saturating at ~100 years.
pub fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).map_or(MAX_DELTA, |d| d.min(MAX_DELTA))
}

/// `at + d`, clamped to the latest representable instant.
pub fn after(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta(d)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time elapsed from `since` to `now`; zero if `since` lies in the future.
pub fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
