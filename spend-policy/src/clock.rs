//! Wall-clock source and fixed-size spending windows

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Seconds in one day window
pub const DAY_SECONDS: i64 = 86_400;

/// Seconds in one month window (30-day approximation)
pub const MONTH_SECONDS: i64 = 30 * DAY_SECONDS;

/// Time source used by the limit tracker and the ledger
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    secs: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at the given unix timestamp (seconds)
    pub fn starting_at(unix_secs: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(unix_secs)),
        }
    }

    /// Move forward by `secs`
    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to an absolute unix timestamp
    pub fn set(&self, unix_secs: i64) {
        self.secs.store(unix_secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.secs.load(Ordering::SeqCst);
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }
}

/// Day and month window indices for an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowIndex {
    /// `unix_secs / DAY_SECONDS`
    pub day: u64,
    /// `unix_secs / MONTH_SECONDS`
    pub month: u64,
}

impl WindowIndex {
    /// Windows containing `at`; instants before the epoch map to window 0
    pub fn at(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp().max(0);
        Self {
            day: (secs / DAY_SECONDS) as u64,
            month: (secs / MONTH_SECONDS) as u64,
        }
    }
}
