//! Time source abstraction.
//!
//! The engine never reads the system clock. Every time-dependent predicate takes
//! `now` explicitly, and services that need a running clock depend on [`Clock`]
//! so tests can drive time by hand.

use crate::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// One second in milliseconds.
pub const SECOND: u64 = 1_000;
/// One minute in milliseconds.
pub const MINUTE: u64 = 60 * SECOND;
/// One hour in milliseconds.
pub const HOUR: u64 = 60 * MINUTE;
/// One day in milliseconds.
pub const DAY: u64 = 24 * HOUR;

/// A source of wall-clock timestamps (milliseconds since the Unix epoch).
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Milliseconds elapsed between `since` and `now`, zero if `since` is in the future.
pub fn elapsed(now: Timestamp, since: Timestamp) -> u64 {
    now.saturating_sub(since)
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `millis` and return the new time.
    pub fn advance(&self, millis: u64) -> Timestamp {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
