//! Expiration and retry policies.

use crate::{
    clock::{DAY, HOUR, MINUTE},
    metadata::DataType,
};
use serde::{Deserialize, Serialize};

/// How long one kind of data may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryPolicy {
    /// Older entries are evicted (unless dirty)
    pub max_age: u64,
    /// Older entries are still served but refreshed when online
    pub stale_after: u64,
}

impl ExpiryPolicy {
    pub const fn new(max_age: u64, stale_after: u64) -> Self {
        Self {
            max_age,
            stale_after,
        }
    }
}

/// Expiry policy for every [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    pub posts: ExpiryPolicy,
    pub comments: ExpiryPolicy,
    pub users: ExpiryPolicy,
    pub search: ExpiryPolicy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            posts: ExpiryPolicy::new(DAY, 15 * MINUTE),
            comments: ExpiryPolicy::new(12 * HOUR, 30 * MINUTE),
            users: ExpiryPolicy::new(7 * DAY, DAY),
            search: ExpiryPolicy::new(HOUR, 10 * MINUTE),
        }
    }
}

impl CachePolicy {
    pub fn for_type(&self, data_type: DataType) -> ExpiryPolicy {
        match data_type {
            DataType::Posts => self.posts,
            DataType::Comments => self.comments,
            DataType::Users => self.users,
            DataType::Search => self.search,
        }
    }
}

/// Attempt budget and optional exponential backoff for failed syncs.
///
/// With `initial_backoff_ms == 0` the attempt counter is the only gate and a
/// failed item is retried on the very next pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 0,
            multiplier: 2.0,
            max_backoff_ms: HOUR,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    pub fn backoff_enabled(&self) -> bool {
        self.initial_backoff_ms > 0
    }

    /// Delay before the next attempt after `attempts` failures:
    /// `initial * multiplier^(attempts - 1)`, capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempts: u32) -> u64 {
        if !self.backoff_enabled() || attempts == 0 {
            return 0;
        }
        let exponent = (attempts - 1).min(i32::MAX as u32) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        delay.min(self.max_backoff_ms as f64) as u64
    }
}
