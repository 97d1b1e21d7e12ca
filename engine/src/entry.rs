//! Cache entries: domain records wrapped with caching and sync metadata.
//!
//! All transitions take `self` and return the updated value, so a caller can
//! never observe a half-applied mark.

use crate::{clock::elapsed, PostId, Timestamp};
use serde::{Deserialize, Serialize};

/// Sync bookkeeping shared by cache entries and favorite markers.
///
/// Invariants:
/// - `sync_attempts == 0` whenever `needs_sync == false`
/// - `sync_error` is only set while `needs_sync == true`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Local state differs from the remote
    pub needs_sync: bool,
    /// Failed attempts since the last successful sync
    pub sync_attempts: u32,
    /// Reason of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
    /// The remote rejected the payload; retrying cannot help
    #[serde(default)]
    pub failed_permanently: bool,
    /// Earliest time the next attempt may run (backoff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<Timestamp>,
}

/// Display state derived from [`SyncMeta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Matches the remote
    Synced,
    /// Queued, never attempted
    Pending,
    /// At least one attempt failed, more will follow
    Retrying,
    /// Attempt budget used up
    Exhausted,
    /// Remote refused the payload
    Rejected,
}

impl SyncMeta {
    /// Metadata of a record that matches the remote.
    pub fn synced() -> Self {
        Self::default()
    }

    /// Metadata of a fresh local mutation.
    pub fn pending() -> Self {
        Self {
            needs_sync: true,
            ..Self::default()
        }
    }

    /// Flag for sync. With an error, counts a failed attempt and records it.
    pub fn mark_for_sync(self, error: Option<String>) -> Self {
        let sync_attempts = if error.is_some() {
            self.sync_attempts + 1
        } else {
            self.sync_attempts
        };

        Self {
            needs_sync: true,
            sync_attempts,
            sync_error: error,
            failed_permanently: self.failed_permanently,
            next_retry_at: self.next_retry_at,
        }
    }

    /// Count a failed attempt the remote will never accept.
    pub fn mark_rejected(self, error: String) -> Self {
        Self {
            failed_permanently: true,
            next_retry_at: None,
            ..self.mark_for_sync(Some(error))
        }
    }

    /// Clear all sync state.
    pub fn mark_as_synced(self) -> Self {
        Self::synced()
    }

    /// Schedule the next attempt no earlier than `at`.
    pub fn retry_at(self, at: Option<Timestamp>) -> Self {
        Self {
            next_retry_at: at,
            ..self
        }
    }

    /// The retry gate: dirty, not rejected, and under the attempt budget.
    pub fn should_retry_sync(&self, max_attempts: u32) -> bool {
        self.needs_sync && !self.failed_permanently && self.sync_attempts < max_attempts
    }

    /// Whether backoff allows an attempt at `now`.
    pub fn is_retry_due(&self, now: Timestamp) -> bool {
        self.next_retry_at.map_or(true, |at| now >= at)
    }

    pub fn state(&self, max_attempts: u32) -> SyncState {
        if !self.needs_sync {
            SyncState::Synced
        } else if self.failed_permanently {
            SyncState::Rejected
        } else if self.sync_attempts >= max_attempts {
            SyncState::Exhausted
        } else if self.sync_attempts > 0 {
            SyncState::Retrying
        } else {
            SyncState::Pending
        }
    }
}

/// Values the local store can index for sync and eviction.
pub trait SyncTracked {
    /// Whether the value holds unsynced local changes.
    fn needs_sync(&self) -> bool;

    /// Whether the value is an optimistic, not yet confirmed, creation.
    fn is_optimistic(&self) -> bool {
        false
    }

    /// Timestamp used for time-based eviction.
    fn touched_at(&self) -> Timestamp;
}

/// A domain record plus its caching and sync metadata.
///
/// Serializes flat: the record's own fields sit next to `cachedAt`,
/// `needsSync`, `syncAttempts` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    #[serde(flatten)]
    pub record: T,
    /// Last cache write (milliseconds since epoch)
    pub cached_at: Timestamp,
    /// Created locally under a temporary id
    #[serde(default)]
    pub is_optimistic: bool,
    #[serde(flatten)]
    pub sync: SyncMeta,
}

impl<T> CacheEntry<T> {
    /// An entry fetched from the remote.
    pub fn fetched(record: T, now: Timestamp) -> Self {
        Self {
            record,
            cached_at: now,
            is_optimistic: false,
            sync: SyncMeta::synced(),
        }
    }

    /// A local mutation waiting for sync.
    pub fn pending(record: T, now: Timestamp) -> Self {
        Self {
            record,
            cached_at: now,
            is_optimistic: false,
            sync: SyncMeta::pending(),
        }
    }

    /// A locally created record waiting for its server id.
    pub fn optimistic(record: T, now: Timestamp) -> Self {
        Self {
            is_optimistic: true,
            ..Self::pending(record, now)
        }
    }

    /// `now - cached_at > max_age`. The boundary itself is not expired.
    pub fn is_expired(&self, now: Timestamp, max_age: u64) -> bool {
        elapsed(now, self.cached_at) > max_age
    }

    /// Same comparison as [`is_expired`](Self::is_expired), used with the
    /// shorter refresh threshold.
    pub fn is_stale(&self, now: Timestamp, max_age: u64) -> bool {
        elapsed(now, self.cached_at) > max_age
    }

    pub fn mark_for_sync(self, error: Option<String>) -> Self {
        Self {
            sync: self.sync.mark_for_sync(error),
            ..self
        }
    }

    pub fn mark_rejected(self, error: String) -> Self {
        Self {
            sync: self.sync.mark_rejected(error),
            ..self
        }
    }

    /// Clear sync state and refresh `cached_at`.
    pub fn mark_as_synced(self, now: Timestamp) -> Self {
        Self {
            cached_at: now,
            sync: self.sync.mark_as_synced(),
            ..self
        }
    }

    pub fn retry_at(self, at: Option<Timestamp>) -> Self {
        Self {
            sync: self.sync.retry_at(at),
            ..self
        }
    }

    pub fn should_retry_sync(&self, max_attempts: u32) -> bool {
        self.sync.should_retry_sync(max_attempts)
    }

    pub fn needs_sync(&self) -> bool {
        self.sync.needs_sync
    }

    pub fn sync_attempts(&self) -> u32 {
        self.sync.sync_attempts
    }

    pub fn sync_error(&self) -> Option<&str> {
        self.sync.sync_error.as_deref()
    }
}

impl<T> SyncTracked for CacheEntry<T> {
    fn needs_sync(&self) -> bool {
        self.sync.needs_sync
    }

    fn is_optimistic(&self) -> bool {
        self.is_optimistic
    }

    fn touched_at(&self) -> Timestamp {
        self.cached_at
    }
}

/// An ordered list cached as one unit, e.g. the comments of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedList<T> {
    pub cached_at: Timestamp,
    pub items: Vec<T>,
}

impl<T> CachedList<T> {
    pub fn new(items: Vec<T>, now: Timestamp) -> Self {
        Self {
            cached_at: now,
            items,
        }
    }

    pub fn is_stale(&self, now: Timestamp, max_age: u64) -> bool {
        elapsed(now, self.cached_at) > max_age
    }
}

impl<T: SyncTracked> SyncTracked for CachedList<T> {
    fn needs_sync(&self) -> bool {
        self.items.iter().any(SyncTracked::needs_sync)
    }

    fn touched_at(&self) -> Timestamp {
        self.cached_at
    }
}

/// The ordered post ids matching a search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub query: String,
    pub post_ids: Vec<PostId>,
    pub cached_at: Timestamp,
}

impl SyncTracked for SearchResult {
    fn needs_sync(&self) -> bool {
        false
    }

    fn touched_at(&self) -> Timestamp {
        self.cached_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Post;
    use serde_json::json;

    fn post(id: PostId) -> Post {
        Post {
            id,
            user_id: 1,
            title: "T".into(),
            body: "B".into(),
        }
    }

    #[test]
    fn fetched_entry_is_clean() {
        let entry = CacheEntry::fetched(post(1), 1_000);
        assert!(!entry.needs_sync());
        assert_eq!(entry.sync_attempts(), 0);
        assert_eq!(entry.sync_error(), None);
        assert!(!entry.is_optimistic);
    }

    #[test]
    fn first_mark_without_error_keeps_zero_attempts() {
        let entry = CacheEntry::fetched(post(1), 1_000).mark_for_sync(None);
        assert!(entry.needs_sync());
        assert_eq!(entry.sync_attempts(), 0);
        assert_eq!(entry.sync_error(), None);
    }

    #[test]
    fn mark_with_error_counts_attempt() {
        let entry = CacheEntry::optimistic(post(-1001), 1_000)
            .mark_for_sync(Some("timeout".into()))
            .mark_for_sync(Some("connection refused".into()));
        assert_eq!(entry.sync_attempts(), 2);
        assert_eq!(entry.sync_error(), Some("connection refused"));
        assert_eq!(entry.sync.state(3), SyncState::Retrying);
    }

    #[test]
    fn mark_as_synced_resets_everything() {
        let entry = CacheEntry::optimistic(post(-1), 1_000)
            .mark_for_sync(Some("boom".into()))
            .retry_at(Some(9_000))
            .mark_as_synced(5_000);
        assert!(!entry.needs_sync());
        assert_eq!(entry.sync_attempts(), 0);
        assert_eq!(entry.sync_error(), None);
        assert_eq!(entry.sync.next_retry_at, None);
        assert_eq!(entry.cached_at, 5_000);
    }

    #[test]
    fn retry_ceiling() {
        let mut entry = CacheEntry::optimistic(post(-1), 0);
        for _ in 0..2 {
            entry = entry.mark_for_sync(Some("offline".into()));
        }
        assert!(entry.should_retry_sync(3));

        let entry = entry.mark_for_sync(Some("offline".into()));
        assert_eq!(entry.sync_attempts(), 3);
        assert!(!entry.should_retry_sync(3));
        assert_eq!(entry.sync.state(3), SyncState::Exhausted);
    }

    #[test]
    fn rejected_entries_are_never_retried() {
        let entry = CacheEntry::optimistic(post(-1), 0).mark_rejected("400 bad request".into());
        assert!(entry.needs_sync());
        assert_eq!(entry.sync_attempts(), 1);
        assert!(!entry.should_retry_sync(3));
        assert_eq!(entry.sync.state(3), SyncState::Rejected);
    }

    #[test]
    fn clean_entries_are_not_retried() {
        assert!(!CacheEntry::fetched(post(1), 0).should_retry_sync(3));
    }

    #[test]
    fn expiry_boundary_is_strict() {
        let entry = CacheEntry::fetched(post(1), 1_000);
        assert!(!entry.is_expired(1_000, 500));
        assert!(!entry.is_expired(1_500, 500));
        assert!(entry.is_expired(1_501, 500));
    }

    #[test]
    fn retry_due_respects_backoff() {
        let meta = SyncMeta::pending().retry_at(Some(2_000));
        assert!(!meta.is_retry_due(1_999));
        assert!(meta.is_retry_due(2_000));
        assert!(SyncMeta::pending().is_retry_due(0));
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = CacheEntry::optimistic(post(-1001), 42);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], json!(-1001));
        assert_eq!(value["userId"], json!(1));
        assert_eq!(value["cachedAt"], json!(42));
        assert_eq!(value["needsSync"], json!(true));
        assert_eq!(value["syncAttempts"], json!(0));
        assert_eq!(value["isOptimistic"], json!(true));
        assert!(value.get("syncError").is_none());

        let parsed: CacheEntry<Post> = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn list_needs_sync_if_any_item_does() {
        let clean = CacheEntry::fetched(post(1), 0);
        let dirty = CacheEntry::pending(post(2), 0);
        assert!(!CachedList::new(vec![clean.clone()], 0).needs_sync());
        assert!(CachedList::new(vec![clean, dirty], 0).needs_sync());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn retry_gate_matches_attempt_count(attempts in 0u32..10, max in 1u32..10) {
                let mut meta = SyncMeta::pending();
                for _ in 0..attempts {
                    meta = meta.mark_for_sync(Some("err".into()));
                }
                prop_assert_eq!(meta.sync_attempts, attempts);
                prop_assert_eq!(meta.should_retry_sync(max), attempts < max);
            }

            #[test]
            fn synced_meta_has_no_attempts(attempts in 0u32..10) {
                let mut meta = SyncMeta::pending();
                for _ in 0..attempts {
                    meta = meta.mark_for_sync(Some("err".into()));
                }
                let meta = meta.mark_as_synced();
                prop_assert!(!meta.needs_sync);
                prop_assert_eq!(meta.sync_attempts, 0);
                prop_assert!(meta.sync_error.is_none());
            }

            #[test]
            fn expiry_is_strictly_greater(
                cached_at in 0u64..1_000_000,
                age in 0u64..1_000_000,
                max_age in 0u64..1_000_000,
            ) {
                let entry = CacheEntry::fetched(post(1), cached_at);
                prop_assert_eq!(entry.is_expired(cached_at + age, max_age), age > max_age);
            }
        }
    }
}
