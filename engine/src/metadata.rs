//! Per-collection cache metadata and aggregate statistics.

use crate::{clock::elapsed, entry::SyncTracked, CacheKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of data a cache key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Posts,
    Comments,
    Users,
    Search,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Posts,
        DataType::Comments,
        DataType::Users,
        DataType::Search,
    ];
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Posts => write!(f, "posts"),
            DataType::Comments => write!(f, "comments"),
            DataType::Users => write!(f, "users"),
            DataType::Search => write!(f, "search"),
        }
    }
}

/// Metadata for one logical collection or query result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub key: CacheKey,
    pub data_type: DataType,
    /// When the batch behind this key was written
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
    /// `None` never expires
    pub expires_at: Option<Timestamp>,
    pub access_count: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Survives cache-clear sweeps
    #[serde(default)]
    pub is_persistent: bool,
}

impl CacheMetadata {
    /// Metadata for a batch written at `now`, expiring after `ttl` if given.
    pub fn new(
        key: impl Into<CacheKey>,
        data_type: DataType,
        now: Timestamp,
        ttl: Option<u64>,
    ) -> Self {
        Self {
            key: key.into(),
            data_type,
            created_at: now,
            last_accessed_at: now,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl)),
            access_count: 0,
            tags: BTreeMap::new(),
            is_persistent: false,
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.is_persistent = true;
        self
    }

    /// True iff `expires_at` is set and already passed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// True iff not accessed for longer than `max_age`, regardless of expiry.
    pub fn is_stale(&self, now: Timestamp, max_age: u64) -> bool {
        elapsed(now, self.last_accessed_at) > max_age
    }

    /// Age of the cached batch.
    pub fn age(&self, now: Timestamp) -> u64 {
        elapsed(now, self.created_at)
    }

    /// Record a read.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Replace the batch behind this key, keeping usage history.
    pub fn renew(self, now: Timestamp, ttl: Option<u64>) -> Self {
        Self {
            created_at: now,
            last_accessed_at: now,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl)),
            ..self
        }
    }
}

impl SyncTracked for CacheMetadata {
    fn needs_sync(&self) -> bool {
        false
    }

    fn touched_at(&self) -> Timestamp {
        self.last_accessed_at
    }
}

/// Aggregate view over a set of metadata records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub total: usize,
    pub expired: usize,
    pub persistent: usize,
    pub by_type: BTreeMap<DataType, usize>,
    pub total_accesses: u64,
}

impl CacheStatistics {
    pub fn collect<'a>(
        metadata: impl IntoIterator<Item = &'a CacheMetadata>,
        now: Timestamp,
    ) -> Self {
        metadata
            .into_iter()
            .fold(Self::default(), |mut stats, meta| {
                stats.total += 1;
                if meta.is_expired(now) {
                    stats.expired += 1;
                }
                if meta.is_persistent {
                    stats.persistent += 1;
                }
                *stats.by_type.entry(meta.data_type).or_default() += 1;
                stats.total_accesses += meta.access_count;
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expiry_requires_deadline_in_the_past() {
        let never = CacheMetadata::new("posts:all", DataType::Posts, 1_000, None);
        assert!(!never.is_expired(u64::MAX));

        let meta = CacheMetadata::new("posts:all", DataType::Posts, 1_000, Some(500));
        assert_eq!(meta.expires_at, Some(1_500));
        assert!(!meta.is_expired(1_500));
        assert!(meta.is_expired(1_501));
    }

    #[test]
    fn staleness_tracks_last_access_not_expiry() {
        let mut meta = CacheMetadata::new("search:rust", DataType::Search, 0, None);
        assert!(meta.is_stale(101, 100));

        meta.touch(100);
        assert_eq!(meta.access_count, 1);
        assert!(!meta.is_stale(150, 100));
        assert!(!meta.is_expired(150));
    }

    #[test]
    fn renew_keeps_usage() {
        let mut meta = CacheMetadata::new("posts:all", DataType::Posts, 0, Some(10))
            .with_tag("page", "1")
            .persistent();
        meta.touch(5);
        meta.touch(6);

        let renewed = meta.renew(100, Some(10));
        assert_eq!(renewed.created_at, 100);
        assert_eq!(renewed.expires_at, Some(110));
        assert_eq!(renewed.access_count, 2);
        assert!(renewed.is_persistent);
        assert_eq!(renewed.tags.get("page").map(String::as_str), Some("1"));
    }

    #[test]
    fn statistics() {
        let metas = vec![
            CacheMetadata::new("posts:all", DataType::Posts, 0, Some(10)),
            CacheMetadata::new("search:a", DataType::Search, 0, None).persistent(),
            CacheMetadata::new("search:b", DataType::Search, 50, Some(100)),
        ];

        let stats = CacheStatistics::collect(&metas, 20);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.persistent, 1);
        assert_eq!(stats.by_type.get(&DataType::Search), Some(&2));
        assert_eq!(stats.by_type.get(&DataType::Users), None);
    }

    #[test]
    fn serialization_format() {
        let meta =
            CacheMetadata::new("search:rust", DataType::Search, 7, None).with_tag("query", "Rust");
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["dataType"], json!("search"));
        assert_eq!(value["lastAccessedAt"], json!(7));
        assert_eq!(value["tags"]["query"], json!("Rust"));
    }
}
