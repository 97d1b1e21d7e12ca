//! Cache metadata registry: one [`CacheMetadata`] record per logical
//! collection or query result set, stored under `cache-meta:<key>`.

use crate::store::{LocalStore, Result, StorageError};
use feedsync_engine::{
    keys, CacheMetadata, CacheStatistics, CachePolicy, Clock, DataType, Namespace,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MetadataRegistry {
    store: Arc<LocalStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl MetadataRegistry {
    pub fn new(store: Arc<LocalStore>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Metadata for `key`. Undecodable records read as missing.
    pub async fn get(&self, key: &str) -> Result<Option<CacheMetadata>> {
        match self.store.get(&keys::metadata(key)).await {
            Err(StorageError::Corrupt { key, source }) => {
                warn!(%key, error = %source, "Ignoring corrupt cache metadata");
                Ok(None)
            }
            other => other,
        }
    }

    /// Record that a fresh batch was written under `key`. Expires after the
    /// data type's max age. Existing usage history and tags are kept.
    pub async fn record(
        &self,
        key: &str,
        data_type: DataType,
        tags: &[(&str, &str)],
    ) -> Result<CacheMetadata> {
        let now = self.clock.now();
        let ttl = Some(self.policy.for_type(data_type).max_age);

        let mut meta = match self.get(key).await? {
            Some(existing) => CacheMetadata {
                data_type,
                ..existing.renew(now, ttl)
            },
            None => CacheMetadata::new(key, data_type, now, ttl),
        };
        for (name, value) in tags {
            meta.tags.insert(name.to_string(), value.to_string());
        }

        self.store.put(&keys::metadata(key), &meta).await?;
        debug!(%key, %data_type, "Cache metadata recorded");
        Ok(meta)
    }

    /// Record a read of `key`. Returns the updated metadata, if any.
    pub async fn touch(&self, key: &str) -> Result<Option<CacheMetadata>> {
        let Some(mut meta) = self.get(key).await? else {
            return Ok(None);
        };
        meta.touch(self.clock.now());
        self.store.put(&keys::metadata(key), &meta).await?;
        Ok(Some(meta))
    }

    /// Whether the batch behind `key` should be fetched again: it was never
    /// recorded, it expired, or it is older than its type's staleness
    /// threshold.
    pub async fn needs_refresh(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(match self.get(key).await? {
            None => true,
            Some(meta) => {
                meta.is_expired(now)
                    || meta.age(now) > self.policy.for_type(meta.data_type).stale_after
            }
        })
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.store.delete(&keys::metadata(key)).await
    }

    pub async fn all(&self) -> Result<Vec<CacheMetadata>> {
        self.store.values(Namespace::CacheMeta).await
    }

    /// Delete expired, non-persistent records.
    pub async fn evict_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        self.remove_where(|meta| !meta.is_persistent && meta.is_expired(now))
            .await
            .map(|removed| removed.len() as u64)
    }

    /// Delete non-persistent records not accessed for longer than `max_idle`.
    /// Returns what was removed so callers can drop the data behind it.
    pub async fn evict_unused(&self, max_idle: u64) -> Result<Vec<CacheMetadata>> {
        let now = self.clock.now();
        self.remove_where(|meta| !meta.is_persistent && meta.is_stale(now, max_idle))
            .await
    }

    /// Delete every non-persistent record.
    pub async fn clear(&self) -> Result<u64> {
        self.remove_where(|meta| !meta.is_persistent)
            .await
            .map(|removed| removed.len() as u64)
    }

    pub async fn statistics(&self) -> Result<CacheStatistics> {
        let all = self.all().await?;
        Ok(CacheStatistics::collect(&all, self.clock.now()))
    }

    async fn remove_where(
        &self,
        predicate: impl Fn(&CacheMetadata) -> bool,
    ) -> Result<Vec<CacheMetadata>> {
        let mut removed = Vec::new();
        for meta in self.all().await? {
            if predicate(&meta) && self.remove(&meta.key).await? {
                removed.push(meta);
            }
        }
        Ok(removed)
    }
}
