//! Local store: durable key/value persistence for cache entries, favorites,
//! metadata and search results.
//!
//! The store knows nothing about expiry or retries. It persists values under
//! namespaced keys (see [`feedsync_engine::keys`]) and keeps a small index of
//! each value's sync state so dirty and expired lookups stay cheap.

mod pool;
mod rows;
mod transaction;

pub use pool::Pool;
pub use transaction::StoreTransaction;

use feedsync_engine::{Namespace, SyncTracked, Timestamp};
use rows::{NamespaceCount, StoredEntry};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::SqliteConnection;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Storage failures. The only error this layer raises.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("local store is not open")]
    NotOpen,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt entry {key}: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    InvalidKey(#[from] feedsync_engine::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Which dirty entries to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyFilter {
    All,
    OptimisticOnly,
}

/// Entry counts per namespace, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub posts: usize,
    pub comments: usize,
    pub users: usize,
    pub favorites: usize,
    pub metadata: usize,
    pub search: usize,
    /// Entries in any namespace with unsynced changes
    pub dirty: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.posts + self.comments + self.users + self.favorites + self.metadata + self.search
    }
}

/// SQLite-backed store. Must be [`open`](LocalStore::open)ed before use.
#[derive(Debug)]
pub struct LocalStore {
    url: String,
    pool: OnceCell<Pool>,
}

impl LocalStore {
    /// A store for `url`, not yet opened.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: OnceCell::new(),
        }
    }

    /// A store backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Connect and create the schema. Opening twice is a no-op.
    pub async fn open(&self) -> Result<()> {
        self.pool
            .get_or_try_init(|| async {
                let pool = pool::create_pool(&self.url).await?;
                pool::run_migrations(&pool).await?;
                debug!(url = %self.url, "Local store opened");
                Ok::<_, StorageError>(pool)
            })
            .await?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.pool.initialized()
    }

    /// Fail with [`StorageError::NotOpen`] unless opened.
    pub fn ensure_open(&self) -> Result<()> {
        self.pool().map(|_| ())
    }

    fn pool(&self) -> Result<&Pool> {
        self.pool.get().ok_or(StorageError::NotOpen)
    }

    /// Read a value. A missing key is `Ok(None)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.pool()?.acquire().await?;
        fetch(&mut conn, key).await
    }

    /// The indexed `needs_sync` flag of a key, without decoding its value.
    /// `None` when the key is absent.
    pub async fn sync_flag(&self, key: &str) -> Result<Option<bool>> {
        let mut conn = self.pool()?.acquire().await?;
        fetch_sync_flag(&mut conn, key).await
    }

    /// Insert or overwrite a value. Last write wins.
    pub async fn put<T: Serialize + SyncTracked>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.pool()?.acquire().await?;
        upsert(&mut conn, key, value).await
    }

    /// Overwrite `key` with `value` only while it still holds `expected`
    /// (compared by encoded value). Returns whether the write happened.
    pub async fn put_if_unchanged<T: Serialize + SyncTracked>(
        &self,
        key: &str,
        expected: &T,
        value: &T,
    ) -> Result<bool> {
        let namespace = Namespace::of_key(key)?;
        let expected = encode(key, expected)?;
        let json = encode(key, value)?;

        let result = sqlx::query(
            "UPDATE cache_entries \
             SET value = ?, needs_sync = ?, optimistic = ?, touched_at = ? \
             WHERE namespace = ? AND key = ? AND value = ?",
        )
        .bind(json)
        .bind(value.needs_sync())
        .bind(value.is_optimistic())
        .bind(value.touched_at() as i64)
        .bind(namespace.as_str())
        .bind(key)
        .bind(expected)
        .execute(self.pool()?)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a value. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool()?.acquire().await?;
        remove(&mut conn, key).await
    }

    /// Delete `key` only while it still holds `expected`. Returns whether it
    /// was deleted.
    pub async fn delete_if_unchanged<T: Serialize>(
        &self,
        key: &str,
        expected: &T,
    ) -> Result<bool> {
        let namespace = Namespace::of_key(key)?;
        let expected = encode(key, expected)?;

        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE namespace = ? AND key = ? AND value = ?",
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(expected)
        .execute(self.pool()?)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Start a transaction. See [`StoreTransaction`].
    pub async fn begin(&self) -> Result<StoreTransaction> {
        let tx = self.pool()?.begin().await?;
        Ok(StoreTransaction::new(tx))
    }

    /// Remove every entry in a namespace that has no unsynced changes.
    pub async fn clear_clean(&self, namespace: Namespace) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND needs_sync = 0")
                .bind(namespace.as_str())
                .execute(self.pool()?)
                .await?;

        Ok(result.rows_affected())
    }

    /// All keys in a namespace, in key order.
    pub async fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        let mut conn = self.pool()?.acquire().await?;
        list_keys(&mut conn, namespace).await
    }

    /// All values in a namespace, in key order. Undecodable rows are skipped.
    pub async fn values<T: DeserializeOwned>(&self, namespace: Namespace) -> Result<Vec<T>> {
        let rows: Vec<StoredEntry> =
            sqlx::query_as("SELECT key, value FROM cache_entries WHERE namespace = ? ORDER BY key")
                .bind(namespace.as_str())
                .fetch_all(self.pool()?)
                .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match row.decode() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %row.key, error = %e, "Skipping undecodable entry");
                    None
                }
            })
            .collect())
    }

    /// Keys of dirty entries, oldest first.
    pub async fn dirty_keys(
        &self,
        namespace: Namespace,
        filter: DirtyFilter,
    ) -> Result<Vec<String>> {
        let sql = match filter {
            DirtyFilter::All => {
                "SELECT key FROM cache_entries \
                 WHERE namespace = ? AND needs_sync = 1 \
                 ORDER BY touched_at, key"
            }
            DirtyFilter::OptimisticOnly => {
                "SELECT key FROM cache_entries \
                 WHERE namespace = ? AND needs_sync = 1 AND optimistic = 1 \
                 ORDER BY touched_at, key"
            }
        };

        let keys: Vec<String> = sqlx::query_scalar(sql)
            .bind(namespace.as_str())
            .fetch_all(self.pool()?)
            .await?;

        Ok(keys)
    }

    /// Delete clean entries last touched strictly before `cutoff`.
    /// Dirty entries are never evicted.
    pub async fn evict_older_than(&self, namespace: Namespace, cutoff: Timestamp) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM cache_entries \
             WHERE namespace = ? AND needs_sync = 0 AND touched_at < ?",
        )
        .bind(namespace.as_str())
        .bind(cutoff as i64)
        .execute(self.pool()?)
        .await?;

        Ok(result.rows_affected())
    }

    /// Entry counts per namespace.
    pub async fn stats(&self) -> Result<StoreStats> {
        let rows: Vec<NamespaceCount> = sqlx::query_as(
            "SELECT namespace, COUNT(*) AS entries, SUM(needs_sync) AS dirty \
             FROM cache_entries GROUP BY namespace",
        )
        .fetch_all(self.pool()?)
        .await?;

        let mut stats = StoreStats::default();
        for row in rows {
            let entries = row.entries as usize;
            stats.dirty += row.dirty as usize;
            match Namespace::parse(&row.namespace) {
                Some(Namespace::Post) => stats.posts = entries,
                Some(Namespace::Comments) => stats.comments = entries,
                Some(Namespace::User) => stats.users = entries,
                Some(Namespace::Favorite) => stats.favorites = entries,
                Some(Namespace::CacheMeta) => stats.metadata = entries,
                Some(Namespace::Search) => stats.search = entries,
                None => warn!(namespace = %row.namespace, "Unknown namespace in store"),
            }
        }

        Ok(stats)
    }

    /// Reclaim space freed by deletions.
    pub async fn compact(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(self.pool()?).await?;
        Ok(())
    }

    /// Close the underlying pool. Later calls fail with a database error.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

const UPSERT: &str = "INSERT INTO cache_entries \
     (namespace, key, value, needs_sync, optimistic, touched_at) \
     VALUES (?, ?, ?, ?, ?, ?) \
     ON CONFLICT (namespace, key) DO UPDATE SET \
     value = excluded.value, \
     needs_sync = excluded.needs_sync, \
     optimistic = excluded.optimistic, \
     touched_at = excluded.touched_at";

async fn fetch<T: DeserializeOwned>(conn: &mut SqliteConnection, key: &str) -> Result<Option<T>> {
    let namespace = Namespace::of_key(key)?;
    let row: Option<StoredEntry> =
        sqlx::query_as("SELECT key, value FROM cache_entries WHERE namespace = ? AND key = ?")
            .bind(namespace.as_str())
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

    row.map(|row| row.decode()).transpose()
}

async fn fetch_sync_flag(conn: &mut SqliteConnection, key: &str) -> Result<Option<bool>> {
    let namespace = Namespace::of_key(key)?;
    let flag: Option<bool> = sqlx::query_scalar(
        "SELECT needs_sync FROM cache_entries WHERE namespace = ? AND key = ?",
    )
    .bind(namespace.as_str())
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(flag)
}

async fn upsert<T: Serialize + SyncTracked>(
    conn: &mut SqliteConnection,
    key: &str,
    value: &T,
) -> Result<()> {
    let namespace = Namespace::of_key(key)?;
    let json = encode(key, value)?;

    sqlx::query(UPSERT)
        .bind(namespace.as_str())
        .bind(key)
        .bind(json)
        .bind(value.needs_sync())
        .bind(value.is_optimistic())
        .bind(value.touched_at() as i64)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn remove(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let namespace = Namespace::of_key(key)?;
    let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND key = ?")
        .bind(namespace.as_str())
        .bind(key)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn list_keys(conn: &mut SqliteConnection, namespace: Namespace) -> Result<Vec<String>> {
    let keys: Vec<String> =
        sqlx::query_scalar("SELECT key FROM cache_entries WHERE namespace = ? ORDER BY key")
            .bind(namespace.as_str())
            .fetch_all(&mut *conn)
            .await?;

    Ok(keys)
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })
}
