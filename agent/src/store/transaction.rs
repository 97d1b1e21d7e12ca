//! Multi-key writes that land together or not at all.

use super::{fetch, fetch_sync_flag, list_keys, remove, upsert, Result};
use feedsync_engine::{Namespace, SyncTracked};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Sqlite, Transaction};
use tracing::debug;

/// An open store transaction.
///
/// The store holds a single connection, so every other store call waits until
/// this is committed or dropped. Dropping without [`commit`](Self::commit)
/// rolls back.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction {
    pub(super) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        fetch(&mut self.tx, key).await
    }

    pub async fn sync_flag(&mut self, key: &str) -> Result<Option<bool>> {
        fetch_sync_flag(&mut self.tx, key).await
    }

    pub async fn keys(&mut self, namespace: Namespace) -> Result<Vec<String>> {
        list_keys(&mut self.tx, namespace).await
    }

    pub async fn put<T: Serialize + SyncTracked>(&mut self, key: &str, value: &T) -> Result<()> {
        upsert(&mut self.tx, key, value).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        remove(&mut self.tx, key).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        debug!("Store transaction committed");
        Ok(())
    }
}

impl std::fmt::Debug for StoreTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransaction").finish_non_exhaustive()
    }
}
