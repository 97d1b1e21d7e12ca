//! Row types for the `cache_entries` table.

use super::StorageError;
use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, Row};

/// A stored key/value row.
#[derive(Debug)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntry {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
        })
    }
}

impl StoredEntry {
    /// Decode the JSON value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_str(&self.value).map_err(|source| StorageError::Corrupt {
            key: self.key.clone(),
            source,
        })
    }
}

/// One row of the per-namespace statistics query.
#[derive(Debug)]
pub struct NamespaceCount {
    pub namespace: String,
    pub entries: i64,
    pub dirty: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for NamespaceCount {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(NamespaceCount {
            namespace: row.try_get("namespace")?,
            entries: row.try_get("entries")?,
            dirty: row.try_get("dirty")?,
        })
    }
}
