//! SQLite connection pool and schema.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Type alias for the database pool.
pub type Pool = SqlitePool;

/// Schema statements, applied in order on open.
///
/// `needs_sync`, `optimistic` and `touched_at` mirror fields inside `value`
/// so dirty lookups and time-based eviction are index scans.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        namespace   TEXT    NOT NULL,
        key         TEXT    NOT NULL,
        value       TEXT    NOT NULL,
        needs_sync  INTEGER NOT NULL DEFAULT 0,
        optimistic  INTEGER NOT NULL DEFAULT 0,
        touched_at  INTEGER NOT NULL,
        PRIMARY KEY (namespace, key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_cache_entries_dirty
        ON cache_entries (namespace, needs_sync, optimistic)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_cache_entries_touched
        ON cache_entries (namespace, touched_at)
    "#,
];

/// Open a pool for `url` (`sqlite://path.db` or `sqlite::memory:`).
///
/// A single connection is used: an in-memory database lives and dies with its
/// connection, and the store only ever serves one engine.
pub async fn create_pool(url: &str) -> Result<Pool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Create tables and indices if missing.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(*statement).execute(pool).await?;
    }
    Ok(())
}
