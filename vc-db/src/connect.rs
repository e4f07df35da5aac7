//! Connection option builders for catalog/shard SQLite databases: a
//! writable pool (WAL, busy-timeout) and a read-only pool (URI
//! read-only mode plus `query_only`/shared-cache pragmas) for the
//! shard databases this service never writes to (spec §4.2).

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Open a writable connection pool: `journal_mode=WAL`,
/// `busy_timeout >= 5000ms`, `synchronous=NORMAL` (safe under WAL).
pub async fn open_writable(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open a read-only connection pool against an existing database file.
/// Tries `mode=ro&cache=shared` URI semantics first; if the file cannot
/// be opened that way (e.g. missing), the caller is expected to have
/// already checked existence — this function does not create files.
///
/// `query_only` is also set explicitly so writes are rejected even if
/// the underlying driver's read-only URI handling is imperfect, matching
/// the original's `PRAGMA query_only = 1` fallback path.
pub async fn open_read_only(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
        .pragma("query_only", "1")
        .shared_cache(true);

    SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writable_pool_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let pool = open_writable(&path).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn read_only_pool_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let result = open_read_only(&path).await;
        assert!(result.is_err());
    }
}
