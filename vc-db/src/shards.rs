//! Shard database resolution and a bounded pool cache.
//!
//! Grounded on `api/db.py`'s `_shard_path_for()`: an unknown drive
//! label (absent from the `drives` table) is a distinct failure mode
//! from a known label whose shard file is missing on disk — the former
//! maps to [`CatalogError::UnknownDrive`], the latter to
//! [`CatalogError::ShardMissing`].

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::debug;
use vc_core::{CatalogError, ResolvedPaths};

use crate::connect::open_read_only;

/// Cache of open shard pools, bounded by `max_open_shards`. Eviction is
/// least-recently-used by last-access instant, checked on insert.
pub struct ShardPools {
    paths: ResolvedPaths,
    catalog: SqlitePool,
    max_open_shards: usize,
    open: DashMap<String, (SqlitePool, Instant)>,
}

impl ShardPools {
    pub fn new(paths: ResolvedPaths, catalog: SqlitePool, max_open_shards: usize) -> Arc<Self> {
        Arc::new(Self {
            paths,
            catalog,
            max_open_shards: max_open_shards.max(1),
            open: DashMap::new(),
        })
    }

    /// Look up (or open) a read-only pool for `label`. Verifies the
    /// label exists in the catalog `drives` table before touching the
    /// filesystem, so an unknown label never gets confused with a
    /// missing file.
    pub async fn get(&self, label: &str) -> Result<SqlitePool, CatalogError> {
        if let Some(mut entry) = self.open.get_mut(label) {
            entry.1 = Instant::now();
            return Ok(entry.0.clone());
        }

        let known: Option<(String,)> = sqlx::query_as("SELECT label FROM drives WHERE label = ?")
            .bind(label)
            .fetch_optional(&self.catalog)
            .await?;
        if known.is_none() {
            return Err(CatalogError::UnknownDrive);
        }

        let shard_path = self.paths.shard_db_path(label);
        if !shard_path.exists() {
            return Err(CatalogError::ShardMissing);
        }

        let pool = open_read_only(&shard_path).await?;
        self.evict_if_full();
        self.open.insert(label.to_string(), (pool.clone(), Instant::now()));
        Ok(pool)
    }

    fn evict_if_full(&self) {
        if self.open.len() < self.max_open_shards {
            return;
        }
        let oldest = self
            .open
            .iter()
            .min_by_key(|entry| entry.value().1)
            .map(|entry| entry.key().clone());
        if let Some(label) = oldest {
            debug!(label, "evicting least-recently-used shard pool");
            if let Some((_, (pool, _))) = self.open.remove(&label) {
                tokio::spawn(async move {
                    pool.close().await;
                });
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::open_writable;
    use crate::migrations::ensure_catalog_schema;

    async fn setup() -> (tempfile::TempDir, Arc<ShardPools>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResolvedPaths::new(dir.path().to_path_buf());
        paths.ensure_structure().unwrap();
        let catalog = open_writable(&paths.catalog_db_path()).await.unwrap();
        ensure_catalog_schema(&catalog).await.unwrap();
        sqlx::query("INSERT INTO drives (label) VALUES ('A')")
            .execute(&catalog)
            .await
            .unwrap();

        let shard_pool = open_writable(&paths.shard_db_path("A")).await.unwrap();
        shard_pool.close().await;

        let shards = ShardPools::new(paths, catalog, 2);
        (dir, shards)
    }

    #[tokio::test]
    async fn unknown_label_is_distinct_from_missing_shard_file() {
        let (_dir, shards) = setup().await;
        let err = shards.get("nonexistent").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownDrive));
    }

    #[tokio::test]
    async fn known_label_without_shard_file_is_shard_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResolvedPaths::new(dir.path().to_path_buf());
        paths.ensure_structure().unwrap();
        let catalog = open_writable(&paths.catalog_db_path()).await.unwrap();
        ensure_catalog_schema(&catalog).await.unwrap();
        sqlx::query("INSERT INTO drives (label) VALUES ('B')")
            .execute(&catalog)
            .await
            .unwrap();

        let shards = ShardPools::new(paths, catalog, 2);
        let err = shards.get("B").await.unwrap_err();
        assert!(matches!(err, CatalogError::ShardMissing));
    }

    #[tokio::test]
    async fn known_label_with_shard_file_opens_successfully() {
        let (_dir, shards) = setup().await;
        let pool = shards.get("A").await.unwrap();
        assert_eq!(shards.open_count(), 1);
        pool.close().await;
    }
}
