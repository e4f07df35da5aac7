//! Catalog-database schema and event triggers.
//!
//! Ported from `upgrade_db.py`'s `_ensure_catalog_schema` /
//! `_ensure_event_triggers`: the table list, the `_TRIGGER_TARGETS` /
//! `_VECTOR_KINDS` maps and the trigger SQL shape are carried verbatim
//! in meaning (spec §4.3); only the expression of the code (Rust string
//! building + `sqlx::query`) is new.

use sqlx::SqlitePool;

/// `(table, event_kind, columns forwarded into payload_json)`, exactly
/// `upgrade_db.py::_TRIGGER_TARGETS`.
const TRIGGER_TARGETS: &[(&str, &str, &[&str])] = &[
    (
        "movies",
        "catalog.movie.upsert",
        &["id", "item_id", "drive", "path", "folder_path", "updated_utc"],
    ),
    (
        "tv_series",
        "catalog.tv.upsert",
        &["id", "series_id", "drive", "title", "updated_utc"],
    ),
    (
        "tv_episodes",
        "catalog.tv.upsert",
        &["id", "series_id", "season_id", "episode_path", "drive", "updated_utc"],
    ),
    (
        "video_quality",
        "catalog.quality.upsert",
        &["path", "score", "updated_utc", "drive", "container", "duration_s"],
    ),
    (
        "textlite_preview",
        "catalog.textlite.upsert",
        &["path", "kind", "updated_utc", "bytes_sampled", "lines_sampled"],
    ),
];

/// Vector-doc kind per source table, `upgrade_db.py::_VECTOR_KINDS`.
const VECTOR_KINDS: &[(&str, &str)] = &[
    ("movies", "catalog_movie"),
    ("tv_series", "catalog_tv"),
    ("tv_episodes", "catalog_tv"),
    ("video_quality", "quality"),
    ("textlite_preview", "textlite"),
];

/// Column preference order used to derive a stable `doc_id`/identifier
/// when a table has no single obvious primary key column, mirroring
/// `upgrade_db.py::_identifier_expression`.
const IDENTIFIER_COLUMN_PREFERENCE: &[&str] =
    &["id", "item_id", "path", "folder_path", "episode_path", "series_id"];

fn identifier_expression(columns: &[&str]) -> String {
    for candidate in IDENTIFIER_COLUMN_PREFERENCE {
        if columns.contains(candidate) {
            return format!("NEW.{candidate}");
        }
    }
    "NEW.rowid".to_string()
}

fn vector_kind_for(table: &str) -> &'static str {
    VECTOR_KINDS
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, kind)| *kind)
        .unwrap_or("unknown")
}

fn payload_expr(columns: &[&str]) -> String {
    let parts: Vec<String> = columns
        .iter()
        .map(|c| format!("'{c}', NEW.{c}"))
        .collect();
    format!("json_object({})", parts.join(", "))
}

/// Idempotently create the catalog DB's core tables, then the
/// per-table event triggers, on a writable pool. Safe to call on every
/// startup.
pub async fn ensure_catalog_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    ensure_core_tables(pool).await?;
    ensure_drives_table(pool).await?;
    ensure_scheduler_tables(pool).await?;
    ensure_backups_table(pool).await?;
    for (table, _, _) in TRIGGER_TARGETS {
        ensure_table_triggers_if_exists(pool, table).await?;
    }
    Ok(())
}

async fn ensure_core_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS events_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_utc TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            kind TEXT NOT NULL,
            payload_json TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_queue_kind_seq ON events_queue(kind, seq)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS vectors_pending (
            doc_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            ts_utc TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn ensure_drives_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS drives (
            label TEXT PRIMARY KEY,
            type TEXT NOT NULL DEFAULT 'fixed',
            last_scan_utc TEXT
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn ensure_scheduler_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS inventory_stats (
            drive_label TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            total_count INTEGER NOT NULL,
            total_bytes INTEGER NOT NULL,
            computed_utc TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn ensure_backups_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS backups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            path TEXT NOT NULL,
            created_utc TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            size_bytes INTEGER
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Triggers only attach if the source table already exists: a fresh
/// catalog DB has no `movies`/`tv_series`/etc tables until a scanner
/// (out of scope here) creates them, and `CREATE TRIGGER` on a
/// nonexistent table fails, so each target is checked via
/// `sqlite_master` first.
async fn ensure_table_triggers_if_exists(pool: &SqlitePool, table: &str) -> Result<(), sqlx::Error> {
    let exists: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    if exists.is_none() {
        return Ok(());
    }

    let (_, kind, columns) = TRIGGER_TARGETS
        .iter()
        .find(|(t, _, _)| *t == table)
        .expect("table present in TRIGGER_TARGETS by construction");

    let identifier = identifier_expression(columns);
    let payload = payload_expr(columns);
    let vector_kind = vector_kind_for(table);

    for (suffix, event) in [("ai", "INSERT"), ("au", "UPDATE")] {
        let trigger_name = format!("trg_{table}_{suffix}_events");
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS {trigger_name}
             AFTER {event} ON {table}
             BEGIN
                INSERT INTO events_queue(kind, payload_json) VALUES ('{kind}', {payload});
                INSERT INTO vectors_pending(doc_id, kind) VALUES ('{table}:' || {identifier}, '{vector_kind}')
                    ON CONFLICT(doc_id) DO UPDATE SET ts_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now');
             END;"
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ensure_catalog_schema_creates_core_tables() {
        let pool = memory_pool().await;
        ensure_catalog_schema(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM sqlite_master WHERE name = 'events_queue'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn insert_into_movies_fires_trigger_and_enqueues_event() {
        let pool = memory_pool().await;
        ensure_catalog_schema(&pool).await.unwrap();

        sqlx::query(
            "CREATE TABLE movies (id INTEGER PRIMARY KEY, item_id TEXT, drive TEXT, path TEXT, folder_path TEXT, updated_utc TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        ensure_table_triggers_if_exists(&pool, "movies").await.unwrap();

        sqlx::query(
            "INSERT INTO movies (id, item_id, drive, path, folder_path, updated_utc) VALUES (1, 'm1', 'A', '/x.mkv', '/', '2025-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let events: Vec<(i64, String)> =
            sqlx::query_as("SELECT seq, kind FROM events_queue ORDER BY seq")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "catalog.movie.upsert");

        let pending: Vec<(String, String)> =
            sqlx::query_as("SELECT doc_id, kind FROM vectors_pending")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(pending, vec![("movies:1".to_string(), "catalog_movie".to_string())]);
    }

    #[tokio::test]
    async fn update_upserts_vectors_pending_instead_of_duplicating() {
        let pool = memory_pool().await;
        ensure_catalog_schema(&pool).await.unwrap();
        sqlx::query(
            "CREATE TABLE movies (id INTEGER PRIMARY KEY, item_id TEXT, drive TEXT, path TEXT, folder_path TEXT, updated_utc TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        ensure_table_triggers_if_exists(&pool, "movies").await.unwrap();

        sqlx::query(
            "INSERT INTO movies (id, item_id, drive, path, folder_path, updated_utc) VALUES (1, 'm1', 'A', '/x.mkv', '/', '2025-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("UPDATE movies SET path = '/y.mkv' WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();

        let pending_count: (i64,) = sqlx::query_as("SELECT count(*) FROM vectors_pending")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(pending_count.0, 1);

        let event_count: (i64,) = sqlx::query_as("SELECT count(*) FROM events_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(event_count.0, 2);
    }
}
