//! Draining `vectors_pending`, the upsert table fed by the event
//! triggers in [`crate::migrations`] (spec §4.3, §4.8).

use sqlx::SqlitePool;
use vc_core::model::VectorsPendingEntry;

#[derive(sqlx::FromRow)]
struct Row {
    doc_id: String,
    kind: String,
    ts_utc: String,
}

fn to_entry(row: Row) -> VectorsPendingEntry {
    let ts_utc = chrono::DateTime::parse_from_rfc3339(&row.ts_utc)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    VectorsPendingEntry {
        doc_id: row.doc_id,
        kind: row.kind,
        ts_utc,
    }
}

/// Fetch up to `limit` pending rows and delete them, atomically. A
/// caller that crashes after this call and before finishing its work
/// loses those rows from the pending set; they will be recreated on the
/// next write to the source table since the trigger fires again.
pub async fn drain(pool: &SqlitePool, limit: i64) -> Result<Vec<VectorsPendingEntry>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let rows: Vec<Row> = sqlx::query_as("SELECT doc_id, kind, ts_utc FROM vectors_pending ORDER BY ts_utc LIMIT ?")
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

    for row in &rows {
        sqlx::query("DELETE FROM vectors_pending WHERE doc_id = ?")
            .bind(&row.doc_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(rows.into_iter().map(to_entry).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::open_writable;
    use crate::migrations::ensure_catalog_schema;

    #[tokio::test]
    async fn drain_removes_fetched_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_writable(&dir.path().join("catalog.db")).await.unwrap();
        ensure_catalog_schema(&pool).await.unwrap();

        sqlx::query("INSERT INTO vectors_pending (doc_id, kind) VALUES ('movies:1', 'catalog_movie')")
            .execute(&pool)
            .await
            .unwrap();

        let drained = drain(&pool, 10).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].doc_id, "movies:1");

        let remaining: (i64,) = sqlx::query_as("SELECT count(*) FROM vectors_pending")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }
}
