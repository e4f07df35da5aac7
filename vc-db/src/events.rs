//! Reading `events_queue` rows back out as [`vc_core::model::CatalogEvent`]
//! values. Grounded on `api/db.py`'s `fetch_events`/`latest_event_seq`.

use sqlx::SqlitePool;
use vc_core::model::CatalogEvent;

#[derive(sqlx::FromRow)]
struct EventRow {
    seq: i64,
    ts_utc: String,
    kind: String,
    payload_json: Option<String>,
}

fn to_catalog_event(row: EventRow) -> CatalogEvent {
    let payload = row
        .payload_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let ts_utc = chrono::DateTime::parse_from_rfc3339(&row.ts_utc)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    CatalogEvent {
        seq: row.seq,
        ts_utc,
        kind: row.kind,
        payload,
    }
}

/// Fetch up to `limit` events with `seq > last_seq`, ordered by `seq`.
pub async fn fetch_events(
    pool: &SqlitePool,
    last_seq: i64,
    limit: i64,
) -> Result<Vec<CatalogEvent>, sqlx::Error> {
    let rows: Vec<EventRow> = sqlx::query_as(
        "SELECT seq, ts_utc, kind, payload_json FROM events_queue WHERE seq > ? ORDER BY seq LIMIT ?",
    )
    .bind(last_seq)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(to_catalog_event).collect())
}

/// Highest `seq` currently in `events_queue`, or 0 if empty.
pub async fn latest_event_seq(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT max(seq) FROM events_queue")
        .fetch_one(pool)
        .await?;
    Ok(row.0.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::open_writable;
    use crate::migrations::ensure_catalog_schema;

    #[tokio::test]
    async fn fetch_events_returns_rows_after_last_seq_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_writable(&dir.path().join("catalog.db")).await.unwrap();
        ensure_catalog_schema(&pool).await.unwrap();

        for i in 0..3 {
            sqlx::query("INSERT INTO events_queue (kind, payload_json) VALUES (?, ?)")
                .bind(format!("kind.{i}"))
                .bind("{}")
                .execute(&pool)
                .await
                .unwrap();
        }

        let events = fetch_events(&pool, 1, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 2);
        assert_eq!(events[1].seq, 3);

        let latest = latest_event_seq(&pool).await.unwrap();
        assert_eq!(latest, 3);
    }
}
