//! Job lease/heartbeat/finish state machine (spec §4.7). Every status
//! transition that could race across workers is expressed as a single
//! `UPDATE ... WHERE` whose `rows_affected()` determines whether this
//! caller actually won it, a SQL compare-and-set in place of an
//! in-memory priority queue since jobs here must survive a process
//! restart.

use serde_json::Value;
use sqlx::SqlitePool;
use vc_core::model::{JobStatus, ResourceClass};

#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub payload: Value,
    pub priority: i64,
    pub resource: ResourceClass,
    pub max_attempts: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeasedJob {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
}

/// Enqueue a job; returns its id.
pub async fn enqueue(pool: &SqlitePool, job: &NewJob) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO jobs (kind, payload, priority, resource, status, max_attempts)
         VALUES (?, ?, ?, ?, 'queued', ?)",
    )
    .bind(&job.kind)
    .bind(job.payload.to_string())
    .bind(job.priority)
    .bind(job.resource.as_str())
    .bind(job.max_attempts)
    .execute(pool)
    .await?;
    let id = result.last_insert_rowid();
    record_event(pool, id, None, "queued", None).await?;
    Ok(id)
}

/// Atomically lease the highest-priority queued job for `resource`.
/// Implemented as select-then-conditional-update so the CAS is a single
/// `UPDATE ... WHERE status = 'queued'`, making concurrent leasers race
/// on `rows_affected()` rather than on an observed snapshot.
pub async fn lease_next(
    pool: &SqlitePool,
    resource: ResourceClass,
    owner: &str,
) -> Result<Option<LeasedJob>, sqlx::Error> {
    loop {
        let candidate: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE status = 'queued' AND resource = ?
             AND (next_visible_utc IS NULL OR next_visible_utc <= strftime('%Y-%m-%dT%H:%M:%SZ','now'))
             ORDER BY priority DESC, id ASC LIMIT 1",
        )
        .bind(resource.as_str())
        .fetch_optional(pool)
        .await?;

        let Some((id,)) = candidate else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE jobs SET status = 'leased', lease_owner = ?, lease_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now'),
             heartbeat_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now'), started_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ? AND status = 'queued'",
        )
        .bind(owner)
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            record_event(pool, id, Some("queued"), "leased", Some(owner)).await?;
            let job: LeasedJob =
                sqlx::query_as("SELECT id, kind, payload, attempts, max_attempts FROM jobs WHERE id = ?")
                    .bind(id)
                    .fetch_one(pool)
                    .await?;
            return Ok(Some(job));
        }
        // Another worker won the race for this id; try again for the
        // next candidate.
    }
}

pub async fn mark_running(pool: &SqlitePool, job_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET status = 'running' WHERE id = ? AND status = 'leased'")
        .bind(job_id)
        .execute(pool)
        .await?;
    record_event(pool, job_id, Some("leased"), "running", None).await?;
    Ok(())
}

pub async fn heartbeat(pool: &SqlitePool, job_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET heartbeat_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn finish_ok(pool: &SqlitePool, job_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET status = 'done', ended_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    record_event(pool, job_id, Some("running"), "done", None).await?;
    Ok(())
}

/// Backoff delay before the job is retried: `min(max_s, base_s * 2^(attempts-1))`.
pub fn backoff_seconds(attempts: i64, base_s: i64, max_s: i64) -> i64 {
    let exp = attempts.max(1) - 1;
    let scaled = base_s.saturating_mul(1i64.checked_shl(exp as u32).unwrap_or(i64::MAX));
    scaled.min(max_s)
}

/// Record a failure: increments `attempts`, and either reschedules
/// (`queued`, when `attempts < max_attempts`) or terminates (`failed`).
/// The reschedule sets `next_visible_utc = now + backoff_seconds(...)`,
/// which `lease_next`'s `WHERE` clause honors, so a retried job is not
/// re-leased until its backoff has elapsed (spec §4.7, §7).
pub async fn finish_err(
    pool: &SqlitePool,
    job_id: i64,
    error_code: &str,
    error_msg: &str,
    backoff_base_s: i64,
    backoff_max_s: i64,
) -> Result<JobStatus, sqlx::Error> {
    let row: (i64, i64) = sqlx::query_as("SELECT attempts, max_attempts FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    let (attempts, max_attempts) = row;
    let new_attempts = attempts + 1;

    if new_attempts < max_attempts {
        let delay = backoff_seconds(new_attempts, backoff_base_s, backoff_max_s);
        sqlx::query(
            "UPDATE jobs SET status = 'queued', attempts = ?, lease_owner = NULL, lease_utc = NULL,
             next_visible_utc = strftime('%Y-%m-%dT%H:%M:%SZ', 'now', '+' || ? || ' seconds'),
             error_code = ?, error_msg = ? WHERE id = ?",
        )
        .bind(new_attempts)
        .bind(delay)
        .bind(error_code)
        .bind(error_msg)
        .bind(job_id)
        .execute(pool)
        .await?;
        record_event(pool, job_id, Some("running"), "queued", Some(error_msg)).await?;
        Ok(JobStatus::Queued)
    } else {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', attempts = ?, ended_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now'),
             error_code = ?, error_msg = ? WHERE id = ?",
        )
        .bind(new_attempts)
        .bind(error_code)
        .bind(error_msg)
        .bind(job_id)
        .execute(pool)
        .await?;
        record_event(pool, job_id, Some("running"), "failed", Some(error_msg)).await?;
        Ok(JobStatus::Failed)
    }
}

pub async fn cancel(pool: &SqlitePool, job_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET status = 'cancelled' WHERE id = ? AND status IN ('queued', 'leased', 'running')")
        .bind(job_id)
        .execute(pool)
        .await?;
    record_event(pool, job_id, None, "cancelled", None).await?;
    Ok(())
}

/// Reclaim jobs whose lease has expired: `now - heartbeat_utc >
/// lease_ttl_s`. Idempotent — only rows still `leased`/`running` with a
/// stale heartbeat are touched, so a concurrent reaper invocation that
/// loses the race on a given row simply reclaims zero rows for it.
pub async fn reclaim_expired_leases(pool: &SqlitePool, lease_ttl_s: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'queued', lease_owner = NULL, lease_utc = NULL
         WHERE status IN ('leased', 'running')
         AND heartbeat_utc IS NOT NULL
         AND (strftime('%s','now') - strftime('%s', heartbeat_utc)) > ?",
    )
    .bind(lease_ttl_s)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn upsert_checkpoint(pool: &SqlitePool, job_id: i64, ckpt: &Value) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO job_checkpoints (job_id, ckpt_json, updated_utc) VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(job_id) DO UPDATE SET ckpt_json = excluded.ckpt_json, updated_utc = excluded.updated_utc",
    )
    .bind(job_id)
    .bind(ckpt.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_checkpoint(pool: &SqlitePool, job_id: i64) -> Result<Option<Value>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT ckpt_json FROM job_checkpoints WHERE job_id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|(raw,)| serde_json::from_str(&raw).ok()))
}

/// Count jobs of `kind` currently in an in-flight status, used by the
/// vector worker to deduplicate refresh jobs (spec §4.8).
pub async fn count_in_flight(pool: &SqlitePool, kind: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM jobs WHERE kind = ? AND status IN ('queued', 'leased', 'running')",
    )
    .bind(kind)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

async fn record_event(
    pool: &SqlitePool,
    job_id: i64,
    from_status: Option<&str>,
    to_status: &str,
    detail: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO job_events (job_id, from_status, to_status, detail) VALUES (?, ?, ?, ?)")
        .bind(job_id)
        .bind(from_status)
        .bind(to_status)
        .bind(detail)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ensure_schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use vc_core::model::ResourceClass;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn lease_next_claims_highest_priority_queued_job() {
        let pool = memory_pool().await;
        enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".into(),
                payload: serde_json::json!({}),
                priority: 1,
                resource: ResourceClass::HeavyAiGpu,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();
        enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".into(),
                payload: serde_json::json!({}),
                priority: 5,
                resource: ResourceClass::HeavyAiGpu,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();

        let leased = lease_next(&pool, ResourceClass::HeavyAiGpu, "worker-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.attempts, 0);

        let row: (i64,) = sqlx::query_as("SELECT priority FROM jobs WHERE id = ?")
            .bind(leased.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 5);
    }

    #[tokio::test]
    async fn two_concurrent_leases_never_both_succeed_on_same_job() {
        let pool = memory_pool().await;
        let id = enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".into(),
                payload: serde_json::json!({}),
                priority: 0,
                resource: ResourceClass::LightCpu,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();

        let first = lease_next(&pool, ResourceClass::LightCpu, "w1").await.unwrap();
        let second = lease_next(&pool, ResourceClass::LightCpu, "w2").await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(first.unwrap().id, id);
    }

    #[tokio::test]
    async fn reclaim_expired_leases_returns_job_to_queued() {
        let pool = memory_pool().await;
        enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".into(),
                payload: serde_json::json!({}),
                priority: 0,
                resource: ResourceClass::IoLight,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();
        let leased = lease_next(&pool, ResourceClass::IoLight, "w1").await.unwrap().unwrap();

        sqlx::query("UPDATE jobs SET heartbeat_utc = strftime('%Y-%m-%dT%H:%M:%SZ','now', '-300 seconds') WHERE id = ?")
            .bind(leased.id)
            .execute(&pool)
            .await
            .unwrap();

        let reclaimed = reclaim_expired_leases(&pool, 120).await.unwrap();
        assert_eq!(reclaimed, 1);

        let status: (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(leased.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status.0, "queued");
    }

    #[tokio::test]
    async fn finish_err_retries_until_max_attempts_then_fails() {
        let pool = memory_pool().await;
        enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".into(),
                payload: serde_json::json!({}),
                priority: 0,
                resource: ResourceClass::IoLight,
                max_attempts: 2,
            },
        )
        .await
        .unwrap();
        let leased = lease_next(&pool, ResourceClass::IoLight, "w1").await.unwrap().unwrap();

        let status = finish_err(&pool, leased.id, "E_TEST", "boom", 0, 0).await.unwrap();
        assert_eq!(status, JobStatus::Queued);

        let leased_again = lease_next(&pool, ResourceClass::IoLight, "w1").await.unwrap().unwrap();
        let status = finish_err(&pool, leased_again.id, "E_TEST", "boom again", 0, 0).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn finish_err_with_nonzero_backoff_delays_release() {
        let pool = memory_pool().await;
        enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".into(),
                payload: serde_json::json!({}),
                priority: 0,
                resource: ResourceClass::IoLight,
                max_attempts: 5,
            },
        )
        .await
        .unwrap();
        let leased = lease_next(&pool, ResourceClass::IoLight, "w1").await.unwrap().unwrap();

        let status = finish_err(&pool, leased.id, "E_TEST", "boom", 60, 300).await.unwrap();
        assert_eq!(status, JobStatus::Queued);

        let not_yet = lease_next(&pool, ResourceClass::IoLight, "w1").await.unwrap();
        assert!(not_yet.is_none(), "job with future next_visible_utc must not be re-leasable yet");
    }

    #[test]
    fn backoff_seconds_doubles_and_caps() {
        assert_eq!(backoff_seconds(1, 2, 300), 2);
        assert_eq!(backoff_seconds(2, 2, 300), 4);
        assert_eq!(backoff_seconds(3, 2, 300), 8);
        assert_eq!(backoff_seconds(10, 2, 300), 300);
    }
}
