//! Executor tasks: one task per resource-class concurrency slot, each
//! looping lease → run → finish. Concurrency is gated by a
//! `tokio::sync::Semaphore` per [`ResourceClass`], sized from
//! `orchestrator.concurrency.*` (spec §4.7), each task polling the SQL
//! lease queue rather than an in-memory channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use vc_core::model::ResourceClass;

use crate::queue::{self, LeasedJob};

/// A unit of work a job kind knows how to run. Implementors decide how
/// to interpret `payload`; they report checkpoints back through
/// `ctx.checkpoint` so a reclaimed job can resume.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &LeasedJob, ctx: &JobContext) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

pub struct JobContext {
    pool: SqlitePool,
    job_id: i64,
}

impl JobContext {
    pub async fn checkpoint(&self, value: &Value) -> Result<(), sqlx::Error> {
        queue::upsert_checkpoint(&self.pool, self.job_id, value).await
    }

    pub async fn last_checkpoint(&self) -> Result<Option<Value>, sqlx::Error> {
        queue::load_checkpoint(&self.pool, self.job_id).await
    }
}

/// Probes whether the GPU is currently usable for a `heavy_ai_gpu` job.
/// Implemented by `vc-assistant`'s real GPU probe; the scheduler only
/// needs the yes/no answer, not the probing mechanics, so this trait
/// keeps the two crates decoupled.
pub trait GpuGate: Send + Sync {
    fn gpu_ready(&self, safety_margin_mb: u64) -> bool;
}

/// Always reports the GPU unavailable; used when `gpu.policy =
/// CPU_ONLY` or when no real gate has been wired up.
pub struct NoGpuGate;

impl GpuGate for NoGpuGate {
    fn gpu_ready(&self, _safety_margin_mb: u64) -> bool {
        false
    }
}

pub struct ConcurrencyLimits {
    pub heavy_ai_gpu: usize,
    pub light_cpu: usize,
    pub io_light: usize,
}

pub struct Scheduler {
    pool: SqlitePool,
    handlers: dashmap::DashMap<String, Arc<dyn JobHandler>>,
    semaphores: dashmap::DashMap<&'static str, Arc<Semaphore>>,
    gpu_gate: Arc<dyn GpuGate>,
    heartbeat_interval: Duration,
    gpu_safety_margin_mb: u64,
    backoff_base_s: i64,
    backoff_max_s: i64,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        limits: ConcurrencyLimits,
        gpu_gate: Arc<dyn GpuGate>,
        heartbeat_interval: Duration,
        gpu_safety_margin_mb: u64,
        backoff_base_s: i64,
        backoff_max_s: i64,
    ) -> Arc<Self> {
        let semaphores = dashmap::DashMap::new();
        semaphores.insert("heavy_ai_gpu", Arc::new(Semaphore::new(limits.heavy_ai_gpu.max(1))));
        semaphores.insert("light_cpu", Arc::new(Semaphore::new(limits.light_cpu.max(1))));
        semaphores.insert("io_light", Arc::new(Semaphore::new(limits.io_light.max(1))));
        Arc::new(Self {
            pool,
            handlers: dashmap::DashMap::new(),
            semaphores,
            gpu_gate,
            heartbeat_interval,
            gpu_safety_margin_mb,
            backoff_base_s,
            backoff_max_s,
        })
    }

    pub fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Spawn one executor task per resource class. Each loops
    /// indefinitely: acquire a concurrency permit, lease a job of that
    /// class, run it, release the permit.
    pub fn spawn_executors(self: &Arc<Self>, worker_id_prefix: &str) -> Vec<tokio::task::JoinHandle<()>> {
        [ResourceClass::HeavyAiGpu, ResourceClass::LightCpu, ResourceClass::IoLight]
            .into_iter()
            .map(|class| {
                let scheduler = Arc::clone(self);
                let owner = format!("{worker_id_prefix}-{}", class.as_str());
                tokio::spawn(async move { scheduler.executor_loop(class, owner).await })
            })
            .collect()
    }

    async fn executor_loop(self: Arc<Self>, class: ResourceClass, owner: String) {
        let semaphore = self.semaphores.get(class.as_str()).expect("semaphore present for class").clone();
        loop {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            if class == ResourceClass::HeavyAiGpu && !self.gpu_gate.gpu_ready(self.gpu_safety_margin_mb) {
                drop(permit);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            match queue::lease_next(&self.pool, class, &owner).await {
                Ok(Some(job)) => {
                    self.run_leased_job(job, owner.clone()).await;
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "scheduler: lease attempt failed");
                    drop(permit);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }
            drop(permit);
        }
    }

    async fn run_leased_job(&self, job: LeasedJob, owner: String) {
        let Some(handler) = self.handlers.get(&job.kind).map(|h| Arc::clone(h.value())) else {
            warn!(kind = %job.kind, "scheduler: no handler registered, failing job");
            let _ = queue::finish_err(
                &self.pool,
                job.id,
                "E_NO_HANDLER",
                "no handler registered for job kind",
                self.backoff_base_s,
                self.backoff_max_s,
            )
            .await;
            return;
        };

        if queue::mark_running(&self.pool, job.id).await.is_err() {
            return;
        }

        let heartbeat_pool = self.pool.clone();
        let job_id = job.id;
        let interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if queue::heartbeat(&heartbeat_pool, job_id).await.is_err() {
                    return;
                }
            }
        });

        let ctx = JobContext {
            pool: self.pool.clone(),
            job_id: job.id,
        };
        let result = handler.run(&job, &ctx).await;
        heartbeat_task.abort();

        match result {
            Ok(()) => {
                if let Err(err) = queue::finish_ok(&self.pool, job.id).await {
                    error!(error = %err, job_id = job.id, "scheduler: failed to record job completion");
                }
                info!(job_id = job.id, owner = %owner, kind = %job.kind, "scheduler: job completed");
            }
            Err(err) => {
                if let Err(db_err) = queue::finish_err(
                    &self.pool,
                    job.id,
                    &err.code,
                    &err.message,
                    self.backoff_base_s,
                    self.backoff_max_s,
                )
                .await
                {
                    error!(error = %db_err, job_id = job.id, "scheduler: failed to record job failure");
                }
                warn!(job_id = job.id, owner = %owner, kind = %job.kind, code = %err.code, "scheduler: job failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{enqueue, NewJob};
    use crate::schema::ensure_schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self, _job: &LeasedJob, _ctx: &JobContext) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn executor_runs_registered_handler_and_marks_done() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();

        enqueue(
            &pool,
            &NewJob {
                kind: "noop".into(),
                payload: serde_json::json!({}),
                priority: 0,
                resource: ResourceClass::IoLight,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            pool.clone(),
            ConcurrencyLimits {
                heavy_ai_gpu: 1,
                light_cpu: 1,
                io_light: 1,
            },
            Arc::new(NoGpuGate),
            Duration::from_secs(5),
            8192,
            1,
            60,
        );
        scheduler.register_handler("noop", Arc::new(CountingHandler { runs: Arc::clone(&runs) }));

        let leased = queue::lease_next(&pool, ResourceClass::IoLight, "test-worker")
            .await
            .unwrap()
            .unwrap();
        scheduler.run_leased_job(leased.clone(), "test-worker".into()).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let status: (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(leased.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status.0, "done");
    }
}
