//! Realtime quality-of-service monitor: push/drop/ai counters, WS/SSE
//! connection gauges, a 120s lag histogram, and a stale-client map,
//! flushed periodically to `web_metrics.db` (spec §4.6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use tracing::{debug, warn};

const LAG_WINDOW: Duration = Duration::from_secs(120);
const STALE_AFTER: Duration = Duration::from_secs(60);
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Counters {
    events_pushed_total: AtomicU64,
    events_dropped_total: AtomicU64,
    ai_requests_total: AtomicU64,
    ai_errors_total: AtomicU64,
    ws_connected: AtomicI64,
    sse_connected: AtomicI64,
}

pub struct RealtimeMonitor {
    metrics_pool: SqlitePool,
    counters: Counters,
    lag_samples_ms: Mutex<VecDeque<(DateTime<Utc>, i64)>>,
    last_seen: DashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitorSnapshot {
    pub events_pushed_total: u64,
    pub events_dropped_total: u64,
    pub ai_requests_total: u64,
    pub ai_errors_total: u64,
    pub ws_connected: i64,
    pub sse_connected: i64,
    pub lag_p50_ms: Option<i64>,
    pub lag_p95_ms: Option<i64>,
}

impl RealtimeMonitor {
    pub fn new(metrics_pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            metrics_pool,
            counters: Counters::default(),
            lag_samples_ms: Mutex::new(VecDeque::new()),
            last_seen: DashMap::new(),
        })
    }

    pub fn record_event_pushed(&self) {
        self.counters.events_pushed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_drop(&self) {
        self.counters.events_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ai_request(&self) {
        self.counters.ai_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ai_error(&self) {
        self.counters.ai_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self, transport: Transport) {
        match transport {
            Transport::WebSocket => self.counters.ws_connected.fetch_add(1, Ordering::Relaxed),
            Transport::Sse => self.counters.sse_connected.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn connection_closed(&self, transport: Transport) {
        match transport {
            Transport::WebSocket => self.counters.ws_connected.fetch_sub(1, Ordering::Relaxed),
            Transport::Sse => self.counters.sse_connected.fetch_sub(1, Ordering::Relaxed),
        };
    }

    /// Record event-delivery lag: `now - event.ts_utc`, clamped at zero.
    pub fn record_delivery_lag(&self, event_ts_utc: DateTime<Utc>) {
        let now = Utc::now();
        let lag_ms = (now - event_ts_utc).num_milliseconds().max(0);
        let mut samples = self.lag_samples_ms.lock();
        samples.push_back((now, lag_ms));
        prune_window(&mut samples, now);
    }

    pub fn touch_client(&self, client_id: &str) {
        self.last_seen.insert(client_id.to_string(), Utc::now());
    }

    pub fn is_stale(&self, client_id: &str) -> bool {
        match self.last_seen.get(client_id) {
            Some(last) => Utc::now().signed_duration_since(*last).num_seconds() > STALE_AFTER.as_secs() as i64,
            None => true,
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let now = Utc::now();
        let mut samples = self.lag_samples_ms.lock();
        prune_window(&mut samples, now);
        let mut sorted: Vec<i64> = samples.iter().map(|(_, ms)| *ms).collect();
        sorted.sort_unstable();
        let lag_p50_ms = percentile(&sorted, 0.50);
        let lag_p95_ms = percentile(&sorted, 0.95);
        MonitorSnapshot {
            events_pushed_total: self.counters.events_pushed_total.load(Ordering::Relaxed),
            events_dropped_total: self.counters.events_dropped_total.load(Ordering::Relaxed),
            ai_requests_total: self.counters.ai_requests_total.load(Ordering::Relaxed),
            ai_errors_total: self.counters.ai_errors_total.load(Ordering::Relaxed),
            ws_connected: self.counters.ws_connected.load(Ordering::Relaxed),
            sse_connected: self.counters.sse_connected.load(Ordering::Relaxed),
            lag_p50_ms,
            lag_p95_ms,
        }
    }

    /// Spawn the periodic flush task: writes the current snapshot as
    /// `(ts_utc, series, labels_json, value)` rows into `web_metrics.db`,
    /// independent of the broker's poll cadence.
    pub fn spawn_flush_task(self: &Arc<Self>, flush_interval: Option<Duration>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL);
        tokio::spawn(async move {
            ensure_metrics_schema(&monitor.metrics_pool).await.ok();
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = monitor.flush_once().await {
                    warn!(error = %err, "realtime monitor: metrics flush failed");
                }
            }
        })
    }

    async fn flush_once(&self) -> Result<(), sqlx::Error> {
        let snapshot = self.snapshot();
        let rows: [(&str, f64); 6] = [
            ("events_pushed_total", snapshot.events_pushed_total as f64),
            ("events_dropped_total", snapshot.events_dropped_total as f64),
            ("ai_requests_total", snapshot.ai_requests_total as f64),
            ("ai_errors_total", snapshot.ai_errors_total as f64),
            ("ws_connected", snapshot.ws_connected as f64),
            ("sse_connected", snapshot.sse_connected as f64),
        ];
        for (series, value) in rows {
            sqlx::query(
                "INSERT INTO metrics (ts_utc, series, labels_json, value) VALUES (strftime('%Y-%m-%dT%H:%M:%SZ','now'), ?, '{}', ?)",
            )
            .bind(series)
            .bind(value)
            .execute(&self.metrics_pool)
            .await?;
        }
        debug!(pushed = snapshot.events_pushed_total, dropped = snapshot.events_dropped_total, "realtime monitor: flushed metrics snapshot");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Transport {
    WebSocket,
    Sse,
}

fn prune_window(samples: &mut VecDeque<(DateTime<Utc>, i64)>, now: DateTime<Utc>) {
    while let Some((ts, _)) = samples.front() {
        if now.signed_duration_since(*ts).num_milliseconds() as u128 > LAG_WINDOW.as_millis() {
            samples.pop_front();
        } else {
            break;
        }
    }
}

fn percentile(sorted: &[i64], p: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted.get(rank).copied()
}

pub async fn ensure_metrics_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_utc TEXT NOT NULL,
            series TEXT NOT NULL,
            labels_json TEXT NOT NULL DEFAULT '{}',
            value REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_series_ts ON metrics(series, ts_utc)")
        .execute(pool)
        .await?;
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
    async fn counters_increment_independently() {
        let monitor = RealtimeMonitor::new(memory_pool().await);
        monitor.record_event_pushed();
        monitor.record_event_pushed();
        monitor.record_event_drop();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.events_pushed_total, 2);
        assert_eq!(snapshot.events_dropped_total, 1);
    }

    #[tokio::test]
    async fn connection_gauges_track_open_and_close() {
        let monitor = RealtimeMonitor::new(memory_pool().await);
        monitor.connection_opened(Transport::WebSocket);
        monitor.connection_opened(Transport::WebSocket);
        monitor.connection_closed(Transport::WebSocket);
        assert_eq!(monitor.snapshot().ws_connected, 1);
    }

    #[tokio::test]
    async fn stale_client_detected_without_recent_touch() {
        let monitor = RealtimeMonitor::new(memory_pool().await);
        assert!(monitor.is_stale("unknown-client"));
        monitor.touch_client("c1");
        assert!(!monitor.is_stale("c1"));
    }

    #[tokio::test]
    async fn flush_once_writes_rows_to_metrics_table() {
        let pool = memory_pool().await;
        ensure_metrics_schema(&pool).await.unwrap();
        let monitor = RealtimeMonitor::new(pool.clone());
        monitor.record_event_pushed();
        monitor.flush_once().await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT count(*) FROM metrics")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 6);
    }
}
