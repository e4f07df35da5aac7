//! Catalog event broker: one poller task fans `events_queue` rows out to
//! many bounded per-subscriber queues without ever blocking on a slow
//! reader. Ported from `api/events.py::CatalogEventBroker` (spec §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vc_core::model::CatalogEvent;
use vc_db::events::{fetch_events, latest_event_seq};

use crate::monitor::RealtimeMonitor;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 512;
const COALESCE_THRESHOLD: usize = 50;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct BrokerConfig {
    pub poll_interval: Duration,
    pub batch_limit: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_limit: 128,
        }
    }
}

pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<CatalogEvent>,
    broker: Arc<CatalogEventBroker>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.subscribers.remove(&self.id);
        debug!(subscriber_id = self.id, "catalog events: subscriber disconnected");
    }
}

pub struct CatalogEventBroker {
    pool: SqlitePool,
    poll_interval: Duration,
    batch_limit: i64,
    subscribers: DashMap<u64, mpsc::Sender<CatalogEvent>>,
    next_id: AtomicU64,
    last_seq: AtomicI64,
    stop: Notify,
    stopped: std::sync::atomic::AtomicBool,
    monitor: Option<Arc<RealtimeMonitor>>,
}

impl CatalogEventBroker {
    pub fn new(pool: SqlitePool, config: BrokerConfig, monitor: Option<Arc<RealtimeMonitor>>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            poll_interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            batch_limit: config.batch_limit.max(1),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            last_seq: AtomicI64::new(0),
            stop: Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
            monitor,
        })
    }

    /// Spawn the single polling task. Idempotent in the sense that the
    /// caller is expected to call this once at startup.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move { broker.run_loop().await })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }

    /// Register a subscriber. If `last_seq` is nonzero, synchronously
    /// replay events with `seq > last_seq` (bounded by `batch_limit`)
    /// before the subscriber starts receiving live events, so no event
    /// is missed across the transition.
    pub async fn subscribe(self: &Arc<Self>, last_seq: i64) -> Result<Subscription, sqlx::Error> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        if last_seq > 0 {
            let replay = fetch_events(&self.pool, last_seq, self.batch_limit).await?;
            for event in replay {
                // Replay happens before the subscriber is registered for
                // live fan-out, so plain `send` (not `try_send`) is fine:
                // nothing else is writing to this brand new channel yet.
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, tx);
        debug!(subscriber_id = id, "catalog events: subscriber registered");
        Ok(Subscription {
            id,
            receiver: rx,
            broker: Arc::clone(self),
        })
    }

    async fn run_loop(self: Arc<Self>) {
        info!("catalog events: polling loop started");
        self.last_seq
            .store(latest_event_seq(&self.pool).await.unwrap_or(0), Ordering::SeqCst);

        while !self.stopped.load(Ordering::SeqCst) {
            let last_seq = self.last_seq.load(Ordering::SeqCst);
            match fetch_events(&self.pool, last_seq, self.batch_limit).await {
                Ok(events) if !events.is_empty() => {
                    let max_seq = events.iter().map(|e| e.seq).max().unwrap_or(last_seq);
                    self.last_seq.store(max_seq.max(last_seq), Ordering::SeqCst);
                    self.broadcast(coalesce_events(events)).await;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "catalog events: poll failed"),
            }

            tokio::select! {
                _ = self.stop.notified() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("catalog events: polling loop stopped");
    }

    async fn broadcast(&self, events: Vec<CatalogEvent>) {
        if self.subscribers.is_empty() {
            return;
        }
        for event in events {
            let mut dead = Vec::new();
            for entry in self.subscribers.iter() {
                match entry.value().try_send(event.clone()) {
                    Ok(()) => {
                        if let Some(monitor) = &self.monitor {
                            monitor.record_event_pushed();
                        }
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscriber_id = *entry.key(), "catalog events: subscriber queue overflow, dropping event");
                        if let Some(monitor) = &self.monitor {
                            monitor.record_event_drop();
                        }
                        dead.push(*entry.key());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(*entry.key());
                    }
                }
            }
            for id in dead {
                self.subscribers.remove(&id);
            }
        }
    }
}

/// Coalesce a batch above [`COALESCE_THRESHOLD`] by `(kind, identifier)`,
/// keeping only the latest event per key but preserving the position of
/// each key's first occurrence (matches the original's dict-based
/// coalescing, which updates values in place without reordering keys).
fn coalesce_events(events: Vec<CatalogEvent>) -> Vec<CatalogEvent> {
    if events.len() <= COALESCE_THRESHOLD {
        return events;
    }
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, CatalogEvent> = HashMap::new();
    for event in events {
        let key = format!("{}:{}", event.kind, event.coalesce_identifier());
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.insert(key, event);
    }
    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn event(seq: i64, kind: &str, path: Option<&str>) -> CatalogEvent {
        let mut payload = BTreeMap::new();
        if let Some(p) = path {
            payload.insert("path".to_string(), json!(p));
        }
        CatalogEvent {
            seq,
            ts_utc: chrono::Utc::now(),
            kind: kind.to_string(),
            payload,
        }
    }

    #[test]
    fn small_batches_are_not_coalesced() {
        let events: Vec<_> = (0..10).map(|i| event(i, "catalog.movie.upsert", Some("/a"))).collect();
        let result = coalesce_events(events.clone());
        assert_eq!(result.len(), 10);
    }

    #[test]
    fn large_batch_keeps_latest_event_per_identifier() {
        let mut events = Vec::new();
        for i in 0..60 {
            events.push(event(i, "catalog.movie.upsert", Some("/same-path")));
        }
        events.push(event(60, "catalog.tv.upsert", Some("/other")));
        let result = coalesce_events(events);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].seq, 59);
        assert_eq!(result[1].seq, 60);
    }
}
