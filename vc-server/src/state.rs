//! Shared application state handed to every handler via `axum::State`:
//! a `Clone` struct of `Arc`-wrapped components, no process-global
//! statics.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use vc_assistant::{AssistantGate, AssistantSessions};
use vc_config::Settings;
use vc_core::ResolvedPaths;
use vc_db::ShardPools;
use vc_events::{CatalogEventBroker, RealtimeMonitor};
use vc_scheduler::{CosineFallbackIndex, Scheduler};

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub paths: Arc<ResolvedPaths>,
    pub catalog_pool: SqlitePool,
    pub orchestrator_pool: SqlitePool,
    pub shard_pools: Arc<ShardPools>,
    pub broker: Arc<CatalogEventBroker>,
    pub monitor: Arc<RealtimeMonitor>,
    pub scheduler: Arc<Scheduler>,
    pub semantic_index: Arc<CosineFallbackIndex>,
    pub assistant_gate: Arc<AssistantGate>,
    pub assistant_sessions: Arc<AssistantSessions>,
    pub started_at: Instant,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
