//! Reaper task: reclaims leases whose heartbeat has gone stale past
//! `lease_ttl_s`, running once per `heartbeat_s` interval (spec §4.7).

use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{debug, warn};

pub fn spawn(pool: SqlitePool, heartbeat_interval: Duration, lease_ttl_s: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            match crate::queue::reclaim_expired_leases(&pool, lease_ttl_s).await {
                Ok(0) => {}
                Ok(n) => debug!(reclaimed = n, "scheduler: reaper reclaimed expired leases"),
                Err(err) => warn!(error = %err, "scheduler: reaper failed"),
            }
        }
    })
}
