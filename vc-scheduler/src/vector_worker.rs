//! Vector refresh worker: drains `vectors_pending` and either hands the
//! work to the job scheduler (deduplicated) or rebuilds the semantic
//! index in-process, depending on whether the orchestrator is enabled
//! for this job kind (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use vc_core::model::{ResourceClass, VectorsPendingEntry};

use crate::queue::{self, NewJob};

const VECTOR_REFRESH_KIND: &str = "vectors_refresh";

/// A single document ready to be embedded and indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub doc_id: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Pluggable semantic index backend (faiss/hnswlib in the original;
/// here, an injectable trait so the in-process fallback stays testable
/// without a real ANN library).
#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn upsert(&self, docs: &[IndexDocument]) -> Result<(), String>;
}

/// Deterministic cosine-similarity fallback: a dense in-memory matrix
/// with no external dependency, used when no real ANN backend is
/// configured. Embeddings are produced by a caller-supplied embedder
/// function rather than hardcoded here, since the choice of embedding
/// model is a runtime/assistant concern (spec §4.9), not this worker's.
pub struct CosineFallbackIndex {
    embed: Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>,
    entries: parking_lot::Mutex<Vec<(String, Vec<f32>, serde_json::Value)>>,
}

impl CosineFallbackIndex {
    pub fn new(embed: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        Self {
            embed: Box::new(embed),
            entries: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn document_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        let query_vec = (self.embed)(query);
        let entries = self.entries.lock();
        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .map(|(doc_id, vec, _)| (doc_id.clone(), cosine_similarity(&query_vec, vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

#[async_trait]
impl IndexBackend for CosineFallbackIndex {
    async fn upsert(&self, docs: &[IndexDocument]) -> Result<(), String> {
        let mut entries = self.entries.lock();
        for doc in docs {
            let vec = (self.embed)(&doc.text);
            if let Some(existing) = entries.iter_mut().find(|(id, _, _)| *id == doc.doc_id) {
                existing.1 = vec;
                existing.2 = doc.metadata.clone();
            } else {
                entries.push((doc.doc_id.clone(), vec, doc.metadata.clone()));
            }
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct VectorWorkerConfig {
    pub orchestrator_enabled: bool,
    pub batch_limit: i64,
    pub poll_interval: Duration,
}

/// One drain iteration: pop pending rows from the catalog DB, and for
/// each either enqueue a deduplicated `vectors_refresh` job on the
/// orchestrator DB, or fall back to rebuilding in-process via
/// `backend`.
pub async fn drain_once(
    catalog_pool: &SqlitePool,
    orchestrator_pool: &SqlitePool,
    config: &VectorWorkerConfig,
    backend: &dyn IndexBackend,
    load_document: impl Fn(&VectorsPendingEntry) -> Option<IndexDocument>,
) -> Result<usize, sqlx::Error> {
    let pending = vc_db::vectors_pending::drain(catalog_pool, config.batch_limit).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    if config.orchestrator_enabled {
        let in_flight = queue::count_in_flight(orchestrator_pool, VECTOR_REFRESH_KIND).await?;
        if in_flight == 0 {
            queue::enqueue(
                orchestrator_pool,
                &NewJob {
                    kind: VECTOR_REFRESH_KIND.to_string(),
                    payload: json!({ "doc_ids": pending.iter().map(|p| &p.doc_id).collect::<Vec<_>>() }),
                    priority: 0,
                    resource: ResourceClass::HeavyAiGpu,
                    max_attempts: 3,
                },
            )
            .await?;
            info!(count = pending.len(), "vector worker: enqueued vectors_refresh job");
        } else {
            info!(count = pending.len(), "vector worker: vectors_refresh already in flight, skipping enqueue");
        }
        return Ok(pending.len());
    }

    let docs: Vec<IndexDocument> = pending.iter().filter_map(|entry| load_document(entry)).collect();
    if !docs.is_empty() {
        if let Err(err) = backend.upsert(&docs).await {
            warn!(error = %err, "vector worker: in-process index rebuild failed");
        }
    }
    Ok(pending.len())
}

pub fn spawn(
    catalog_pool: SqlitePool,
    orchestrator_pool: SqlitePool,
    config: VectorWorkerConfig,
    backend: Arc<dyn IndexBackend>,
    load_document: impl Fn(&VectorsPendingEntry) -> Option<IndexDocument> + Send + Sync + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match drain_once(&catalog_pool, &orchestrator_pool, &config, backend.as_ref(), &load_document).await {
                Ok(0) => {}
                Ok(n) => info!(drained = n, "vector worker: drain cycle processed entries"),
                Err(err) => warn!(error = %err, "vector worker: drain cycle failed"),
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ensure_schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use vc_db::migrations::ensure_catalog_schema;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn drain_enqueues_job_when_orchestrator_enabled() {
        let catalog = memory_pool().await;
        ensure_catalog_schema(&catalog).await.unwrap();
        let orchestrator = memory_pool().await;
        ensure_schema(&orchestrator).await.unwrap();

        sqlx::query("INSERT INTO vectors_pending (doc_id, kind) VALUES ('movies:1', 'catalog_movie')")
            .execute(&catalog)
            .await
            .unwrap();

        let backend = CosineFallbackIndex::new(|_| vec![0.0; 4]);
        let config = VectorWorkerConfig {
            orchestrator_enabled: true,
            batch_limit: 100,
            poll_interval: Duration::from_secs(1),
        };

        let processed = drain_once(&catalog, &orchestrator, &config, &backend, |_| None)
            .await
            .unwrap();
        assert_eq!(processed, 1);

        let in_flight = queue::count_in_flight(&orchestrator, VECTOR_REFRESH_KIND).await.unwrap();
        assert_eq!(in_flight, 1);
    }

    #[tokio::test]
    async fn drain_rebuilds_in_process_when_orchestrator_disabled() {
        let catalog = memory_pool().await;
        ensure_catalog_schema(&catalog).await.unwrap();
        let orchestrator = memory_pool().await;
        ensure_schema(&orchestrator).await.unwrap();

        sqlx::query("INSERT INTO vectors_pending (doc_id, kind) VALUES ('movies:1', 'catalog_movie')")
            .execute(&catalog)
            .await
            .unwrap();

        let backend = CosineFallbackIndex::new(|text| vec![text.len() as f32, 1.0]);
        let config = VectorWorkerConfig {
            orchestrator_enabled: false,
            batch_limit: 100,
            poll_interval: Duration::from_secs(1),
        };

        let processed = drain_once(&catalog, &orchestrator, &config, &backend, |entry| {
            Some(IndexDocument {
                doc_id: entry.doc_id.clone(),
                text: "a movie title".to_string(),
                metadata: json!({}),
            })
        })
        .await
        .unwrap();
        assert_eq!(processed, 1);

        let results = backend.search("a movie title", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "movies:1");
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }
}
