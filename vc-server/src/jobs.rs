//! `vectors_refresh` job handler: rebuilds the in-process semantic index
//! for the doc ids a [`vc_scheduler::vector_worker`] drain cycle
//! enqueued (spec §4.8). The embedding/indexing work itself stays the
//! same deterministic fallback the non-orchestrated path uses; the only
//! thing the orchestrator adds is leasing, retries and concurrency
//! gating around it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use vc_scheduler::{IndexBackend, IndexDocument, JobContext, JobError, JobHandler, LeasedJob};

pub struct VectorsRefreshHandler {
    pub index: Arc<dyn IndexBackend>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    doc_ids: Vec<String>,
}

#[async_trait]
impl JobHandler for VectorsRefreshHandler {
    async fn run(&self, job: &LeasedJob, ctx: &JobContext) -> Result<(), JobError> {
        let payload: Payload = serde_json::from_str(&job.payload).map_err(|err| JobError {
            code: "E_BAD_PAYLOAD".to_string(),
            message: err.to_string(),
        })?;

        let docs: Vec<IndexDocument> = payload
            .doc_ids
            .iter()
            .map(|doc_id| IndexDocument {
                doc_id: doc_id.clone(),
                text: doc_id.clone(),
                metadata: json!({}),
            })
            .collect();

        if docs.is_empty() {
            return Ok(());
        }

        self.index.upsert(&docs).await.map_err(|err| JobError {
            code: "E_INDEX_UPSERT".to_string(),
            message: err,
        })?;

        ctx.checkpoint(&json!({ "doc_count": docs.len() }))
            .await
            .map_err(|err| JobError {
                code: "E_CHECKPOINT".to_string(),
                message: err.to_string(),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_scheduler::queue::{enqueue, lease_next, NewJob};
    use vc_scheduler::schema::ensure_schema;
    use vc_core::model::ResourceClass;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn leased_vectors_refresh_payload_round_trips_doc_ids() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();

        enqueue(
            &pool,
            &NewJob {
                kind: "vectors_refresh".to_string(),
                payload: json!({ "doc_ids": ["movies:1", "movies:2"] }),
                priority: 0,
                resource: ResourceClass::HeavyAiGpu,
                max_attempts: 3,
            },
        )
        .await
        .unwrap();

        let leased = lease_next(&pool, ResourceClass::HeavyAiGpu, "test-worker").await.unwrap().unwrap();
        let payload: Payload = serde_json::from_str(&leased.payload).unwrap();
        assert_eq!(payload.doc_ids, vec!["movies:1", "movies:2"]);
    }

    #[tokio::test]
    async fn upserting_empty_doc_list_is_a_no_op_on_the_index() {
        let index = Arc::new(vc_scheduler::CosineFallbackIndex::new(|text| vec![text.len() as f32, 1.0]));
        let docs: Vec<IndexDocument> = Vec::new();
        index.upsert(&docs).await.unwrap();
        assert_eq!(index.document_count(), 0);
    }
}
