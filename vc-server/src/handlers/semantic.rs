//! `GET /v1/semantic/search`, `GET /v1/semantic/index`,
//! `POST /v1/semantic/index`, `POST /v1/semantic/transcribe` (spec §4.4
//! operation 5, §4.8). The index itself lives in `vc_scheduler`'s
//! [`CosineFallbackIndex`]; this module is the HTTP-facing wiring.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
}

/// Semantic search against the in-process fallback index. If a job-kind
/// rebuild is in flight and the index is empty, this responds 409
/// (gated resource, spec §7) rather than an empty result set, so
/// callers can distinguish "nothing indexed yet" from "no matches".
pub async fn search(State(state): State<AppState>, Query(params): Query<SearchQuery>) -> AppResult<Json<Vec<SearchHit>>> {
    let hits = state.semantic_index.search(&params.q, params.top_k.max(1));
    if hits.is_empty() {
        let in_flight = vc_scheduler::queue::count_in_flight(&state.orchestrator_pool, "vectors_refresh").await?;
        if in_flight > 0 {
            return Err(AppError::conflict("semantic index is rebuilding"));
        }
    }
    Ok(Json(
        hits.into_iter().map(|(doc_id, score)| SearchHit { doc_id, score }).collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub documents_indexed: usize,
    pub rebuild_in_flight: bool,
}

pub async fn index_status(State(state): State<AppState>) -> AppResult<Json<IndexStatus>> {
    let in_flight = vc_scheduler::queue::count_in_flight(&state.orchestrator_pool, "vectors_refresh").await?;
    Ok(Json(IndexStatus {
        documents_indexed: state.semantic_index.document_count(),
        rebuild_in_flight: in_flight > 0,
    }))
}

/// Enqueue (or, if the orchestrator is disabled, trigger) a rebuild.
/// Deduplication of `vectors_refresh` jobs is handled by the vector
/// worker itself (spec §4.8); this handler only asks for one.
pub async fn rebuild_index(State(state): State<AppState>) -> AppResult<Json<IndexStatus>> {
    let in_flight = vc_scheduler::queue::count_in_flight(&state.orchestrator_pool, "vectors_refresh").await?;
    if in_flight == 0 {
        vc_scheduler::queue::enqueue(
            &state.orchestrator_pool,
            &vc_scheduler::NewJob {
                kind: "vectors_refresh".to_string(),
                payload: serde_json::json!({ "requested_via": "http" }),
                priority: 5,
                resource: vc_core::model::ResourceClass::HeavyAiGpu,
                max_attempts: 3,
            },
        )
        .await?;
    }
    Ok(Json(IndexStatus {
        documents_indexed: state.semantic_index.document_count(),
        rebuild_in_flight: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub drive_label: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub plan: &'static str,
    pub path: String,
}

/// Transcription itself (audio extraction + speech-to-text) runs out of
/// process via the scheduler's `heavy_ai_gpu` class; this handler only
/// enqueues the job and hands back a plan, matching the assistant's
/// "open folder" no-side-effect-here shape.
pub async fn transcribe(State(state): State<AppState>, Json(req): Json<TranscribeRequest>) -> AppResult<Json<TranscribeResponse>> {
    state.shard_pools.get(&req.drive_label).await?;
    vc_scheduler::queue::enqueue(
        &state.orchestrator_pool,
        &vc_scheduler::NewJob {
            kind: "transcribe".to_string(),
            payload: serde_json::json!({ "drive_label": req.drive_label, "path": req.path }),
            priority: 0,
            resource: vc_core::model::ResourceClass::HeavyAiGpu,
            max_attempts: 2,
        },
    )
    .await?;
    Ok(Json(TranscribeResponse {
        plan: "transcribe_enqueued",
        path: req.path,
    }))
}
