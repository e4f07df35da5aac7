//! `GET /v1/features`, `GET /v1/features/vector` (spec §4.4 operation 4).
//!
//! Vectors are stored packed as little-endian float32 blobs; anything
//! larger than `vector_inline_dim` (default 2048) is rejected with 400
//! unless the caller opts in with `raw=true`.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vc_core::model::{FeatureVectorMeta, VectorKind};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

const VECTOR_INLINE_DIM: i64 = 2048;

#[derive(Debug, Deserialize)]
pub struct FeaturesQuery {
    pub drive_label: String,
    pub path: Option<String>,
}

pub async fn list_features(State(state): State<AppState>, Query(params): Query<FeaturesQuery>) -> AppResult<Json<Vec<FeatureVectorMeta>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<(String, String, i64, i64, String)> = if let Some(path) = &params.path {
        sqlx::query_as("SELECT path, kind, dim, frames_used, updated_utc FROM feature_vectors WHERE path = ?")
            .bind(path)
            .fetch_all(&shard)
            .await?
    } else {
        sqlx::query_as("SELECT path, kind, dim, frames_used, updated_utc FROM feature_vectors ORDER BY path")
            .fetch_all(&shard)
            .await?
    };

    let metas = rows
        .into_iter()
        .filter_map(|(path, kind, dim, frames_used, updated_utc)| {
            let kind = match kind.as_str() {
                "image" => VectorKind::Image,
                "video" => VectorKind::Video,
                _ => return None,
            };
            let updated_utc = DateTime::parse_from_rfc3339(&updated_utc)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            Some(FeatureVectorMeta {
                path,
                kind,
                dim,
                frames_used,
                updated_utc,
            })
        })
        .collect();

    Ok(Json(metas))
}

#[derive(Debug, Deserialize)]
pub struct VectorQuery {
    pub drive_label: String,
    pub path: String,
    #[serde(default)]
    pub raw: bool,
}

#[derive(Debug, Serialize)]
pub struct VectorResponse {
    pub path: String,
    pub dim: i64,
    pub frames_used: i64,
    pub values: Option<Vec<f32>>,
    /// Always `false`: a vector whose `dim` exceeds `vector_inline_dim`
    /// without `raw=true` is rejected with 400 rather than returned
    /// with `values` withheld. Kept on the response for API stability.
    pub withheld: bool,
}

pub async fn get_vector(State(state): State<AppState>, Query(params): Query<VectorQuery>) -> AppResult<Json<VectorResponse>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let row: Option<(i64, i64, Vec<u8>)> = sqlx::query_as(
        "SELECT dim, frames_used, vector_blob FROM feature_vectors WHERE path = ?",
    )
    .bind(&params.path)
    .fetch_optional(&shard)
    .await?;

    let (dim, frames_used, blob) = row.ok_or_else(|| AppError::not_found(format!("no feature vector for {}", params.path)))?;

    if dim > VECTOR_INLINE_DIM && !params.raw {
        return Err(AppError::bad_request(format!(
            "vector dim {dim} exceeds vector_inline_dim ({VECTOR_INLINE_DIM}); retry with raw=true"
        )));
    }

    Ok(Json(VectorResponse {
        path: params.path,
        dim,
        frames_used,
        values: Some(decode_vector(&blob, dim)),
        withheld: false,
    }))
}

/// Decode a packed little-endian float32 blob, slicing defensively to
/// `dim * 4` bytes in case the stored blob is longer than declared.
fn decode_vector(blob: &[u8], dim: i64) -> Vec<f32> {
    let want_bytes = (dim.max(0) as usize) * 4;
    let usable = blob.len().min(want_bytes);
    blob[..usable]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_vector_truncates_to_declared_dim() {
        let mut blob = Vec::new();
        for value in [1.0f32, 2.0, 3.0, 4.0] {
            blob.extend_from_slice(&value.to_le_bytes());
        }
        let decoded = decode_vector(&blob, 2);
        assert_eq!(decoded, vec![1.0, 2.0]);
    }

    #[test]
    fn decode_vector_handles_short_blob_gracefully() {
        let blob = vec![0u8; 4];
        let decoded = decode_vector(&blob, 10);
        assert_eq!(decoded.len(), 1);
    }
}
