//! `GET /v1/reports/{overview,top-extensions,largest-files,heaviest-folders,recent}`
//! (spec §4.4 operation 3). All operate over a single drive's shard.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DriveQuery {
    pub drive_label: String,
}

#[derive(Debug, Serialize)]
pub struct Overview {
    pub total_count: i64,
    pub total_bytes: i64,
    pub categories: i64,
    pub distinct_extensions: i64,
}

pub async fn overview(State(state): State<AppState>, Query(params): Query<DriveQuery>) -> AppResult<Json<Overview>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let row: (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT count(*), coalesce(sum(size_bytes), 0),
                count(DISTINCT category), count(DISTINCT ext)
         FROM inventory",
    )
    .fetch_one(&shard)
    .await?;
    Ok(Json(Overview {
        total_count: row.0,
        total_bytes: row.1,
        categories: row.2,
        distinct_extensions: row.3,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RankedQuery {
    pub drive_label: String,
    #[serde(default = "default_top_n")]
    pub limit: i64,
}

fn default_top_n() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ExtensionRank {
    pub ext: String,
    pub count: i64,
    pub total_bytes: i64,
    pub rank_by_count: i64,
    pub rank_by_bytes: i64,
}

/// Dense ranks (`DENSE_RANK`) by count and by bytes independently, so a
/// caller can sort client-side by either axis without a second query.
pub async fn top_extensions(State(state): State<AppState>, Query(params): Query<RankedQuery>) -> AppResult<Json<Vec<ExtensionRank>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<(String, i64, i64, i64, i64)> = sqlx::query_as(
        "SELECT ext, count(*) as cnt, coalesce(sum(size_bytes), 0) as bytes,
                dense_rank() OVER (ORDER BY count(*) DESC) as rank_count,
                dense_rank() OVER (ORDER BY coalesce(sum(size_bytes), 0) DESC) as rank_bytes
         FROM inventory
         WHERE ext IS NOT NULL
         GROUP BY ext
         ORDER BY cnt DESC
         LIMIT ?",
    )
    .bind(params.limit.max(1))
    .fetch_all(&shard)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(ext, count, total_bytes, rank_by_count, rank_by_bytes)| ExtensionRank {
                ext,
                count,
                total_bytes,
                rank_by_count,
                rank_by_bytes,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct LargestFile {
    pub path: String,
    pub size_bytes: i64,
}

pub async fn largest_files(State(state): State<AppState>, Query(params): Query<RankedQuery>) -> AppResult<Json<Vec<LargestFile>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT path, size_bytes FROM inventory ORDER BY size_bytes DESC LIMIT ?")
        .bind(params.limit.max(1))
        .fetch_all(&shard)
        .await?;
    Ok(Json(
        rows.into_iter().map(|(path, size_bytes)| LargestFile { path, size_bytes }).collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct HeaviestFoldersQuery {
    pub drive_label: String,
    #[serde(default = "default_depth")]
    pub depth: i64,
    #[serde(default = "default_top_n")]
    pub limit: i64,
}

fn default_depth() -> i64 {
    2
}

#[derive(Debug, Serialize)]
pub struct FolderWeight {
    pub folder: String,
    pub total_bytes: i64,
    pub file_count: i64,
}

/// Aggregates by the first `depth` path segments. Folder grouping is
/// computed in Rust rather than SQL string-splitting, since SQLite has
/// no portable "nth path component" function and this keeps the
/// aggregation readable.
pub async fn heaviest_folders(
    State(state): State<AppState>,
    Query(params): Query<HeaviestFoldersQuery>,
) -> AppResult<Json<Vec<FolderWeight>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT path, size_bytes FROM inventory")
        .fetch_all(&shard)
        .await?;

    let depth = params.depth.max(1) as usize;
    let mut totals: std::collections::HashMap<String, (i64, i64)> = std::collections::HashMap::new();
    for (path, size_bytes) in rows {
        let normalized = path.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() <= 1 {
            continue;
        }
        let folder_segments = &segments[..segments.len().saturating_sub(1).min(depth)];
        let folder = format!("/{}", folder_segments.join("/"));
        let entry = totals.entry(folder).or_insert((0, 0));
        entry.0 += size_bytes;
        entry.1 += 1;
    }

    let mut ranked: Vec<FolderWeight> = totals
        .into_iter()
        .map(|(folder, (total_bytes, file_count))| FolderWeight {
            folder,
            total_bytes,
            file_count,
        })
        .collect();
    ranked.sort_by(|a, b| b.total_bytes.cmp(&a.total_bytes));
    ranked.truncate(params.limit.max(1) as usize);
    Ok(Json(ranked))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub drive_label: String,
    #[serde(default = "default_recent_days")]
    pub days: i64,
}

fn default_recent_days() -> i64 {
    7
}

pub async fn recent_changes(State(state): State<AppState>, Query(params): Query<RecentQuery>) -> AppResult<Json<Vec<super::inventory::CategoryTotal>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<(Option<String>, i64, i64)> = sqlx::query_as(
        "SELECT category, count(*), coalesce(sum(size_bytes), 0) FROM inventory \
         WHERE mtime_utc >= strftime('%Y-%m-%dT%H:%M:%SZ', 'now', ?) GROUP BY category",
    )
    .bind(format!("-{} days", params.days.max(0)))
    .fetch_all(&shard)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(category, total_count, total_bytes)| super::inventory::CategoryTotal {
                category: category.unwrap_or_else(|| "other".to_string()),
                total_count,
                total_bytes,
            })
            .collect(),
    ))
}
