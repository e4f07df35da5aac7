//! `GET /v1/inventory`, `GET /v1/file`, `GET /v1/stats` (spec §4.4
//! operation 2): per-drive shard inventory listing, single-row lookup,
//! and category totals (snapshot-preferring, live-aggregate fallback).

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row};
use vc_core::model::InventoryRow;
use vc_core::pagination::{guarded_total, Page};
use vc_db::basename_expr;

use crate::errors::{AppError, AppResult};
use crate::query::{parse_since, FilterBuilder, PageParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InventoryQuery {
    pub drive_label: String,
    pub q: Option<String>,
    pub category: Option<String>,
    pub ext: Option<String>,
    pub mime: Option<String>,
    pub since: Option<String>,
    #[serde(flatten)]
    pub page: PageParams,
}

#[derive(FromRow)]
struct InventoryDbRow {
    path: String,
    size_bytes: i64,
    mtime_utc: String,
    ext: Option<String>,
    mime: Option<String>,
    category: Option<String>,
}

fn to_inventory_row(row: InventoryDbRow, drive_label: &str) -> InventoryRow {
    let mtime_utc = DateTime::parse_from_rfc3339(&row.mtime_utc)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    InventoryRow {
        path: row.path,
        size_bytes: row.size_bytes,
        mtime_utc,
        ext: row.ext,
        mime: row.mime,
        category: row.category.as_deref().and_then(vc_core::model::Category::parse),
        drive_label: drive_label.to_string(),
    }
}

pub async fn list_inventory(
    State(state): State<AppState>,
    Query(params): Query<InventoryQuery>,
) -> AppResult<Json<Page<InventoryRow>>> {
    let pagination = params.page.resolve(&state.settings);
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let since = parse_since(params.since.as_deref())?;

    let mut filter = FilterBuilder::new();
    let basename = basename_expr("path");
    if params.q.is_some() {
        filter.add(format!("(lower(path) LIKE ? OR {basename} LIKE ?)"));
    }
    if params.category.is_some() {
        filter.add("lower(category) = ?");
    }
    if params.ext.is_some() {
        filter.add("lower(ext) = ?");
    }
    if params.mime.is_some() {
        filter.add("lower(mime) = ?");
    }
    if since.is_some() {
        filter.add("mtime_utc >= ?");
    }
    let where_clause = filter.build();

    let sql = format!(
        "SELECT path, size_bytes, mtime_utc, ext, mime, category FROM inventory \
         WHERE {where_clause} ORDER BY path LIMIT ? OFFSET ?"
    );
    let mut query = sqlx::query_as::<_, InventoryDbRow>(&sql);
    if let Some(q) = &params.q {
        let pattern = format!("%{}%", q.to_ascii_lowercase());
        query = query.bind(pattern.clone()).bind(pattern);
    }
    if let Some(category) = &params.category {
        query = query.bind(category.to_ascii_lowercase());
    }
    if let Some(ext) = &params.ext {
        query = query.bind(ext.to_ascii_lowercase());
    }
    if let Some(mime) = &params.mime {
        query = query.bind(mime.to_ascii_lowercase());
    }
    if let Some(since) = since {
        query = query.bind(since.to_rfc3339());
    }
    let rows = query
        .bind(pagination.fetch_limit())
        .bind(pagination.offset)
        .fetch_all(&shard)
        .await?;

    let count_sql = format!("SELECT count(*) as c FROM inventory WHERE {where_clause}");
    let mut count_query = sqlx::query(&count_sql);
    if let Some(q) = &params.q {
        let pattern = format!("%{}%", q.to_ascii_lowercase());
        count_query = count_query.bind(pattern.clone()).bind(pattern);
    }
    if let Some(category) = &params.category {
        count_query = count_query.bind(category.to_ascii_lowercase());
    }
    if let Some(ext) = &params.ext {
        count_query = count_query.bind(ext.to_ascii_lowercase());
    }
    if let Some(mime) = &params.mime {
        count_query = count_query.bind(mime.to_ascii_lowercase());
    }
    if let Some(since) = since {
        count_query = count_query.bind(since.to_rfc3339());
    }
    let count_row = count_query.fetch_one(&shard).await?;
    let count: i64 = count_row.try_get("c")?;

    let rows: Vec<InventoryRow> = rows.into_iter().map(|r| to_inventory_row(r, &params.drive_label)).collect();
    Ok(Json(Page::from_fetched(rows, pagination, guarded_total(count))))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub drive_label: String,
    pub path: String,
}

pub async fn get_file(State(state): State<AppState>, Query(params): Query<FileQuery>) -> AppResult<Json<InventoryRow>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let row: Option<InventoryDbRow> = sqlx::query_as("SELECT path, size_bytes, mtime_utc, ext, mime, category FROM inventory WHERE path = ?")
        .bind(&params.path)
        .fetch_optional(&shard)
        .await?;
    let row = row.ok_or_else(|| AppError::not_found(format!("no such path: {}", params.path)))?;
    Ok(Json(to_inventory_row(row, &params.drive_label)))
}

#[derive(Debug, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total_count: i64,
    pub total_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub drive_label: String,
}

/// Prefers the precomputed `inventory_stats` snapshot (kept by the
/// scanner, out of this service's scope); falls back to a live
/// aggregate over the shard's `inventory` table when no snapshot row
/// exists yet for the drive.
pub async fn drive_stats(State(state): State<AppState>, Query(params): Query<StatsQuery>) -> AppResult<Json<Vec<CategoryTotal>>> {
    let snapshot: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT category, total_count, total_bytes FROM inventory_stats WHERE drive_label = ?",
    )
    .bind(&params.drive_label)
    .fetch_all(&state.catalog_pool)
    .await?;

    if !snapshot.is_empty() {
        return Ok(Json(
            snapshot
                .into_iter()
                .map(|(category, total_count, total_bytes)| CategoryTotal {
                    category,
                    total_count,
                    total_bytes,
                })
                .collect(),
        ));
    }

    let shard = state.shard_pools.get(&params.drive_label).await?;
    let live: Vec<(Option<String>, i64, i64)> = sqlx::query_as(
        "SELECT category, count(*), coalesce(sum(size_bytes), 0) FROM inventory GROUP BY category",
    )
    .fetch_all(&shard)
    .await?;

    Ok(Json(
        live.into_iter()
            .map(|(category, total_count, total_bytes)| CategoryTotal {
                category: category.unwrap_or_else(|| "other".to_string()),
                total_count,
                total_bytes,
            })
            .collect(),
    ))
}
