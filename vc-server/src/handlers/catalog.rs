//! Catalog browsing: movies, TV series/seasons/episodes, item detail,
//! thumbnails, "open folder" plan, and catalog-wide search (spec §4.4
//! operation 5). All reads hit the per-drive shard the row belongs to,
//! except the cross-drive `/catalog/summary` and `/catalog/search`
//! operations which fan out over every catalogued drive.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::query::{FilterBuilder, PageParams};
use crate::state::AppState;
use vc_core::pagination::{guarded_total, Page};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MovieRow {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
    pub confidence: f64,
    pub quality_score: Option<f64>,
    pub path: String,
    pub drive: String,
}

#[derive(Debug, Deserialize)]
pub struct MovieQuery {
    pub drive_label: String,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub min_confidence: Option<f64>,
    pub low_confidence_only: Option<bool>,
    #[serde(flatten)]
    pub page: PageParams,
}

const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

pub async fn list_movies(State(state): State<AppState>, Query(params): Query<MovieQuery>) -> AppResult<Json<Page<MovieRow>>> {
    let pagination = params.page.resolve(&state.settings);
    let shard = state.shard_pools.get(&params.drive_label).await?;

    let mut filter = FilterBuilder::new();
    if params.year_min.is_some() {
        filter.add("year >= ?");
    }
    if params.year_max.is_some() {
        filter.add("year <= ?");
    }
    if params.min_confidence.is_some() {
        filter.add("confidence >= ?");
    }
    if params.low_confidence_only == Some(true) {
        filter.add("confidence < ?");
    }
    let where_clause = filter.build();

    let sql = format!(
        "SELECT id, title, year, confidence, quality_score, path, drive FROM movies \
         WHERE {where_clause} ORDER BY path LIMIT ? OFFSET ?"
    );
    let mut query = sqlx::query_as::<_, MovieRow>(&sql);
    if let Some(v) = params.year_min {
        query = query.bind(v);
    }
    if let Some(v) = params.year_max {
        query = query.bind(v);
    }
    if let Some(v) = params.min_confidence {
        query = query.bind(v);
    }
    if params.low_confidence_only == Some(true) {
        query = query.bind(LOW_CONFIDENCE_THRESHOLD);
    }
    let rows = query.bind(pagination.fetch_limit()).bind(pagination.offset).fetch_all(&shard).await?;

    let count_sql = format!("SELECT count(*) FROM movies WHERE {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(v) = params.year_min {
        count_query = count_query.bind(v);
    }
    if let Some(v) = params.year_max {
        count_query = count_query.bind(v);
    }
    if let Some(v) = params.min_confidence {
        count_query = count_query.bind(v);
    }
    if params.low_confidence_only == Some(true) {
        count_query = count_query.bind(LOW_CONFIDENCE_THRESHOLD);
    }
    let count = count_query.fetch_one(&shard).await?;

    Ok(Json(Page::from_fetched(rows, pagination, guarded_total(count))))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TvSeriesRow {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DriveScopedQuery {
    pub drive_label: String,
    #[serde(flatten)]
    pub page: PageParams,
}

pub async fn list_series(State(state): State<AppState>, Query(params): Query<DriveScopedQuery>) -> AppResult<Json<Page<TvSeriesRow>>> {
    let pagination = params.page.resolve(&state.settings);
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<TvSeriesRow> = sqlx::query_as("SELECT id, title, year FROM tv_series ORDER BY title LIMIT ? OFFSET ?")
        .bind(pagination.fetch_limit())
        .bind(pagination.offset)
        .fetch_all(&shard)
        .await?;
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM tv_series").fetch_one(&shard).await?;
    Ok(Json(Page::from_fetched(rows, pagination, guarded_total(count))))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TvSeasonRow {
    pub id: i64,
    pub series_id: i64,
    pub season_number: i64,
}

#[derive(Debug, Deserialize)]
pub struct SeriesScopedQuery {
    pub drive_label: String,
    pub series_id: i64,
}

pub async fn list_seasons(State(state): State<AppState>, Query(params): Query<SeriesScopedQuery>) -> AppResult<Json<Vec<TvSeasonRow>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<TvSeasonRow> = sqlx::query_as("SELECT id, series_id, season_number FROM tv_seasons WHERE series_id = ? ORDER BY season_number")
        .bind(params.series_id)
        .fetch_all(&shard)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TvEpisodeRow {
    pub id: i64,
    pub season_id: i64,
    pub episode_number: i64,
    pub title: Option<String>,
    pub episode_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SeasonScopedQuery {
    pub drive_label: String,
    pub season_id: i64,
}

pub async fn list_episodes(State(state): State<AppState>, Query(params): Query<SeasonScopedQuery>) -> AppResult<Json<Vec<TvEpisodeRow>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<TvEpisodeRow> = sqlx::query_as(
        "SELECT id, season_id, episode_number, title, episode_path FROM tv_episodes WHERE season_id = ? ORDER BY episode_number",
    )
    .bind(params.season_id)
    .fetch_all(&shard)
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    pub drive_label: String,
    /// Opaque, kind-prefixed id: `movie:<id>`, `series:<id>`, `episode:<id>`.
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
pub enum ItemDetail {
    #[serde(rename = "movie")]
    Movie(MovieRow),
    #[serde(rename = "series")]
    Series(TvSeriesRow),
    #[serde(rename = "episode")]
    Episode(TvEpisodeRow),
}

pub async fn item_detail(State(state): State<AppState>, Query(params): Query<ItemQuery>) -> AppResult<Json<ItemDetail>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let (kind, raw_id) = params
        .id
        .split_once(':')
        .ok_or_else(|| AppError::bad_request("item id must be kind-prefixed, e.g. movie:123"))?;
    let numeric_id: i64 = raw_id
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid numeric id in {}", params.id)))?;

    match kind {
        "movie" => {
            let row: Option<MovieRow> =
                sqlx::query_as("SELECT id, title, year, confidence, quality_score, path, drive FROM movies WHERE id = ?")
                    .bind(numeric_id)
                    .fetch_optional(&shard)
                    .await?;
            row.map(ItemDetail::Movie)
        }
        "series" => {
            let row: Option<TvSeriesRow> = sqlx::query_as("SELECT id, title, year FROM tv_series WHERE id = ?")
                .bind(numeric_id)
                .fetch_optional(&shard)
                .await?;
            row.map(ItemDetail::Series)
        }
        "episode" => {
            let row: Option<TvEpisodeRow> =
                sqlx::query_as("SELECT id, season_id, episode_number, title, episode_path FROM tv_episodes WHERE id = ?")
                    .bind(numeric_id)
                    .fetch_optional(&shard)
                    .await?;
            row.map(ItemDetail::Episode)
        }
        other => return Err(AppError::bad_request(format!("unknown item kind: {other}"))),
    }
    .map(Json)
    .ok_or_else(|| AppError::not_found(format!("no such item: {}", params.id)))
}

#[derive(Debug, Serialize)]
pub struct CatalogSummary {
    pub movie_count: i64,
    pub series_count: i64,
    pub episode_count: i64,
}

pub async fn summary(State(state): State<AppState>) -> AppResult<Json<CatalogSummary>> {
    let labels: Vec<(String,)> = sqlx::query_as("SELECT label FROM drives").fetch_all(&state.catalog_pool).await?;
    let mut summary = CatalogSummary {
        movie_count: 0,
        series_count: 0,
        episode_count: 0,
    };
    for (label,) in labels {
        let Ok(shard) = state.shard_pools.get(&label).await else {
            continue;
        };
        summary.movie_count += sqlx::query_scalar::<_, i64>("SELECT count(*) FROM movies")
            .fetch_one(&shard)
            .await
            .unwrap_or(0);
        summary.series_count += sqlx::query_scalar::<_, i64>("SELECT count(*) FROM tv_series")
            .fetch_one(&shard)
            .await
            .unwrap_or(0);
        summary.episode_count += sqlx::query_scalar::<_, i64>("SELECT count(*) FROM tv_episodes")
            .fetch_one(&shard)
            .await
            .unwrap_or(0);
    }
    Ok(Json(summary))
}

fn default_search_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct CatalogSearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct CatalogSearchHit {
    pub drive_label: String,
    pub kind: &'static str,
    pub id: i64,
    pub title: String,
}

pub async fn catalog_search(State(state): State<AppState>, Query(params): Query<CatalogSearchQuery>) -> AppResult<Json<Vec<CatalogSearchHit>>> {
    let labels: Vec<(String,)> = sqlx::query_as("SELECT label FROM drives").fetch_all(&state.catalog_pool).await?;
    let pattern = format!("%{}%", params.q.to_ascii_lowercase());
    let mut hits = Vec::new();

    for (label,) in labels {
        let Ok(shard) = state.shard_pools.get(&label).await else {
            continue;
        };
        let movies: Vec<(i64, String)> = sqlx::query_as("SELECT id, title FROM movies WHERE lower(title) LIKE ? ORDER BY title LIMIT ?")
            .bind(&pattern)
            .bind(params.limit.max(1))
            .fetch_all(&shard)
            .await
            .unwrap_or_default();
        hits.extend(movies.into_iter().map(|(id, title)| CatalogSearchHit {
            drive_label: label.clone(),
            kind: "movie",
            id,
            title,
        }));

        let series: Vec<(i64, String)> = sqlx::query_as("SELECT id, title FROM tv_series WHERE lower(title) LIKE ? ORDER BY title LIMIT ?")
            .bind(&pattern)
            .bind(params.limit.max(1))
            .fetch_all(&shard)
            .await
            .unwrap_or_default();
        hits.extend(series.into_iter().map(|(id, title)| CatalogSearchHit {
            drive_label: label.clone(),
            kind: "series",
            id,
            title,
        }));

        if hits.len() as i64 >= params.limit {
            break;
        }
    }

    hits.truncate(params.limit.max(1) as usize);
    Ok(Json(hits))
}

#[derive(Debug, Deserialize)]
pub struct ThumbQuery {
    pub id: String,
}

/// Binary thumbnail fetch by opaque token. The token maps to
/// `(drive_label, path)` via the catalog's `thumbnails` table so the
/// client never needs to know which shard a thumbnail lives in.
pub async fn thumb(State(state): State<AppState>, Query(params): Query<ThumbQuery>) -> AppResult<Response> {
    let row: Option<(String, Vec<u8>)> = sqlx::query_as("SELECT mime, blob FROM thumbnails WHERE token = ?")
        .bind(&params.id)
        .fetch_optional(&state.catalog_pool)
        .await?;
    let (mime, blob) = row.ok_or_else(|| AppError::not_found(format!("no thumbnail for token {}", params.id)))?;
    Ok(([(header::CONTENT_TYPE, mime)], Bytes::from(blob)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct OpenFolderQuery {
    pub drive_label: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct OpenFolderPlan {
    pub plan: &'static str,
    pub path: String,
}

/// Returns a plan the client executes locally; this handler never
/// touches the filesystem or spawns a shell.
pub async fn open_folder(State(state): State<AppState>, Query(params): Query<OpenFolderQuery>) -> AppResult<Json<OpenFolderPlan>> {
    state.shard_pools.get(&params.drive_label).await?;
    Ok(Json(OpenFolderPlan {
        plan: "shell_open",
        path: params.path,
    }))
}
