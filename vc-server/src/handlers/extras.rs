//! Specialized listing and playlist endpoints (spec §6): `/music`,
//! `/music/review`, `/textverify/*`, `/textlite/preview`, `/docs/preview`,
//! `/playlist/*`. Grounded in the same shard-pool query shape as
//! `handlers::inventory`/`handlers::reports`; these tables are produced
//! by the (out-of-scope) scanner, not by this service.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::query::PageParams;
use crate::state::AppState;
use vc_core::pagination::{guarded_total, Page};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MusicTrack {
    pub path: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MusicQuery {
    pub drive_label: String,
    #[serde(flatten)]
    pub page: PageParams,
}

pub async fn list_music(State(state): State<AppState>, Query(params): Query<MusicQuery>) -> AppResult<Json<Page<MusicTrack>>> {
    let pagination = params.page.resolve(&state.settings);
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<MusicTrack> = sqlx::query_as(
        "SELECT path, artist, album, title, track_no FROM music ORDER BY artist, album, track_no LIMIT ? OFFSET ?",
    )
    .bind(pagination.fetch_limit())
    .bind(pagination.offset)
    .fetch_all(&shard)
    .await?;
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM music").fetch_one(&shard).await?;
    Ok(Json(Page::from_fetched(rows, pagination, guarded_total(count))))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MusicReviewEntry {
    pub path: String,
    pub reason: String,
    pub confidence: f64,
}

pub async fn music_review(State(state): State<AppState>, Query(params): Query<MusicQuery>) -> AppResult<Json<Page<MusicReviewEntry>>> {
    let pagination = params.page.resolve(&state.settings);
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<MusicReviewEntry> = sqlx::query_as(
        "SELECT path, reason, confidence FROM music_review_queue ORDER BY confidence ASC LIMIT ? OFFSET ?",
    )
    .bind(pagination.fetch_limit())
    .bind(pagination.offset)
    .fetch_all(&shard)
    .await?;
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM music_review_queue").fetch_one(&shard).await?;
    Ok(Json(Page::from_fetched(rows, pagination, guarded_total(count))))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TextVerifyEntry {
    pub path: String,
    pub extracted_text: String,
    pub confidence: f64,
    pub verified: bool,
}

pub async fn textverify_queue(State(state): State<AppState>, Query(params): Query<MusicQuery>) -> AppResult<Json<Page<TextVerifyEntry>>> {
    let pagination = params.page.resolve(&state.settings);
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let rows: Vec<TextVerifyEntry> = sqlx::query_as(
        "SELECT path, extracted_text, confidence, verified FROM text_verify_queue WHERE verified = 0 ORDER BY confidence ASC LIMIT ? OFFSET ?",
    )
    .bind(pagination.fetch_limit())
    .bind(pagination.offset)
    .fetch_all(&shard)
    .await?;
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM text_verify_queue WHERE verified = 0")
        .fetch_one(&shard)
        .await?;
    Ok(Json(Page::from_fetched(rows, pagination, guarded_total(count))))
}

#[derive(Debug, Deserialize)]
pub struct TextVerifySubmit {
    pub drive_label: String,
    pub path: String,
    pub corrected_text: String,
}

#[derive(Debug, Serialize)]
pub struct TextVerifyAck {
    pub path: String,
    pub accepted: bool,
}

pub async fn textverify_submit(State(state): State<AppState>, Json(req): Json<TextVerifySubmit>) -> AppResult<Json<TextVerifyAck>> {
    let shard = state.shard_pools.get(&req.drive_label).await?;
    let result = sqlx::query(
        "UPDATE text_verify_queue SET extracted_text = ?, verified = 1 WHERE path = ?",
    )
    .bind(&req.corrected_text)
    .bind(&req.path)
    .execute(&shard)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("no text-verify entry for {}", req.path)));
    }
    Ok(Json(TextVerifyAck {
        path: req.path,
        accepted: true,
    }))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TextlitePreview {
    pub path: String,
    pub kind: String,
    pub bytes_sampled: i64,
    pub lines_sampled: i64,
}

#[derive(Debug, Deserialize)]
pub struct PathLookupQuery {
    pub drive_label: String,
    pub path: String,
}

pub async fn textlite_preview(State(state): State<AppState>, Query(params): Query<PathLookupQuery>) -> AppResult<Json<TextlitePreview>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let row: Option<TextlitePreview> = sqlx::query_as(
        "SELECT path, kind, bytes_sampled, lines_sampled FROM textlite_preview WHERE path = ?",
    )
    .bind(&params.path)
    .fetch_optional(&shard)
    .await?;
    row.map(Json).ok_or_else(|| AppError::not_found(format!("no textlite preview for {}", params.path)))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DocsPreview {
    pub path: String,
    pub title: Option<String>,
    pub page_count: Option<i64>,
    pub preview_text: String,
}

pub async fn docs_preview(State(state): State<AppState>, Query(params): Query<PathLookupQuery>) -> AppResult<Json<DocsPreview>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let row: Option<DocsPreview> = sqlx::query_as(
        "SELECT path, title, page_count, preview_text FROM docs_preview WHERE path = ?",
    )
    .bind(&params.path)
    .fetch_optional(&shard)
    .await?;
    row.map(Json).ok_or_else(|| AppError::not_found(format!("no docs preview for {}", params.path)))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistSuggestQuery {
    pub drive_label: String,
    pub seed_path: String,
    #[serde(default = "default_suggest_limit")]
    pub limit: i64,
}

fn default_suggest_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct PlaylistSuggestion {
    pub path: String,
    pub reason: &'static str,
}

/// Heuristic suggestion: other tracks by the same artist, then other
/// tracks in the same folder, deduplicated and capped at `limit`. No
/// embedding/ANN lookup here; `/playlist/ai` is the semantic variant.
pub async fn playlist_suggest(State(state): State<AppState>, Query(params): Query<PlaylistSuggestQuery>) -> AppResult<Json<Vec<PlaylistSuggestion>>> {
    let shard = state.shard_pools.get(&params.drive_label).await?;
    let seed_artist: Option<(Option<String>,)> = sqlx::query_as("SELECT artist FROM music WHERE path = ?")
        .bind(&params.seed_path)
        .fetch_optional(&shard)
        .await?;

    let mut suggestions = Vec::new();
    if let Some((Some(artist),)) = &seed_artist {
        let same_artist: Vec<(String,)> = sqlx::query_as("SELECT path FROM music WHERE artist = ? AND path != ? LIMIT ?")
            .bind(artist)
            .bind(&params.seed_path)
            .bind(params.limit)
            .fetch_all(&shard)
            .await
            .unwrap_or_default();
        suggestions.extend(same_artist.into_iter().map(|(path,)| PlaylistSuggestion { path, reason: "same_artist" }));
    }

    if (suggestions.len() as i64) < params.limit {
        let remaining = params.limit - suggestions.len() as i64;
        let folder = params.seed_path.rsplit_once('/').map(|(dir, _)| dir.to_string()).unwrap_or_default();
        let same_folder: Vec<(String,)> = sqlx::query_as("SELECT path FROM inventory WHERE path LIKE ? AND path != ? LIMIT ?")
            .bind(format!("{folder}/%"))
            .bind(&params.seed_path)
            .bind(remaining)
            .fetch_all(&shard)
            .await
            .unwrap_or_default();
        suggestions.extend(same_folder.into_iter().map(|(path,)| PlaylistSuggestion { path, reason: "same_folder" }));
    }

    suggestions.truncate(params.limit.max(0) as usize);
    Ok(Json(suggestions))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistBuildRequest {
    pub name: String,
    pub drive_label: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlaylistBuildResponse {
    pub name: String,
    pub track_count: usize,
    pub relative_path: String,
}

/// Materializes an `.m3u` playlist under `exports/playlists/<name>.m3u`.
/// Paths are trusted to already be catalog-relative; this does not
/// resolve or validate them against the filesystem.
pub async fn playlist_build(State(state): State<AppState>, Json(req): Json<PlaylistBuildRequest>) -> AppResult<Json<PlaylistBuildResponse>> {
    state.shard_pools.get(&req.drive_label).await?;
    if req.paths.is_empty() {
        return Err(AppError::bad_request("playlist must contain at least one path"));
    }

    let safe_name: String = req
        .name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let relative_path = format!("playlists/{safe_name}.m3u");
    let dest = state.paths.exports_dir().join("playlists").join(format!("{safe_name}.m3u"));

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| AppError::internal(err.to_string()))?;
    }
    let body = format!("#EXTM3U\n{}\n", req.paths.join("\n"));
    tokio::fs::write(&dest, body).await.map_err(|err| AppError::internal(err.to_string()))?;

    Ok(Json(PlaylistBuildResponse {
        name: req.name,
        track_count: req.paths.len(),
        relative_path,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistExportQuery {
    pub name: String,
}

pub async fn playlist_export(State(state): State<AppState>, Query(params): Query<PlaylistExportQuery>) -> AppResult<Response> {
    let safe_name: String = params
        .name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let dest = state.paths.exports_dir().join("playlists").join(format!("{safe_name}.m3u"));
    let content = tokio::fs::read_to_string(&dest)
        .await
        .map_err(|_| AppError::not_found(format!("no playlist named {}", params.name)))?;
    Ok(([(header::CONTENT_TYPE, "audio/x-mpegurl")], content).into_response())
}

#[derive(Debug, Deserialize)]
pub struct PlaylistOpenFolderRequest {
    pub drive_label: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PlaylistOpenFolderPlan {
    pub plan: &'static str,
    pub path: String,
}

pub async fn playlist_open_folder(State(state): State<AppState>, Json(req): Json<PlaylistOpenFolderRequest>) -> AppResult<Json<PlaylistOpenFolderPlan>> {
    state.shard_pools.get(&req.drive_label).await?;
    let path = state.paths.exports_dir().join("playlists").join(&req.name).to_string_lossy().to_string();
    Ok(Json(PlaylistOpenFolderPlan { plan: "shell_open", path }))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistAiRequest {
    pub session_id: String,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct PlaylistAiResponse {
    pub answer: String,
}

/// Routes through the same gated assistant as `/v1/assistant/ask`
/// rather than duplicating the gate/session logic.
pub async fn playlist_ai(State(state): State<AppState>, Json(req): Json<PlaylistAiRequest>) -> AppResult<Json<PlaylistAiResponse>> {
    if !state.assistant_gate.enabled() {
        return Err(AppError::conflict(state.assistant_gate.status_message()));
    }
    state.monitor.record_ai_request();
    let response = state
        .assistant_sessions
        .ask_context(&req.session_id, None, &req.prompt, None, false, |_| Vec::new())
        .await;
    Ok(Json(PlaylistAiResponse { answer: response.answer }))
}
