//! Router assembly: path constants, per-family sub-routers, middleware
//! composition and the optional static UI mount (spec §4.10), built as
//! one `Router::new().route(...).route_layer(...)` group per family.

use std::path::Path;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers::{assistant, catalog, diagnostics, drives, extras, features, health, inventory, reports, semantic, subscribe};
use crate::middleware::{lan_gate, log_requests, require_api_key};
use crate::state::AppState;

pub mod paths {
    pub const HEALTH: &str = "/v1/health";
    pub const DRIVES: &str = "/v1/drives";
    pub const INVENTORY: &str = "/v1/inventory";
    pub const FILE: &str = "/v1/file";
    pub const STATS: &str = "/v1/stats";
    pub const REPORTS_OVERVIEW: &str = "/v1/reports/overview";
    pub const REPORTS_TOP_EXTENSIONS: &str = "/v1/reports/top-extensions";
    pub const REPORTS_LARGEST_FILES: &str = "/v1/reports/largest-files";
    pub const REPORTS_HEAVIEST_FOLDERS: &str = "/v1/reports/heaviest-folders";
    pub const REPORTS_RECENT: &str = "/v1/reports/recent";
    pub const FEATURES: &str = "/v1/features";
    pub const FEATURES_VECTOR: &str = "/v1/features/vector";
    pub const SEMANTIC_SEARCH: &str = "/v1/semantic/search";
    pub const SEMANTIC_INDEX: &str = "/v1/semantic/index";
    pub const SEMANTIC_TRANSCRIBE: &str = "/v1/semantic/transcribe";
    pub const CATALOG_MOVIES: &str = "/v1/catalog/movies";
    pub const CATALOG_TV_SERIES: &str = "/v1/catalog/tv/series";
    pub const CATALOG_TV_SEASONS: &str = "/v1/catalog/tv/seasons";
    pub const CATALOG_TV_EPISODES: &str = "/v1/catalog/tv/episodes";
    pub const CATALOG_ITEM: &str = "/v1/catalog/item";
    pub const CATALOG_SUMMARY: &str = "/v1/catalog/summary";
    pub const CATALOG_SEARCH: &str = "/v1/catalog/search";
    pub const CATALOG_THUMB: &str = "/v1/catalog/thumb";
    pub const CATALOG_OPEN_FOLDER: &str = "/v1/catalog/open-folder";
    pub const CATALOG_SUBSCRIBE: &str = "/v1/catalog/subscribe";
    pub const CATALOG_REALTIME_STATUS: &str = "/v1/catalog/realtime/status";
    pub const CATALOG_REALTIME_HEARTBEAT: &str = "/v1/catalog/realtime/heartbeat";
    pub const MUSIC: &str = "/v1/music";
    pub const MUSIC_REVIEW: &str = "/v1/music/review";
    pub const TEXTVERIFY_QUEUE: &str = "/v1/textverify/queue";
    pub const TEXTVERIFY_SUBMIT: &str = "/v1/textverify/submit";
    pub const TEXTLITE_PREVIEW: &str = "/v1/textlite/preview";
    pub const DOCS_PREVIEW: &str = "/v1/docs/preview";
    pub const PLAYLIST_SUGGEST: &str = "/v1/playlist/suggest";
    pub const PLAYLIST_BUILD: &str = "/v1/playlist/build";
    pub const PLAYLIST_EXPORT: &str = "/v1/playlist/export";
    pub const PLAYLIST_OPEN_FOLDER: &str = "/v1/playlist/open-folder";
    pub const PLAYLIST_AI: &str = "/v1/playlist/ai";
    pub const ASSISTANT_STATUS: &str = "/v1/assistant/status";
    pub const ASSISTANT_ASK: &str = "/v1/assistant/ask";
    pub const DIAGNOSTICS_PREFLIGHT: &str = "/v1/diagnostics/preflight";
    pub const DIAGNOSTICS_SMOKE: &str = "/v1/diagnostics/smoke";
    pub const DIAGNOSTICS_REPORTS: &str = "/v1/diagnostics/reports";
    pub const DIAGNOSTICS_REPORT: &str = "/v1/diagnostics/report";
    pub const DIAGNOSTICS_DOWNLOAD: &str = "/v1/diagnostics/download";
}

fn read_api_routes() -> Router<AppState> {
    Router::new()
        .route(paths::HEALTH, get(health::health))
        .route(paths::DRIVES, get(drives::list_drives))
        .route(paths::INVENTORY, get(inventory::list_inventory))
        .route(paths::FILE, get(inventory::get_file))
        .route(paths::STATS, get(inventory::drive_stats))
        .route(paths::REPORTS_OVERVIEW, get(reports::overview))
        .route(paths::REPORTS_TOP_EXTENSIONS, get(reports::top_extensions))
        .route(paths::REPORTS_LARGEST_FILES, get(reports::largest_files))
        .route(paths::REPORTS_HEAVIEST_FOLDERS, get(reports::heaviest_folders))
        .route(paths::REPORTS_RECENT, get(reports::recent_changes))
        .route(paths::FEATURES, get(features::list_features))
        .route(paths::FEATURES_VECTOR, get(features::get_vector))
}

fn semantic_routes() -> Router<AppState> {
    Router::new()
        .route(paths::SEMANTIC_SEARCH, get(semantic::search))
        .route(paths::SEMANTIC_INDEX, get(semantic::index_status).post(semantic::rebuild_index))
        .route(paths::SEMANTIC_TRANSCRIBE, post(semantic::transcribe))
}

fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route(paths::CATALOG_MOVIES, get(catalog::list_movies))
        .route(paths::CATALOG_TV_SERIES, get(catalog::list_series))
        .route(paths::CATALOG_TV_SEASONS, get(catalog::list_seasons))
        .route(paths::CATALOG_TV_EPISODES, get(catalog::list_episodes))
        .route(paths::CATALOG_ITEM, get(catalog::item_detail))
        .route(paths::CATALOG_SUMMARY, get(catalog::summary))
        .route(paths::CATALOG_SEARCH, get(catalog::catalog_search))
        .route(paths::CATALOG_THUMB, get(catalog::thumb))
        .route(paths::CATALOG_OPEN_FOLDER, post(catalog::open_folder))
}

fn subscribe_routes() -> Router<AppState> {
    Router::new()
        .route(paths::CATALOG_SUBSCRIBE, get(subscribe_dispatch))
        .route(paths::CATALOG_REALTIME_STATUS, get(subscribe::realtime_status))
        .route(paths::CATALOG_REALTIME_HEARTBEAT, post(subscribe::realtime_heartbeat))
}

/// `/v1/catalog/subscribe` serves both transports on the same path:
/// a WebSocket upgrade request is routed to the socket handler,
/// anything else falls back to SSE (spec §4.10, same path for both).
async fn subscribe_dispatch(
    ws: Option<axum::extract::ws::WebSocketUpgrade>,
    state: axum::extract::State<AppState>,
    connect_info: axum::extract::ConnectInfo<std::net::SocketAddr>,
    query: axum::extract::Query<subscribe::SubscribeParams>,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    match ws {
        Some(ws) => subscribe::subscribe_ws(ws, state, connect_info, query).await,
        None => subscribe::subscribe_sse(state, query).await.into_response(),
    }
}

fn extras_routes() -> Router<AppState> {
    Router::new()
        .route(paths::MUSIC, get(extras::list_music))
        .route(paths::MUSIC_REVIEW, get(extras::music_review))
        .route(paths::TEXTVERIFY_QUEUE, get(extras::textverify_queue))
        .route(paths::TEXTVERIFY_SUBMIT, post(extras::textverify_submit))
        .route(paths::TEXTLITE_PREVIEW, get(extras::textlite_preview))
        .route(paths::DOCS_PREVIEW, get(extras::docs_preview))
        .route(paths::PLAYLIST_SUGGEST, get(extras::playlist_suggest))
        .route(paths::PLAYLIST_BUILD, post(extras::playlist_build))
        .route(paths::PLAYLIST_EXPORT, get(extras::playlist_export))
        .route(paths::PLAYLIST_OPEN_FOLDER, post(extras::playlist_open_folder))
        .route(paths::PLAYLIST_AI, post(extras::playlist_ai))
}

fn assistant_routes() -> Router<AppState> {
    Router::new()
        .route(paths::ASSISTANT_STATUS, get(assistant::status))
        .route(paths::ASSISTANT_ASK, post(assistant::ask))
}

fn diagnostics_routes() -> Router<AppState> {
    Router::new()
        .route(paths::DIAGNOSTICS_PREFLIGHT, post(diagnostics::preflight))
        .route(paths::DIAGNOSTICS_SMOKE, post(diagnostics::smoke))
        .route(paths::DIAGNOSTICS_REPORTS, get(diagnostics::reports))
        .route(paths::DIAGNOSTICS_REPORT, get(diagnostics::report))
        .route(paths::DIAGNOSTICS_DOWNLOAD, get(diagnostics::download))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_methods([axum::http::Method::GET])
        .allow_origin(AllowOrigin::list(origins))
}

const UI_DIST_DIR: &str = "web/catalog-ui/dist";

/// Assembles the full router: the `/v1` API surface gated by
/// LAN/auth/logging middleware (applied innermost-first so the
/// execution order matches spec §4.10's 1-2-3), then CORS and tracing
/// wrapped around the whole thing, then an optional static UI mount.
pub fn build_router(state: AppState) -> Router {
    let v1 = read_api_routes()
        .merge(semantic_routes())
        .merge(catalog_routes())
        .merge(subscribe_routes())
        .merge(extras_routes())
        .merge(assistant_routes())
        .merge(diagnostics_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), lan_gate));

    let mut router = Router::new()
        .merge(v1)
        .layer(cors_layer(&state.settings.api.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if Path::new(UI_DIST_DIR).is_dir() {
        router = router.fallback_service(ServeDir::new(UI_DIST_DIR));
    }

    router
}
