//! End-to-end router tests driven with `tower::ServiceExt::oneshot`
//! against a real `AppState` backed by a scratch working directory —
//! no listener, no network, matching `vc_server`'s lib.rs doc comment.
//! Grounded on `ferrex-server/tests/auth_integration_test.rs`'s
//! `oneshot`-against-`create_app` style.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;

use vc_assistant::{AssistantGate, AssistantSessions, NullRuntime};
use vc_config::loader::load_from_resolved_home;
use vc_config::{ConfigOverrides, Settings};
use vc_core::ResolvedPaths;
use vc_db::connect::open_writable;
use vc_db::migrations::ensure_catalog_schema;
use vc_db::shards::ShardPools;
use vc_events::{BrokerConfig, CatalogEventBroker, RealtimeMonitor};
use vc_scheduler::{CosineFallbackIndex, NoGpuGate, Scheduler};
use vc_server::assistant_tools::ReadApiToolDispatcher;
use vc_server::embedding::hashing_embed;
use vc_server::routes::build_router;
use vc_server::state::AppState;

const LOOPBACK: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 50000);
const REMOTE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 50000);

struct TestHarness {
    _dir: tempfile::TempDir,
    settings: Settings,
    state: AppState,
}

async fn build_state(settings: Settings, paths: ResolvedPaths, catalog_pool: SqlitePool) -> AppState {
    let orchestrator_pool = open_writable(&paths.orchestrator_db_path()).await.unwrap();
    vc_scheduler::schema::ensure_schema(&orchestrator_pool).await.unwrap();

    let metrics_pool = open_writable(&paths.web_metrics_db_path()).await.unwrap();
    vc_events::monitor::ensure_metrics_schema(&metrics_pool).await.unwrap();

    let shard_pools = ShardPools::new(paths.clone(), catalog_pool.clone(), 8);
    let monitor = RealtimeMonitor::new(metrics_pool);
    let broker = CatalogEventBroker::new(catalog_pool.clone(), BrokerConfig::default(), Some(Arc::clone(&monitor)));

    // No GPU in a test sandbox: the assistant gate reports disabled,
    // which is exactly the scenario spec §8 scenario 3 exercises.
    let assistant_gate = Arc::new(AssistantGate::probe(settings.assistant.enable).await);
    let scheduler = Scheduler::new(
        catalog_pool.clone(),
        vc_scheduler::ConcurrencyLimits {
            heavy_ai_gpu: 1,
            light_cpu: 1,
            io_light: 1,
        },
        Arc::new(NoGpuGate),
        Duration::from_secs(5),
        0,
        1,
        60,
    );

    let semantic_index = Arc::new(CosineFallbackIndex::new(hashing_embed));
    let tool_dispatcher = Arc::new(ReadApiToolDispatcher {
        catalog_pool: catalog_pool.clone(),
        shard_pools: Arc::clone(&shard_pools),
        semantic_index: Arc::clone(&semantic_index),
    });
    let assistant_sessions = Arc::new(AssistantSessions::new(
        Arc::new(NullRuntime),
        tool_dispatcher,
        settings.assistant.tool_budget,
    ));

    AppState {
        settings: Arc::new(settings),
        paths: Arc::new(paths),
        catalog_pool,
        orchestrator_pool,
        shard_pools,
        broker,
        monitor,
        scheduler,
        semantic_index,
        assistant_gate,
        assistant_sessions,
        started_at: std::time::Instant::now(),
    }
}

/// Loads real defaults via the config loader (so every setting the
/// handlers read is present), then applies test-only overrides.
async fn harness(api_key: Option<&str>, lan_refuse: bool) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let overrides = ConfigOverrides::default();
    let load = load_from_resolved_home(Some(dir.path()), &overrides).unwrap();
    let mut settings = load.settings;
    settings.api.api_key = api_key.map(str::to_string);
    settings.server.lan_refuse = lan_refuse;

    let catalog_pool = open_writable(&load.paths.catalog_db_path()).await.unwrap();
    ensure_catalog_schema(&catalog_pool).await.unwrap();

    let state = build_state(settings.clone(), load.paths, catalog_pool).await;
    TestHarness {
        _dir: dir,
        settings,
        state,
    }
}

fn request_from(method: &str, uri: &str, addr: SocketAddr) -> Request<Body> {
    let mut request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn request_with_header(method: &str, uri: &str, addr: SocketAddr, header: &str, value: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header, value)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_reachable_without_auth_when_no_key_configured() {
    let h = harness(None, false).await;
    let app = build_router(h.state);

    let response = app
        .oneshot(request_from("GET", "/v1/health", LOOPBACK))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["assistant"]["enabled"], false);
}

#[tokio::test]
async fn missing_api_key_is_rejected_when_one_is_configured() {
    let h = harness(Some("secret-key"), false).await;
    let app = build_router(h.state);

    let response = app
        .oneshot(request_from("GET", "/v1/health", LOOPBACK))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn correct_api_key_header_is_accepted() {
    let h = harness(Some("secret-key"), false).await;
    let app = build_router(h.state);

    let response = app
        .oneshot(request_with_header(
            "GET",
            "/v1/health",
            LOOPBACK,
            "x-api-key",
            "secret-key",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn lan_gate_rejects_non_loopback_client_with_403() {
    let h = harness(None, true).await;
    let app = build_router(h.state);

    let response = app
        .oneshot(request_from("GET", "/v1/health", REMOTE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = json_body(response).await;
    assert_eq!(body["error"], "LAN access disabled");
}

#[tokio::test]
async fn lan_gate_allows_loopback_client() {
    let h = harness(None, true).await;
    let app = build_router(h.state);

    let response = app
        .oneshot(request_from("GET", "/v1/health", LOOPBACK))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_drive_label_yields_404_not_401_or_500() {
    let h = harness(None, false).await;
    let app = build_router(h.state);

    let response = app
        .oneshot(request_from(
            "GET",
            "/v1/inventory?drive_label=does-not-exist&limit=10",
            LOOPBACK,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn drives_list_reflects_catalog_rows_with_derived_shard_path() {
    let h = harness(None, false).await;
    sqlx::query("INSERT INTO drives (label, type) VALUES ('Movies A', 'removable')")
        .execute(&h.state.catalog_pool)
        .await
        .unwrap();
    let app = build_router(h.state);

    let response = app.oneshot(request_from("GET", "/v1/drives", LOOPBACK)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let drives = body.as_array().unwrap();
    assert_eq!(drives.len(), 1);
    assert_eq!(drives[0]["label"], "Movies A");
    assert!(drives[0]["shard_path"].as_str().unwrap().ends_with("Movies_A.db"));
}

#[tokio::test]
async fn assistant_ask_is_gated_conflict_without_gpu() {
    // Matches spec §8 scenario 3: `assistant.enable=true`, no usable
    // GPU in this sandbox, so the gate reports disabled and `ask`
    // surfaces a 409 rather than ever reaching a model.
    let mut h = harness(None, false).await;
    h.settings.assistant.enable = true;
    h.state.settings = Arc::new(h.settings.clone());
    let assistant_gate = Arc::new(AssistantGate::probe(true).await);
    h.state.assistant_gate = assistant_gate;
    let app = build_router(h.state);

    let mut request = Request::builder()
        .method("POST")
        .uri("/v1/assistant/ask")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"session_id": "s1", "question": "what is this?"}).to_string(),
        ))
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(LOOPBACK));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
