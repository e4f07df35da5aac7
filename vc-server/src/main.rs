//! Binary entry point: load configuration, open every database, wire
//! the event broker, monitor, scheduler and assistant gateway into an
//! [`AppState`], then serve the router (spec §4, §6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vc_assistant::{AssistantGate, AssistantSessions, NullRuntime};
use vc_config::cli::Args;
use vc_config::loader::load_from_resolved_home;
use vc_db::connect::open_writable;
use vc_db::migrations::ensure_catalog_schema;
use vc_db::shards::ShardPools;
use vc_events::monitor::ensure_metrics_schema;
use vc_events::{BrokerConfig, CatalogEventBroker, RealtimeMonitor};
use vc_scheduler::vector_worker::{self, VectorWorkerConfig};
use vc_scheduler::{schema as scheduler_schema, CosineFallbackIndex, GpuGate, IndexBackend, NoGpuGate, Scheduler};
use vc_server::assistant_tools::ReadApiToolDispatcher;
use vc_server::embedding::hashing_embed;
use vc_server::jobs::VectorsRefreshHandler;
use vc_server::routes::build_router;
use vc_server::state::AppState;

const MAX_OPEN_SHARDS: usize = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            warn!(error = %err, ".env file present but could not be loaded");
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vc_server=info,vc_scheduler=info,vc_events=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let overrides = args.to_overrides();

    let config = load_from_resolved_home(args.working_dir.as_deref(), &overrides)?;
    let settings = Arc::new(config.settings);
    let paths = Arc::new(config.paths);

    if !config.unknown_keys.is_empty() {
        warn!(keys = ?config.unknown_keys, "settings.json carried unrecognized keys; see logs/settings_unknown.json");
    }

    info!(working_dir = %paths.working_dir.display(), "videocatalog-server: working directory resolved");

    let catalog_pool = open_writable(&paths.catalog_db_path()).await?;
    ensure_catalog_schema(&catalog_pool).await?;

    let orchestrator_pool = open_writable(&paths.orchestrator_db_path()).await?;
    scheduler_schema::ensure_schema(&orchestrator_pool).await?;

    let metrics_pool = open_writable(&paths.web_metrics_db_path()).await?;
    ensure_metrics_schema(&metrics_pool).await?;

    let shard_pools = ShardPools::new((*paths).clone(), catalog_pool.clone(), MAX_OPEN_SHARDS);

    let monitor = RealtimeMonitor::new(metrics_pool);
    monitor.spawn_flush_task(None);

    let broker = CatalogEventBroker::new(catalog_pool.clone(), BrokerConfig::default(), Some(Arc::clone(&monitor)));
    broker.start();

    let assistant_gate = Arc::new(AssistantGate::probe(settings.assistant.enable).await);
    info!(message = %assistant_gate.status().message, "assistant gateway probed");

    let gpu_gate: Arc<dyn GpuGate> = if settings.orchestrator.gpu.hard_requirement {
        assistant_gate.clone()
    } else {
        Arc::new(NoGpuGate)
    };

    let scheduler = Scheduler::new(
        orchestrator_pool.clone(),
        vc_scheduler::ConcurrencyLimits {
            heavy_ai_gpu: settings.orchestrator.concurrency.heavy_ai_gpu as usize,
            light_cpu: settings.orchestrator.concurrency.light_cpu as usize,
            io_light: settings.orchestrator.concurrency.io_light as usize,
        },
        gpu_gate,
        Duration::from_secs(settings.orchestrator.heartbeat_s),
        settings.orchestrator.gpu.safety_margin_mb,
        settings.orchestrator.backoff.base_s as i64,
        settings.orchestrator.backoff.max_s as i64,
    );

    let semantic_index = Arc::new(CosineFallbackIndex::new(hashing_embed));

    scheduler.register_handler(
        "vectors_refresh",
        Arc::new(VectorsRefreshHandler {
            index: Arc::clone(&semantic_index) as Arc<dyn IndexBackend>,
        }),
    );

    if settings.orchestrator.enable {
        scheduler.spawn_executors("videocatalog");
        vc_scheduler::reaper::spawn(
            orchestrator_pool.clone(),
            Duration::from_secs(settings.orchestrator.heartbeat_s),
            settings.orchestrator.lease_ttl_s,
        );
    } else {
        info!("orchestrator disabled in settings; vectors_refresh jobs will run in-process only");
    }

    vector_worker::spawn(
        catalog_pool.clone(),
        orchestrator_pool.clone(),
        VectorWorkerConfig {
            orchestrator_enabled: settings.orchestrator.enable,
            batch_limit: 200,
            poll_interval: Duration::from_millis(settings.orchestrator.poll_ms),
        },
        Arc::clone(&semantic_index) as Arc<dyn IndexBackend>,
        |entry| {
            Some(vc_scheduler::IndexDocument {
                doc_id: entry.doc_id.clone(),
                text: entry.doc_id.clone(),
                metadata: serde_json::json!({ "kind": entry.kind }),
            })
        },
    );

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

    let state = AppState {
        settings: Arc::clone(&settings),
        paths: Arc::clone(&paths),
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
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.api.host, settings.api.port).parse()?;
    info!(%addr, lan_refuse = settings.server.lan_refuse, "videocatalog-server: listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("videocatalog-server: shutdown signal received");
}
