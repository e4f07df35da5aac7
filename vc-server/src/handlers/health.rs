//! `GET /v1/health`: liveness, version, uptime, realtime counters, and
//! assistant budget headroom (spec §6).

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::{AppState, SERVICE_VERSION};

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.monitor.snapshot();
    let gate_status = state.assistant_gate.status();

    Json(json!({
        "status": "ok",
        "version": SERVICE_VERSION,
        "uptime_seconds": state.uptime_seconds(),
        "realtime": {
            "events_pushed_total": snapshot.events_pushed_total,
            "events_dropped_total": snapshot.events_dropped_total,
            "ws_connected": snapshot.ws_connected,
            "sse_connected": snapshot.sse_connected,
            "lag_p50_ms": snapshot.lag_p50_ms,
            "lag_p95_ms": snapshot.lag_p95_ms,
        },
        "assistant": {
            "enabled": gate_status.enabled,
            "gpu_ready": gate_status.gpu_ready,
        },
    }))
}
