//! `GET /v1/assistant/status`, `POST /v1/assistant/ask` (spec §4.9).
//! Grounded on `vc_assistant::gate::AssistantGate` and
//! `vc_assistant::session::AssistantSessions`; this module is only the
//! HTTP-facing wiring plus the gate's closed-for-business response.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> Json<vc_assistant::GateStatus> {
    Json(state.assistant_gate.status())
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub session_id: String,
    pub question: String,
    pub item_payload: Option<serde_json::Value>,
    pub tool_budget: Option<u32>,
    #[serde(default)]
    pub use_rag: bool,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub tool_log: Vec<vc_assistant::ToolLogEntry>,
    pub status: vc_assistant::AskStatus,
}

/// Returns 409 with the gate's own message when the assistant is not
/// enabled, matching the literal "AI disabled (GPU required)" scenario
/// rather than silently running the null runtime.
pub async fn ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> AppResult<Json<AskResponse>> {
    if !state.assistant_gate.enabled() {
        return Err(AppError::conflict(state.assistant_gate.status_message()));
    }

    state.monitor.record_ai_request();
    let response = state
        .assistant_sessions
        .ask_context(&req.session_id, req.item_payload, &req.question, req.tool_budget, req.use_rag, |_question| Vec::new())
        .await;

    Ok(Json(AskResponse {
        answer: response.answer,
        tool_log: response.tool_log,
        status: response.status,
    }))
}
