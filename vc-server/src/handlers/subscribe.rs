//! `/v1/catalog/subscribe` (spec §4.5): dual SSE/WebSocket transport
//! over the same [`CatalogEventBroker`], plus `/v1/catalog/realtime/status`
//! and `/v1/catalog/realtime/heartbeat`. WebSocket handling follows
//! `handle_websocket::handle_socket`'s split-sender/receiver shape; SSE
//! follows `scan_manager::scan_progress_sse`'s `stream::unfold` shape.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::middleware::lan_gate::is_loopback_host;
use crate::state::AppState;
use vc_core::model::CatalogEvent;
use vc_events::monitor::Transport;

const CLOSE_AUTH_FAILED: u16 = 4401;
const CLOSE_LAN_REFUSED: u16 = 4403;

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    #[serde(default)]
    pub last_seq: i64,
    pub client_id: Option<String>,
    pub api_key: Option<String>,
}

/// Authenticate a transport-level subscribe request as a defensive
/// second check; the primary gate is the `lan_gate`/`require_api_key`
/// middleware layered ahead of this route in `routes.rs`, which already
/// rejects unauthenticated upgrades before a socket is ever opened. This
/// only fires if that layering is ever bypassed.
fn recheck_gate(state: &AppState, addr: &SocketAddr, params: &SubscribeParams) -> Result<(), u16> {
    if state.settings.server.lan_refuse && !is_loopback_host(&addr.ip().to_string()) {
        return Err(CLOSE_LAN_REFUSED);
    }
    if let Some(configured) = &state.settings.api.api_key {
        if params.api_key.as_deref() != Some(configured.as_str()) {
            return Err(CLOSE_AUTH_FAILED);
        }
    }
    Ok(())
}

pub async fn subscribe_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<SubscribeParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, params))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, addr: SocketAddr, params: SubscribeParams) {
    if let Err(code) = recheck_gate(&state, &addr, &params) {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "gate rejected".into(),
            })))
            .await;
        return;
    }

    let client_id = params.client_id.clone().unwrap_or_else(|| addr.to_string());
    state.monitor.connection_opened(Transport::WebSocket);
    state.monitor.touch_client(&client_id);

    let subscription = match state.broker.subscribe(params.last_seq).await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(error = %err, "subscribe: failed to register broker subscription");
            let _ = socket.close().await;
            state.monitor.connection_closed(Transport::WebSocket);
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let mut events = subscription.receiver;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        state.monitor.record_delivery_lag(event.ts_utc);
                        if let Ok(payload) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_))) => {
                        state.monitor.touch_client(&client_id);
                    }
                    Some(Ok(Message::Text(_))) => {
                        // Clients only send pings/heartbeats over this channel; any
                        // text frame still counts as liveness.
                        state.monitor.touch_client(&client_id);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "subscribe: websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.monitor.connection_closed(Transport::WebSocket);
    debug!(client_id, "subscribe: websocket disconnected");
}

pub async fn subscribe_sse(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state.monitor.connection_opened(Transport::Sse);
    let client_id = params.client_id.clone().unwrap_or_else(|| "sse-client".to_string());
    state.monitor.touch_client(&client_id);

    let subscription = state.broker.subscribe(params.last_seq).await?;
    let monitor = state.monitor.clone();
    let (tx, rx) = tokio::sync::mpsc::channel::<CatalogEvent>(64);

    tokio::spawn(async move {
        let mut events = subscription.receiver;
        while let Some(event) = events.recv().await {
            monitor.record_delivery_lag(event.ts_utc);
            if tx.send(event).await.is_err() {
                break;
            }
        }
        monitor.connection_closed(Transport::Sse);
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(Event::default()
            .event("catalog_event")
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().event("catalog_event").data("{}")))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive")))
}

#[derive(Debug, Serialize)]
pub struct RealtimeStatus {
    pub ws_connected: i64,
    pub sse_connected: i64,
    pub events_pushed_total: u64,
    pub events_dropped_total: u64,
    pub lag_p50_ms: Option<i64>,
    pub lag_p95_ms: Option<i64>,
}

pub async fn realtime_status(State(state): State<AppState>) -> Json<RealtimeStatus> {
    let snapshot = state.monitor.snapshot();
    Json(RealtimeStatus {
        ws_connected: snapshot.ws_connected,
        sse_connected: snapshot.sse_connected,
        events_pushed_total: snapshot.events_pushed_total,
        events_dropped_total: snapshot.events_dropped_total,
        lag_p50_ms: snapshot.lag_p50_ms,
        lag_p95_ms: snapshot.lag_p95_ms,
    })
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub client_id: String,
    pub stale: bool,
}

pub async fn realtime_heartbeat(State(state): State<AppState>, Json(req): Json<HeartbeatRequest>) -> Json<HeartbeatResponse> {
    state.monitor.touch_client(&req.client_id);
    Json(HeartbeatResponse {
        client_id: req.client_id,
        stale: false,
    })
}
