//! Request logging (spec §4.10 bullet 3): `method path -> status
//! (duration_ms) ip=<host>` for every request, wrapping the whole
//! router via `from_fn`.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

pub async fn log_requests(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let duration_ms = started.elapsed().as_millis();
    info!(
        "{method} {path} -> {status} ({duration_ms}ms) ip={ip}",
        method = method,
        path = path,
        status = response.status().as_u16(),
        duration_ms = duration_ms,
        ip = addr.ip(),
    );

    response
}
