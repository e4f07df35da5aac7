//! LAN-only gate (spec §4.10 bullet 1): reject non-loopback clients with
//! 403 when `server.lan_refuse` is true, as a `from_fn_with_state` guard
//! run ahead of the handler.

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use crate::errors::AppError;
use crate::state::AppState;

/// A client is loopback iff its remote host, after stripping IPv6
/// brackets/scope/`::ffff:` prefix, is one of `{127.0.0.1, ::1,
/// localhost, testclient}` or begins with `127.`.
pub fn is_loopback_host(host: &str) -> bool {
    let mut stripped = host.trim();
    stripped = stripped.strip_prefix('[').unwrap_or(stripped);
    stripped = stripped.strip_suffix(']').unwrap_or(stripped);
    if let Some((addr, _scope)) = stripped.split_once('%') {
        stripped = addr;
    }
    let stripped = stripped.strip_prefix("::ffff:").unwrap_or(stripped);

    matches!(stripped, "127.0.0.1" | "::1" | "localhost" | "testclient") || stripped.starts_with("127.")
}

pub async fn lan_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !state.settings.server.lan_refuse {
        return Ok(next.run(request).await);
    }

    let host = addr.ip().to_string();
    if is_loopback_host(&host) {
        Ok(next.run(request).await)
    } else {
        Err(AppError::forbidden("LAN access disabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_variants_are_recognized() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.5.6.7"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("[::1]"));
        assert!(is_loopback_host("::ffff:127.0.0.1"));
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("testclient"));
    }

    #[test]
    fn remote_hosts_are_rejected() {
        assert!(!is_loopback_host("10.0.0.5"));
        assert!(!is_loopback_host("192.168.1.20"));
        assert!(!is_loopback_host("::ffff:10.0.0.5"));
    }
}
