//! API key auth (spec §4.10 bullet 2): `X-API-Key` header, or an
//! `api_key` query parameter on the `/v1/catalog/subscribe` path only
//! (browsers cannot set a custom header on an `EventSource`/WebSocket
//! upgrade request).

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::errors::AppError;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const SUBSCRIBE_PATH_SUFFIX: &str = "/catalog/subscribe";

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name {
            Some(urlencoding_decode(value))
        } else {
            None
        }
    })
}

fn urlencoding_decode(value: &str) -> String {
    value.replace('+', " ")
}

fn presented_key(headers: &HeaderMap, path: &str, query: Option<&str>) -> Option<String> {
    if let Some(header_value) = headers.get(API_KEY_HEADER) {
        if let Ok(s) = header_value.to_str() {
            return Some(s.to_string());
        }
    }
    if path.ends_with(SUBSCRIBE_PATH_SUFFIX) {
        if let Some(query) = query {
            return query_param(query, "api_key");
        }
    }
    None
}

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(configured) = state.settings.api.api_key.clone() else {
        // No key configured: the service is explicitly running without
        // auth (local/dev mode). Spec only mandates comparison against
        // a configured key.
        return Ok(next.run(request).await);
    };

    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let presented = presented_key(request.headers(), &path, query.as_deref());

    match presented {
        Some(key) if key == configured => Ok(next.run(request).await),
        _ => Err(AppError::unauthorized("invalid or missing API key")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_key_takes_precedence_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("header-key"));
        let presented = presented_key(&headers, "/v1/catalog/subscribe", Some("api_key=query-key"));
        assert_eq!(presented.as_deref(), Some("header-key"));
    }

    #[test]
    fn query_key_only_honored_on_subscribe_path() {
        let headers = HeaderMap::new();
        assert_eq!(
            presented_key(&headers, "/v1/catalog/subscribe", Some("api_key=abc")).as_deref(),
            Some("abc")
        );
        assert_eq!(presented_key(&headers, "/v1/health", Some("api_key=abc")), None);
    }
}
