//! Cross-cutting HTTP middleware, applied in the order spec §4.10 lists:
//! LAN gate, auth, request logging, CORS (CORS is assembled as a layer
//! in `routes`, the others via `axum::middleware::from_fn_with_state`).

pub mod auth;
pub mod lan_gate;
pub mod request_log;

pub use auth::require_api_key;
pub use lan_gate::lan_gate;
pub use request_log::log_requests;
