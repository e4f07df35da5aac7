//! HTTP server, routing, middleware and request handlers for the
//! VideoCatalog read API and streaming subscribe endpoints (spec §4.10).
//!
//! The binary entry point lives in `main.rs`; this library crate exists
//! so integration tests (`tests/`) can build a [`state::AppState`] and
//! exercise [`routes::build_router`] with `tower::ServiceExt::oneshot`
//! without spawning a real listener.

pub mod assistant_tools;
pub mod embedding;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod query;
pub mod routes;
pub mod state;
