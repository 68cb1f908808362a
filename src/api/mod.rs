//! HTTP API: axum router and shared application state

pub mod error;
pub mod routes;
pub mod schemas;

use crate::Registry;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Shared state handed to every handler.
pub type AppState = Arc<Registry>;

/// Header the auth layer uses to convey the opaque owner identifier.
/// Absent means public (empty owner).
pub const OWNER_HEADER: &str = "x-owner-id";

pub fn owner_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Build the full application router.
pub fn build_router(state: AppState) -> axum::Router {
    routes::router(state).layer(tower_http::trace::TraceLayer::new_for_http())
}
