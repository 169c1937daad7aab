//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
    upstream: String,
    sessions: usize,
}

/// `GET /health` — Bridge health and live-session count.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.registry.is_accepting().await {
        "healthy"
    } else {
        "shutting_down"
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            upstream: state.config.upstream_addr(),
            sessions: state.registry.len().await,
        }),
    )
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
