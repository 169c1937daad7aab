//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;

use super::session::run_session;
use crate::app_state::AppState;

/// `GET /` and `GET /ws` — Upgrade to WebSocket and start a relay session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    tracing::debug!(%peer, "websocket upgrade");
    ws.on_upgrade(move |socket| run_session(socket, peer, state))
}
