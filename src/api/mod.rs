//! HTTP surface of the Bridge: health check and router composition.

pub mod system;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the complete Bridge router: WebSocket upgrade on `/` and `/ws`,
/// plus the system endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .merge(system::routes())
}
