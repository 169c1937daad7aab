//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::domain::SessionRegistry;

/// Shared Bridge state available to all handlers via Axum's `State`
/// extractor. One instance per [`crate::bridge::Bridge`].
#[derive(Debug, Clone)]
pub struct AppState {
    /// Listener and upstream settings.
    pub config: Arc<BridgeConfig>,
    /// Live sessions owned by this Bridge.
    pub registry: Arc<SessionRegistry>,
}
