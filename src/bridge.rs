//! The server-side Bridge instance.
//!
//! A [`Bridge`] owns its configuration and its live-session registry, so
//! several can run in one process (tests do exactly that). Starting it is
//! two steps: [`Bridge::bind`] claims the port and is the only fatal
//! failure point, [`Bridge::serve`] accepts WebSockets until the shutdown
//! future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::BridgeConfig;
use crate::domain::SessionRegistry;
use crate::error::BridgeError;

/// WebSocket → TCP relay server.
#[derive(Debug, Clone)]
pub struct Bridge {
    state: AppState,
}

impl Bridge {
    /// Creates a Bridge with an empty session registry.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            state: AppState {
                config: Arc::new(config),
                registry: Arc::new(SessionRegistry::new()),
            },
        }
    }

    /// Returns the Bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    /// Returns the live-session registry.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Builds the HTTP router with request tracing and state attached.
    pub fn router(&self) -> Router {
        api::build_router()
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Binds the WebSocket listener on the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bind`] if the port is unavailable. The caller
    /// should treat this as fatal.
    pub async fn bind(&self) -> Result<TcpListener, BridgeError> {
        let addr = self.state.config.listen_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| BridgeError::Bind { addr, source })
    }

    /// Accepts WebSocket connections on `listener` until `shutdown`
    /// resolves, then closes every live session and stops the listener.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Serve`] if the server stops with an I/O error.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                %addr,
                upstream = %self.state.config.upstream_addr(),
                "bridge listening"
            );
        }

        let registry = self.registry();
        let signal = async move {
            shutdown.await;
            let closed = registry.close_all().await;
            tracing::info!(closed, "bridge shutting down");
        };

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(BridgeError::Serve)?;

        tracing::info!("bridge listener closed");
        Ok(())
    }

    /// Binds and serves in one call.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bind`] or [`BridgeError::Serve`].
    pub async fn run<F>(&self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Stops accepting new sessions and closes every live one without
    /// stopping the listener. Returns the number of sessions closed.
    pub async fn close_sessions(&self) -> usize {
        self.state.registry.close_all().await
    }
}
