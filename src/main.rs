//! ws-tcp-bridge server entry point.
//!
//! Accepts WebSocket connections and relays each one to its own TCP
//! connection to the configured upstream.

use tokio::signal;

use ws_tcp_bridge::bridge::Bridge;
use ws_tcp_bridge::config::BridgeConfig;
use ws_tcp_bridge::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    // Load configuration
    let config = BridgeConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid bridge configuration: {e}"))?;
    tracing::info!(
        addr = %config.listen_addr,
        upstream = %config.upstream_addr(),
        "starting ws-tcp-bridge"
    );

    let bridge = Bridge::new(config);

    // A failed bind is fatal.
    let listener = match bridge.bind().await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "cannot start bridge");
            return Err(err.into());
        }
    };

    bridge.serve(listener, shutdown_signal()).await?;

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
