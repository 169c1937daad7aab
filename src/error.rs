//! Error types for both halves of the relay.
//!
//! [`BridgeError`] covers the server-side Bridge. Only a failure to bind
//! the listener (or the listener dying) is fatal; everything else is
//! scoped to a single session. [`ClientError`] covers the client-side
//! connection manager, none of whose errors are fatal.

use std::net::SocketAddr;

/// Server-side Bridge error.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The WebSocket listener could not bind its port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The upstream TCP connect was refused or failed to resolve.
    #[error("upstream connect to {addr} failed: {source}")]
    UpstreamConnect {
        /// Upstream `host:port`.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The upstream TCP connect did not complete in time.
    #[error("upstream connect to {addr} timed out after {timeout_ms} ms")]
    UpstreamTimeout {
        /// Upstream `host:port`.
        addr: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Read or write failure on either leg. Treated as a close.
    #[error("transport error: {0}")]
    Transport(String),

    /// The Bridge no longer accepts new sessions.
    #[error("bridge is shutting down")]
    ShuttingDown,

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the error should terminate the Bridge process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Serve(_))
    }
}

/// Client-side connection manager error.
///
/// These are reported through the notification sink and the log; they are
/// never returned from `send`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// `send` was called while the connection was not open.
    #[error("not connected")]
    NotConnected,

    /// An inbound payload was not well-formed JSON of a known shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Connect, read or write failure on the WebSocket.
    #[error("transport error: {0}")]
    Transport(String),

    /// The WebSocket connect did not complete in time.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// The manager task has exited.
    #[error("connection manager stopped")]
    Stopped,
}
