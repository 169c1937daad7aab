//! Session lifecycle state and registry entry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use super::SessionId;

/// Lifecycle of a session.
///
/// ```text
/// Connecting ──upstream ok──► Relaying ──either side closes──► Closing ──► Closed
///      └──────upstream failed / client gone──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// WebSocket accepted, upstream TCP connect in progress.
    Connecting,
    /// Both endpoints live; payloads are being forwarded.
    Relaying,
    /// Teardown in progress; both endpoints are being closed.
    Closing,
    /// Both endpoints closed. Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Relaying)
                | (Self::Connecting, Self::Closing)
                | (Self::Relaying, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Relaying => "relaying",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Per-direction byte counters shared between the registry and the relay task.
#[derive(Debug, Default)]
pub struct SessionCounters {
    to_upstream: AtomicU64,
    to_client: AtomicU64,
}

impl SessionCounters {
    /// Records bytes written to the upstream TCP socket.
    pub fn add_to_upstream(&self, n: usize) {
        self.to_upstream.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Records bytes sent to the WebSocket client.
    pub fn add_to_client(&self, n: usize) {
        self.to_client.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Total bytes relayed client → upstream.
    #[must_use]
    pub fn to_upstream(&self) -> u64 {
        self.to_upstream.load(Ordering::Relaxed)
    }

    /// Total bytes relayed upstream → client.
    #[must_use]
    pub fn to_client(&self) -> u64 {
        self.to_client.load(Ordering::Relaxed)
    }
}

/// Signal sent to a session task asking it to tear down. The task replies
/// on the enclosed sender once both sockets are closed.
pub type CloseRequest = oneshot::Sender<()>;

/// Registry entry for one live session.
///
/// The sockets themselves are owned by the session's relay task; the
/// entry only holds metadata and the channel used to ask that task to
/// close them.
#[derive(Debug)]
pub struct SessionEntry {
    /// Session identifier (immutable after creation).
    pub id: SessionId,

    /// Remote address of the WebSocket client.
    pub peer: SocketAddr,

    /// Upstream `host:port` this session connects to.
    pub upstream: String,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Accept timestamp.
    pub opened_at: DateTime<Utc>,

    /// Relay byte counters.
    pub counters: Arc<SessionCounters>,

    /// Channel into the relay task. Taken exactly once.
    pub(crate) close_tx: Option<oneshot::Sender<CloseRequest>>,
}

impl SessionEntry {
    /// Creates a new entry in [`SessionState::Connecting`].
    #[must_use]
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        upstream: String,
        close_tx: oneshot::Sender<CloseRequest>,
    ) -> Self {
        Self {
            id,
            peer,
            upstream,
            state: SessionState::Connecting,
            opened_at: Utc::now(),
            counters: Arc::new(SessionCounters::default()),
            close_tx: Some(close_tx),
        }
    }
}

/// Lightweight snapshot of a session for health output and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Remote address of the WebSocket client.
    pub peer: SocketAddr,
    /// Upstream `host:port`.
    pub upstream: String,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
    /// Accept timestamp.
    pub opened_at: DateTime<Utc>,
    /// Bytes relayed client → upstream.
    pub bytes_to_upstream: u64,
    /// Bytes relayed upstream → client.
    pub bytes_to_client: u64,
}

impl From<&SessionEntry> for SessionSummary {
    fn from(entry: &SessionEntry) -> Self {
        Self {
            id: entry.id,
            peer: entry.peer,
            upstream: entry.upstream.clone(),
            state: entry.state,
            opened_at: entry.opened_at,
            bytes_to_upstream: entry.counters.to_upstream(),
            bytes_to_client: entry.counters.to_client(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Relaying));
        assert!(Connecting.can_transition_to(Closing));
        assert!(Relaying.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn closed_is_terminal_and_no_shortcuts() {
        use SessionState::*;
        for next in [Connecting, Relaying, Closing, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(!Relaying.can_transition_to(Connecting));
        assert!(!Relaying.can_transition_to(Closed));
        assert!(!Connecting.can_transition_to(Closed));
    }

    #[test]
    fn summary_reflects_counters() {
        let (tx, _rx) = oneshot::channel();
        let entry = SessionEntry::new(
            SessionId::new(),
            SocketAddr::from(([127, 0, 0, 1], 50000)),
            "127.0.0.1:9919".to_string(),
            tx,
        );
        entry.counters.add_to_upstream(10);
        entry.counters.add_to_client(3);
        entry.counters.add_to_client(4);

        let summary = SessionSummary::from(&entry);
        assert_eq!(summary.state, SessionState::Connecting);
        assert_eq!(summary.bytes_to_upstream, 10);
        assert_eq!(summary.bytes_to_client, 7);
    }
}
