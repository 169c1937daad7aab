//! Live-session registry owned by a single Bridge instance.
//!
//! [`SessionRegistry`] maps [`SessionId`]s to their [`SessionEntry`]. It is
//! the only state shared between sessions; each relay task owns its own
//! sockets and consults the registry before acting on a socket event, so a
//! session that has been deregistered can never be revived by a late event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};

use super::SessionId;
use super::session::{CloseRequest, SessionCounters, SessionEntry, SessionState, SessionSummary};
use crate::error::BridgeError;

/// Handed to a relay task when its session is registered.
#[derive(Debug)]
pub struct SessionTicket {
    /// Identifier of the new session.
    pub id: SessionId,
    /// Byte counters shared with the registry entry.
    pub counters: Arc<SessionCounters>,
    /// Fires when the registry asks the session to close.
    pub close_rx: oneshot::Receiver<CloseRequest>,
}

#[derive(Debug)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    accepting: bool,
}

/// Keyed collection of live sessions.
///
/// # Concurrency
///
/// A single `RwLock` guards the map. The lock is never held across a
/// socket operation or while waiting on a relay task.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    /// Creates an empty registry that accepts new sessions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                accepting: true,
            }),
        }
    }

    /// Registers a new session in [`SessionState::Connecting`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ShuttingDown`] once [`Self::close_all`] has run.
    pub async fn register(
        &self,
        peer: SocketAddr,
        upstream: String,
    ) -> Result<SessionTicket, BridgeError> {
        let mut inner = self.inner.write().await;
        if !inner.accepting {
            return Err(BridgeError::ShuttingDown);
        }

        let id = SessionId::new();
        let (close_tx, close_rx) = oneshot::channel();
        let entry = SessionEntry::new(id, peer, upstream, close_tx);
        let counters = Arc::clone(&entry.counters);
        inner.sessions.insert(id, entry);

        Ok(SessionTicket {
            id,
            counters,
            close_rx,
        })
    }

    /// Moves a session to `next`.
    ///
    /// Returns `false` if the session is no longer registered or the
    /// transition is not legal. A relay task that gets `false` must stop
    /// acting on its sockets.
    pub async fn transition(&self, id: SessionId, next: SessionState) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return false;
        };
        if !entry.state.can_transition_to(next) {
            tracing::warn!(session_id = %id, from = %entry.state, to = %next, "illegal session transition");
            return false;
        }
        tracing::debug!(session_id = %id, from = %entry.state, to = %next, "session transition");
        entry.state = next;
        true
    }

    /// Removes a session without signalling its task. Used by the relay
    /// task itself during teardown.
    pub async fn deregister(&self, id: SessionId) -> Option<SessionSummary> {
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .remove(&id)
            .map(|entry| SessionSummary::from(&entry))
    }

    /// Deregisters a session and waits until its task has closed both
    /// sockets.
    ///
    /// Returns `false` if no such session was registered.
    pub async fn close(&self, id: SessionId) -> bool {
        let entry = self.inner.write().await.sessions.remove(&id);
        match entry {
            Some(entry) => {
                signal_close(entry).await;
                true
            }
            None => false,
        }
    }

    /// Stops accepting new sessions, then closes every live one.
    ///
    /// Returns the number of sessions that were closed.
    pub async fn close_all(&self) -> usize {
        let entries: Vec<SessionEntry> = {
            let mut inner = self.inner.write().await;
            inner.accepting = false;
            inner.sessions.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in entries {
            signal_close(entry).await;
        }
        count
    }

    /// Returns a snapshot of one session.
    pub async fn get(&self, id: SessionId) -> Option<SessionSummary> {
        let inner = self.inner.read().await;
        inner.sessions.get(&id).map(SessionSummary::from)
    }

    /// Returns `true` if the session is still registered.
    pub async fn contains(&self, id: SessionId) -> bool {
        self.inner.read().await.sessions.contains_key(&id)
    }

    /// Returns snapshots of all live sessions.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let inner = self.inner.read().await;
        inner.sessions.values().map(SessionSummary::from).collect()
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Returns `true` if there are no live sessions.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    /// Returns `false` once shutdown has begun.
    pub async fn is_accepting(&self) -> bool {
        self.inner.read().await.accepting
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Asks the owning task to close its sockets and waits for the reply.
/// A task that already exited drops both channels, which ends the wait.
async fn signal_close(mut entry: SessionEntry) {
    let Some(close_tx) = entry.close_tx.take() else {
        return;
    };
    let (ack_tx, ack_rx) = oneshot::channel();
    if close_tx.send(ack_tx).is_ok() {
        let _ = ack_rx.await;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    async fn register(registry: &SessionRegistry) -> SessionTicket {
        let Ok(ticket) = registry.register(peer(), "127.0.0.1:9919".to_string()).await else {
            panic!("registration should succeed");
        };
        ticket
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = SessionRegistry::new();
        let ticket = register(&registry).await;

        let Some(summary) = registry.get(ticket.id).await else {
            panic!("session should be registered");
        };
        assert_eq!(summary.state, SessionState::Connecting);
        assert_eq!(summary.peer, peer());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn transition_follows_lifecycle() {
        let registry = SessionRegistry::new();
        let ticket = register(&registry).await;

        assert!(registry.transition(ticket.id, SessionState::Relaying).await);
        assert!(!registry.transition(ticket.id, SessionState::Connecting).await);
        assert!(registry.transition(ticket.id, SessionState::Closing).await);

        let Some(summary) = registry.get(ticket.id).await else {
            panic!("session should be registered");
        };
        assert_eq!(summary.state, SessionState::Closing);
    }

    #[tokio::test]
    async fn transition_on_unknown_session_is_rejected() {
        let registry = SessionRegistry::new();
        assert!(!registry.transition(SessionId::new(), SessionState::Relaying).await);
    }

    #[tokio::test]
    async fn deregister_removes_entry() {
        let registry = SessionRegistry::new();
        let ticket = register(&registry).await;

        assert!(registry.deregister(ticket.id).await.is_some());
        assert!(!registry.contains(ticket.id).await);
        assert!(registry.deregister(ticket.id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn close_waits_for_task_acknowledgement() {
        let registry = Arc::new(SessionRegistry::new());
        let ticket = register(&registry).await;
        let id = ticket.id;

        let task = tokio::spawn(async move {
            let Ok(ack) = ticket.close_rx.await else {
                panic!("close request expected");
            };
            let _ = ack.send(());
            true
        });

        assert!(registry.close(id).await);
        assert!(!registry.contains(id).await);
        assert!(matches!(task.await, Ok(true)));
    }

    #[tokio::test]
    async fn close_of_exited_task_does_not_hang() {
        let registry = SessionRegistry::new();
        let ticket = register(&registry).await;
        let id = ticket.id;
        drop(ticket);

        assert!(registry.close(id).await);
        assert!(!registry.close(id).await);
    }

    #[tokio::test]
    async fn close_all_stops_accepting() {
        let registry = SessionRegistry::new();
        // Nobody answers the close requests; dropping the tickets lets
        // close_all finish.
        drop(register(&registry).await);
        drop(register(&registry).await);

        assert_eq!(registry.close_all().await, 2);
        assert!(registry.is_empty().await);
        assert!(!registry.is_accepting().await);

        let result = registry.register(peer(), "127.0.0.1:9919".to_string()).await;
        assert!(matches!(result, Err(BridgeError::ShuttingDown)));
    }
}
