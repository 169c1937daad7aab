//! Observable connection events and the bus that fans them out.
//!
//! Every state transition and every reported error of the connection
//! manager becomes a [`Notification`]. The UI layer subscribes to the
//! [`NotificationBus`] and decides how to present them; the bus also
//! writes each one to the log.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Something the connection manager wants its owner to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A connect attempt started.
    Connecting {
        /// Target URL.
        url: String,
    },
    /// The transport opened.
    Connected {
        /// Target URL.
        url: String,
    },
    /// The transport failed before it opened.
    ConnectFailed {
        /// Transport error text.
        reason: String,
    },
    /// The transport closed.
    Disconnected {
        /// `false` when the close came from `disconnect()`.
        unexpected: bool,
        /// Close reason, if the peer gave one.
        reason: Option<String>,
    },
    /// A reconnect attempt will run after `after`.
    ReconnectScheduled {
        /// Delay until the attempt.
        after: Duration,
    },
    /// A reconnect attempt is starting.
    ReconnectAttempt {
        /// Consecutive attempt number, starting at 1.
        attempt: u32,
    },
    /// The attempt limit was reached; no further attempts will be made.
    ReconnectGaveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// Auto-reconnect was switched on or off.
    AutoReconnectChanged {
        /// New setting.
        enabled: bool,
    },
    /// `send` was called while not connected; the payload was dropped.
    NotConnected,
    /// An inbound payload could not be decoded and was dropped.
    MalformedMessage {
        /// Decoder error text.
        reason: String,
    },
    /// A payload was handed to the transport.
    Sent {
        /// Payload length in bytes.
        bytes: usize,
    },
    /// A payload was decoded and delivered to the message sink.
    Received {
        /// The message's `type`, if it had one.
        kind: Option<String>,
    },
}

impl Notification {
    /// Returns `true` for notifications that report an error condition.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::Disconnected {
                    unexpected: true,
                    ..
                }
                | Self::ReconnectGaveUp { .. }
                | Self::NotConnected
                | Self::MalformedMessage { .. }
        )
    }
}

/// A [`Notification`] stamped with the time it was published.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// Publication time.
    pub at: DateTime<Utc>,
    /// The notification.
    pub notification: Notification,
}

/// Broadcast bus for [`NotificationEvent`]s.
///
/// Backed by a `tokio::broadcast` channel. Slow subscribers lose the
/// oldest events rather than blocking the connection manager.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl NotificationBus {
    /// Creates a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Logs and publishes a notification.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, notification: Notification) -> usize {
        if notification.is_error() {
            tracing::warn!(?notification, "connection notification");
        } else {
            tracing::info!(?notification, "connection notification");
        }
        let event = NotificationEvent {
            at: Utc::now(),
            notification,
        };
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a receiver for all future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
