//! Client-side connection state machine.
//!
//! [`ConnectionState`] is pure: it consumes one [`Event`] at a time and
//! returns the [`Effect`]s the driver must perform. It never touches a
//! socket or a timer itself, which keeps every transition testable
//! without a network.
//!
//! ```text
//!                 connect                 transport open
//! Disconnected ─────────────► Connecting ───────────────► Connected
//!      ▲  │                      │  ▲                         │
//!      │  │ auto-reconnect on    │  │ timer fires             │ close / error
//!      │  ▼                      ▼  │                         ▼
//!      └── Reconnecting ◄──── (failed, auto-reconnect on) ◄───┘
//! ```
//!
//! Transport events carry the [`AttemptId`] of the transport that produced
//! them, and timer events carry a [`TimerId`]; events from a superseded
//! transport or a cancelled timer are ignored.

use std::fmt;
use std::time::Duration;

use crate::config::ReconnectPolicy;
use crate::ws::messages::{InboundMessage, parse_inbound};

use super::notification::Notification;

/// Connection status exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// No transport and no pending reconnect.
    Disconnected,
    /// A transport is opening.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting for the reconnect timer.
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Bridge host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the `ws://host:port` URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies one transport (one connect attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(pub u64);

/// Identifies one armed reconnect timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Input to the state machine: caller operations and transport/timer events.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `connect(host, port)`.
    Connect(Endpoint),
    /// `disconnect()`.
    Disconnect,
    /// `send(payload)`.
    Send(String),
    /// `setAutoReconnect(enabled)`.
    SetAutoReconnect(bool),
    /// The transport finished its handshake.
    TransportOpened(AttemptId),
    /// The transport failed (before or after opening).
    TransportFailed {
        /// Transport that failed.
        attempt: AttemptId,
        /// Error text.
        reason: String,
    },
    /// The peer closed the transport.
    TransportClosed {
        /// Transport that closed.
        attempt: AttemptId,
        /// Close reason, if any.
        reason: Option<String>,
    },
    /// One whole text message arrived.
    TransportMessage {
        /// Transport that received it.
        attempt: AttemptId,
        /// Message text.
        text: String,
    },
    /// A message arrived that is not valid UTF-8 text.
    TransportMalformed {
        /// Transport that received it.
        attempt: AttemptId,
        /// Decoder error text.
        reason: String,
    },
    /// A reconnect timer elapsed.
    ReconnectTimerFired(TimerId),
}

/// Work the driver must perform after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new transport to `url`, replacing any existing one.
    OpenTransport {
        /// Identity of the new transport.
        attempt: AttemptId,
        /// `ws://host:port`.
        url: String,
    },
    /// Close the transport if it is still the current one.
    CloseTransport(AttemptId),
    /// Write one whole message on the transport.
    Transmit {
        /// Transport to write on.
        attempt: AttemptId,
        /// Payload text.
        payload: String,
    },
    /// Transmit the on-open payloads (history dump).
    FlushOnOpen(AttemptId),
    /// Start a one-shot reconnect timer, cancelling any existing one.
    ArmTimer {
        /// Identity of the timer.
        timer: TimerId,
        /// Delay.
        after: Duration,
    },
    /// Cancel the timer if it is still the current one.
    CancelTimer(TimerId),
    /// Hand a decoded message to the message sink.
    Deliver(InboundMessage),
    /// Publish a notification.
    Notify(Notification),
}

/// State of the single logical connection owned by a connection manager.
///
/// # Invariants
///
/// - `transport` is `Some` iff `status` is `Connecting` or `Connected`.
/// - `timer` is `Some` iff `status` is `Reconnecting`; at most one timer.
/// - `endpoint` changes only while `Disconnected`.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    status: ConnectionStatus,
    endpoint: Endpoint,
    auto_reconnect: bool,
    policy: ReconnectPolicy,
    transport: Option<AttemptId>,
    timer: Option<TimerId>,
    reconnect_attempts: u32,
    next_id: u64,
}

impl ConnectionState {
    /// Creates a `Disconnected` state targeting `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, auto_reconnect: bool, policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            endpoint,
            auto_reconnect,
            policy,
            transport: None,
            timer: None,
            reconnect_attempts: 0,
            next_id: 0,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Current endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether auto-reconnect is enabled.
    #[must_use]
    pub const fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// The live transport, if any.
    #[must_use]
    pub const fn transport(&self) -> Option<AttemptId> {
        self.transport
    }

    /// The pending reconnect timer, if any.
    #[must_use]
    pub const fn pending_timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Consecutive reconnect attempts since the last successful open.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Applies one event and returns the resulting effects in order.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        let from = self.status;

        match event {
            Event::Connect(endpoint) => self.on_connect(endpoint, &mut effects),
            Event::Disconnect => self.on_disconnect(&mut effects),
            Event::Send(payload) => self.on_send(payload, &mut effects),
            Event::SetAutoReconnect(enabled) => self.on_set_auto_reconnect(enabled, &mut effects),
            Event::TransportOpened(attempt) => self.on_opened(attempt, &mut effects),
            Event::TransportFailed { attempt, reason } => {
                self.on_transport_down(attempt, Some(reason), &mut effects);
            }
            Event::TransportClosed { attempt, reason } => {
                self.on_transport_down(attempt, reason, &mut effects);
            }
            Event::TransportMessage { attempt, text } => {
                self.on_message(attempt, &text, &mut effects);
            }
            Event::TransportMalformed { attempt, reason } => {
                if self.is_live(attempt) {
                    effects.push(Effect::Notify(Notification::MalformedMessage { reason }));
                }
            }
            Event::ReconnectTimerFired(timer) => self.on_timer(timer, &mut effects),
        }

        if from != self.status {
            tracing::debug!(from = %from, to = %self.status, endpoint = %self.endpoint, "connection status");
        }
        effects
    }

    fn on_connect(&mut self, endpoint: Endpoint, effects: &mut Vec<Effect>) {
        match self.status {
            ConnectionStatus::Disconnected => {
                self.endpoint = endpoint;
                self.reconnect_attempts = 0;
                self.begin_connect(effects);
            }
            ConnectionStatus::Reconnecting => {
                if endpoint != self.endpoint {
                    tracing::warn!(
                        current = %self.endpoint,
                        requested = %endpoint,
                        "endpoint is locked while reconnecting; using current endpoint"
                    );
                }
                self.cancel_timer(effects);
                self.begin_connect(effects);
            }
            ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                tracing::debug!(status = %self.status, "connect ignored; transport already live");
            }
        }
    }

    fn on_disconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.status == ConnectionStatus::Disconnected {
            return;
        }
        if let Some(attempt) = self.transport.take() {
            effects.push(Effect::CloseTransport(attempt));
        }
        self.cancel_timer(effects);
        self.status = ConnectionStatus::Disconnected;
        self.reconnect_attempts = 0;
        effects.push(Effect::Notify(Notification::Disconnected {
            unexpected: false,
            reason: None,
        }));

        // Explicit disconnect does not suppress auto-reconnect unless the
        // policy says so.
        if self.auto_reconnect && self.policy.rearm_on_disconnect {
            self.arm_timer(effects);
        }
    }

    fn on_send(&mut self, payload: String, effects: &mut Vec<Effect>) {
        match (self.status, self.transport) {
            (ConnectionStatus::Connected, Some(attempt)) => {
                effects.push(Effect::Notify(Notification::Sent {
                    bytes: payload.len(),
                }));
                effects.push(Effect::Transmit { attempt, payload });
            }
            _ => {
                tracing::warn!(status = %self.status, "send dropped: not connected");
                effects.push(Effect::Notify(Notification::NotConnected));
            }
        }
    }

    fn on_set_auto_reconnect(&mut self, enabled: bool, effects: &mut Vec<Effect>) {
        if self.auto_reconnect == enabled {
            return;
        }
        self.auto_reconnect = enabled;
        effects.push(Effect::Notify(Notification::AutoReconnectChanged { enabled }));

        if enabled {
            if self.status == ConnectionStatus::Disconnected {
                self.reconnect_attempts = 0;
                self.arm_timer(effects);
            }
        } else {
            self.cancel_timer(effects);
            if self.status == ConnectionStatus::Reconnecting {
                self.status = ConnectionStatus::Disconnected;
            }
        }
    }

    fn on_opened(&mut self, attempt: AttemptId, effects: &mut Vec<Effect>) {
        if self.transport != Some(attempt) || self.status != ConnectionStatus::Connecting {
            tracing::debug!(?attempt, "ignoring open from stale transport");
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.reconnect_attempts = 0;
        effects.push(Effect::Notify(Notification::Connected {
            url: self.endpoint.url(),
        }));
        effects.push(Effect::FlushOnOpen(attempt));
    }

    fn on_transport_down(
        &mut self,
        attempt: AttemptId,
        reason: Option<String>,
        effects: &mut Vec<Effect>,
    ) {
        if self.transport != Some(attempt) {
            tracing::debug!(?attempt, "ignoring close from stale transport");
            return;
        }
        self.transport = None;
        effects.push(Effect::CloseTransport(attempt));

        let notification = match self.status {
            ConnectionStatus::Connecting => Notification::ConnectFailed {
                reason: reason.unwrap_or_else(|| "closed before open".to_string()),
            },
            _ => Notification::Disconnected {
                unexpected: true,
                reason,
            },
        };
        self.status = ConnectionStatus::Disconnected;
        effects.push(Effect::Notify(notification));
        self.schedule_reconnect(effects);
    }

    fn is_live(&self, attempt: AttemptId) -> bool {
        self.transport == Some(attempt) && self.status == ConnectionStatus::Connected
    }

    fn on_message(&mut self, attempt: AttemptId, text: &str, effects: &mut Vec<Effect>) {
        if !self.is_live(attempt) {
            return;
        }
        match parse_inbound(text) {
            Ok(message) => {
                let kind = match &message {
                    InboundMessage::Frame(frame) => Some(frame.kind().to_string()),
                    InboundMessage::Unrecognized { kind, .. } => kind.clone(),
                };
                effects.push(Effect::Notify(Notification::Received { kind }));
                effects.push(Effect::Deliver(message));
            }
            Err(err) => {
                effects.push(Effect::Notify(Notification::MalformedMessage {
                    reason: err.to_string(),
                }));
            }
        }
    }

    fn on_timer(&mut self, timer: TimerId, effects: &mut Vec<Effect>) {
        if self.timer != Some(timer) {
            tracing::debug!(?timer, "ignoring stale reconnect timer");
            return;
        }
        self.timer = None;
        if self.status != ConnectionStatus::Reconnecting || self.transport.is_some() {
            return;
        }
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        effects.push(Effect::Notify(Notification::ReconnectAttempt {
            attempt: self.reconnect_attempts,
        }));
        self.begin_connect(effects);
    }

    /// Arms the timer if auto-reconnect is on and attempts remain.
    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if !self.auto_reconnect {
            return;
        }
        if let Some(max) = self.policy.max_attempts
            && self.reconnect_attempts >= max
        {
            effects.push(Effect::Notify(Notification::ReconnectGaveUp {
                attempts: self.reconnect_attempts,
            }));
            return;
        }
        self.arm_timer(effects);
    }

    fn begin_connect(&mut self, effects: &mut Vec<Effect>) {
        let attempt = AttemptId(self.next_id());
        let url = self.endpoint.url();
        self.transport = Some(attempt);
        self.status = ConnectionStatus::Connecting;
        effects.push(Effect::Notify(Notification::Connecting { url: url.clone() }));
        effects.push(Effect::OpenTransport { attempt, url });
    }

    fn arm_timer(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);
        let timer = TimerId(self.next_id());
        let after = self.policy.interval;
        self.timer = Some(timer);
        self.status = ConnectionStatus::Reconnecting;
        effects.push(Effect::ArmTimer { timer, after });
        effects.push(Effect::Notify(Notification::ReconnectScheduled { after }));
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.timer.take() {
            effects.push(Effect::CancelTimer(timer));
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }
}
