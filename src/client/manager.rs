//! Connection manager: the handle the UI layer holds, and the driver task
//! that owns the transport, the reconnect timer and the state machine.
//!
//! Every caller operation and every transport or timer event is turned
//! into a message and processed one at a time by the driver, so no two
//! handlers ever race on the connection state.

use std::fmt;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::notification::{Notification, NotificationBus, NotificationEvent};
use super::state::{AttemptId, ConnectionState, ConnectionStatus, Effect, Endpoint, Event, TimerId};
use super::transport::{self, TransportHandle};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::ws::messages::{ChatFrame, InboundMessage};

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 256;

/// Sink for decoded inbound messages.
pub type MessageHandler = Box<dyn FnMut(InboundMessage) + Send>;

/// Produces the payloads transmitted every time the transport opens.
pub type OpenProvider = Box<dyn FnMut() -> Vec<String> + Send>;

enum Command {
    Event(Event),
    OnMessage(MessageHandler),
    OnOpen(OpenProvider),
    Stop,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Self::OnMessage(_) => f.write_str("OnMessage(..)"),
            Self::OnOpen(_) => f.write_str("OnOpen(..)"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// Cloneable handle to one logical client connection.
///
/// All operations are fire-and-forget: outcomes are reported through
/// [`Self::notifications`] and [`Self::watch_status`].
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    notifications: NotificationBus,
}

impl ConnectionManager {
    /// Spawns the driver task. If `config.auto_connect` is set, auto-reconnect
    /// starts enabled and a connect to the configured endpoint is issued
    /// immediately.
    #[must_use]
    pub fn spawn(config: &ClientConfig) -> (Self, JoinHandle<()>) {
        let endpoint = Endpoint::new(config.ws_host.clone(), config.ws_port);
        let state = ConnectionState::new(endpoint.clone(), config.auto_connect, config.reconnect);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let notifications = NotificationBus::new(NOTIFICATION_CAPACITY);

        let driver = Driver {
            state,
            connect_timeout: config.connect_timeout,
            events_tx,
            transport: None,
            timer: None,
            on_message: None,
            on_open: None,
            status_tx,
            notifications: notifications.clone(),
        };
        let task = tokio::spawn(driver.run(commands_rx, events_rx));

        let manager = Self {
            commands,
            status,
            notifications,
        };
        if config.auto_connect {
            manager.connect(endpoint);
        }
        (manager, task)
    }

    /// Connects to `endpoint`. Ignored while already connecting or
    /// connected.
    pub fn connect(&self, endpoint: Endpoint) {
        self.dispatch(Command::Event(Event::Connect(endpoint)));
    }

    /// Closes the transport. With auto-reconnect enabled the reconnect
    /// timer is armed afterwards, per [`crate::config::ReconnectPolicy`].
    pub fn disconnect(&self) {
        self.dispatch(Command::Event(Event::Disconnect));
    }

    /// Transmits `payload` as one whole text message. When not connected
    /// the payload is dropped and [`Notification::NotConnected`] is published.
    pub fn send(&self, payload: impl Into<String>) {
        self.dispatch(Command::Event(Event::Send(payload.into())));
    }

    /// Serializes and sends a chat frame.
    pub fn send_frame(&self, frame: &ChatFrame) {
        match frame.to_json() {
            Ok(json) => self.send(json),
            Err(err) => tracing::error!(kind = frame.kind(), error = %err, "failed to encode frame"),
        }
    }

    /// Enables or disables auto-reconnect. Idempotent.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.dispatch(Command::Event(Event::SetAutoReconnect(enabled)));
    }

    /// Registers the sink for decoded inbound messages, replacing any
    /// previous one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(InboundMessage) + Send + 'static,
    {
        self.dispatch(Command::OnMessage(Box::new(handler)));
    }

    /// Registers the provider of payloads sent on every open (the chat
    /// history dump), replacing any previous one.
    pub fn on_open<F>(&self, provider: F)
    where
        F: FnMut() -> Vec<String> + Send + 'static,
    {
        self.dispatch(Command::OnOpen(Box::new(provider)));
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Waits until the status equals `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Stopped`] if the driver exits first.
    pub async fn wait_for(&self, target: ConnectionStatus) -> Result<(), ClientError> {
        let mut rx = self.status.clone();
        rx.wait_for(|status| *status == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Stopped)
    }

    /// Subscribes to notifications published from now on.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.subscribe()
    }

    /// Closes the transport, cancels the timer and stops the driver.
    pub fn stop(&self) {
        self.dispatch(Command::Stop);
    }

    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!(error = %ClientError::Stopped, "command dropped");
        }
    }
}

/// Owns the state machine and performs its effects.
struct Driver {
    state: ConnectionState,
    connect_timeout: Duration,
    events_tx: mpsc::UnboundedSender<Event>,
    transport: Option<TransportHandle>,
    timer: Option<(TimerId, JoinHandle<()>)>,
    on_message: Option<MessageHandler>,
    on_open: Option<OpenProvider>,
    status_tx: watch::Sender<ConnectionStatus>,
    notifications: NotificationBus,
}

impl Driver {
    async fn run(
        mut self,
        mut commands_rx: mpsc::UnboundedReceiver<Command>,
        mut events_rx: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            let event = tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(Command::Event(event)) => event,
                    Some(Command::OnMessage(handler)) => {
                        self.on_message = Some(handler);
                        continue;
                    }
                    Some(Command::OnOpen(provider)) => {
                        self.on_open = Some(provider);
                        continue;
                    }
                    Some(Command::Stop) | None => break,
                },
                // `events_tx` lives in `self`, so this never yields `None`.
                Some(event) = events_rx.recv() => event,
            };
            self.dispatch(event);
        }
        self.shutdown();
    }

    fn dispatch(&mut self, event: Event) {
        for effect in self.state.handle(event) {
            self.apply(effect);
        }
        let status = self.state.status();
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport { attempt, url } => {
                if let Some(old) = self.transport.take() {
                    old.close();
                }
                self.transport = Some(transport::spawn(
                    attempt,
                    url,
                    self.connect_timeout,
                    self.events_tx.clone(),
                ));
            }
            Effect::CloseTransport(attempt) => {
                if self.transport.as_ref().is_some_and(|t| t.attempt() == attempt)
                    && let Some(transport) = self.transport.take()
                {
                    transport.close();
                }
            }
            Effect::Transmit { attempt, payload } => self.transmit(attempt, payload),
            Effect::FlushOnOpen(attempt) => {
                let payloads = self.on_open.as_mut().map(|provider| provider()).unwrap_or_default();
                for payload in payloads {
                    self.notifications.publish(Notification::Sent {
                        bytes: payload.len(),
                    });
                    self.transmit(attempt, payload);
                }
            }
            Effect::ArmTimer { timer, after } => {
                self.cancel_timer();
                let events = self.events_tx.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = events.send(Event::ReconnectTimerFired(timer));
                });
                self.timer = Some((timer, task));
            }
            Effect::CancelTimer(timer) => {
                if self.timer.as_ref().is_some_and(|(id, _)| *id == timer) {
                    self.cancel_timer();
                }
            }
            Effect::Deliver(message) => match self.on_message.as_mut() {
                Some(handler) => handler(message),
                None => tracing::debug!(?message, "no message handler registered"),
            },
            Effect::Notify(notification) => {
                self.notifications.publish(notification);
            }
        }
    }

    fn transmit(&self, attempt: AttemptId, payload: String) {
        match &self.transport {
            Some(transport) if transport.attempt() == attempt => {
                if let Err(err) = transport.send(payload) {
                    tracing::warn!(?attempt, error = %err, "transmit failed");
                }
            }
            _ => tracing::debug!(?attempt, "transmit for stale transport dropped"),
        }
    }

    fn cancel_timer(&mut self) {
        if let Some((_, task)) = self.timer.take() {
            task.abort();
        }
    }

    fn shutdown(&mut self) {
        self.cancel_timer();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        tracing::debug!("connection manager stopped");
    }
}
