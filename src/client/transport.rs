//! One outbound WebSocket connection attempt, run as its own task.
//!
//! The task reports everything it observes to the driver as a state
//! machine [`Event`] tagged with its [`AttemptId`], and writes whatever the
//! driver queues on its outbound channel. It never decides anything on
//! its own.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::state::{AttemptId, Event};
use crate::error::ClientError;

/// Work queued for the transport task.
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Driver-side handle to a running transport task.
#[derive(Debug)]
pub struct TransportHandle {
    attempt: AttemptId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    /// Identity of this transport.
    #[must_use]
    pub const fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Queues one whole text message. Messages are written in queue order.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the task has already exited.
    pub fn send(&self, payload: String) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Text(payload))
            .map_err(|_| ClientError::Transport("transport task exited".to_string()))
    }

    /// Asks the task to send a close frame and exit. A task still in its
    /// handshake gives up on the attempt.
    pub fn close(self) {
        if self.outbound.send(Outbound::Close).is_err() {
            tracing::trace!(attempt = ?self.attempt, "transport already exited");
        }
    }
}

/// Spawns a task that connects to `url` and pumps messages until the
/// connection ends or the driver closes it.
pub fn spawn(
    attempt: AttemptId,
    url: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<Event>,
) -> TransportHandle {
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(attempt, url, connect_timeout, events, outbound_rx));
    TransportHandle { attempt, outbound }
}

async fn run(
    attempt: AttemptId,
    url: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<Event>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    tracing::debug!(?attempt, %url, "opening websocket");

    let stream = tokio::select! {
        result = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => {
            match result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(err)) => {
                    let _ = events.send(Event::TransportFailed {
                        attempt,
                        reason: ClientError::Transport(err.to_string()).to_string(),
                    });
                    return;
                }
                Err(_) => {
                    let timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);
                    let _ = events.send(Event::TransportFailed {
                        attempt,
                        reason: ClientError::ConnectTimeout(timeout_ms).to_string(),
                    });
                    return;
                }
            }
        }
        // Closed by the driver before the handshake finished.
        _ = wait_for_close(&mut outbound_rx) => return,
    };

    if events.send(Event::TransportOpened(attempt)).is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = stream.split();
    loop {
        tokio::select! {
            out = outbound_rx.recv() => {
                match out {
                    Some(Outbound::Text(payload)) => {
                        if let Err(err) = ws_tx.send(Message::text(payload)).await {
                            let _ = events.send(Event::TransportFailed {
                                attempt,
                                reason: ClientError::Transport(err.to_string()).to_string(),
                            });
                            return;
                        }
                    }
                    // Closed by the driver: it already moved on, so no event.
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        let _ = ws_tx.close().await;
                        tracing::debug!(?attempt, "websocket closed by client");
                        return;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(Event::TransportMessage {
                            attempt,
                            text: text.as_str().to_owned(),
                        });
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let event = match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => Event::TransportMessage { attempt, text },
                            Err(err) => Event::TransportMalformed {
                                attempt,
                                reason: ClientError::MalformedMessage(err.to_string()).to_string(),
                            },
                        };
                        let _ = events.send(event);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        let _ = events.send(Event::TransportClosed { attempt, reason });
                        return;
                    }
                    None => {
                        let _ = events.send(Event::TransportClosed { attempt, reason: None });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = events.send(Event::TransportFailed {
                            attempt,
                            reason: ClientError::Transport(err.to_string()).to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}

/// Resolves once the driver queues a close or drops the handle. Text
/// queued before the handshake cannot exist: the state machine only
/// transmits while connected.
async fn wait_for_close(outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound_rx.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Text(_)) => {}
        }
    }
}
