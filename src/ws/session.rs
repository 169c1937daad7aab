//! Per-session relay between one WebSocket client and one upstream TCP peer.
//!
//! A session task owns both sockets. It registers itself, connects
//! upstream, forwards payloads in both directions, and on the first close
//! or error from either side (or a close request from the registry) tears
//! down both sockets in one step.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::WriteHalf;
use tokio::sync::oneshot;

use crate::app_state::AppState;
use crate::config::BridgeConfig;
use crate::domain::session::CloseRequest;
use crate::domain::{SessionCounters, SessionId, SessionRegistry, SessionState};
use crate::error::BridgeError;

/// Upper bound on sending the close frame and shutting down the upstream
/// socket during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Why a session ended.
#[derive(Debug)]
enum CloseReason {
    /// The WebSocket client sent a close frame or went away.
    ClientClosed,
    /// The upstream peer closed its end.
    UpstreamClosed,
    /// Upstream connect failure or a transport error on either leg.
    Failed(BridgeError),
    /// The registry asked the session to close and waits on the sender.
    Requested(CloseRequest),
    /// The session disappeared from the registry.
    Deregistered,
}

impl CloseReason {
    fn from_request(request: Result<CloseRequest, oneshot::error::RecvError>) -> Self {
        match request {
            Ok(ack) => Self::Requested(ack),
            Err(_) => Self::Deregistered,
        }
    }

    fn close_frame(&self) -> CloseFrame {
        let (code, reason) = match self {
            Self::ClientClosed => (close_code::NORMAL, "client closed"),
            Self::UpstreamClosed => (close_code::NORMAL, "upstream closed"),
            Self::Failed(BridgeError::UpstreamConnect { .. } | BridgeError::UpstreamTimeout { .. }) => {
                (close_code::ERROR, "upstream unavailable")
            }
            Self::Failed(_) => (close_code::ERROR, "relay error"),
            Self::Requested(_) | Self::Deregistered => (close_code::AWAY, "bridge closing"),
        };
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }
}

/// State owned by one session task. The sockets are passed alongside so
/// teardown can take them by value.
#[derive(Debug)]
struct Session {
    id: SessionId,
    registry: Arc<SessionRegistry>,
    counters: Arc<SessionCounters>,
    close_rx: oneshot::Receiver<CloseRequest>,
}

/// Runs one session from WebSocket accept to teardown.
pub async fn run_session(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let upstream = state.config.upstream_addr();
    let ticket = match state.registry.register(peer, upstream.clone()).await {
        Ok(ticket) => ticket,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "rejecting websocket connection");
            let (mut ws_tx, _ws_rx) = socket.split();
            close_websocket(&mut ws_tx, CloseReason::Failed(err).close_frame()).await;
            return;
        }
    };

    let mut session = Session {
        id: ticket.id,
        registry: Arc::clone(&state.registry),
        counters: ticket.counters,
        close_rx: ticket.close_rx,
    };
    tracing::info!(session_id = %session.id, %peer, %upstream, "session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    match session.connect_upstream(&state.config, &mut ws_rx).await {
        Ok((mut tcp, pending)) => {
            let reason = session
                .relay(&mut tcp, &mut ws_tx, &mut ws_rx, pending, state.config.relay_read_buffer)
                .await;
            session.teardown(ws_tx, Some(tcp), reason).await;
        }
        Err(reason) => session.teardown(ws_tx, None, reason).await,
    }
}

impl Session {
    /// `Connecting` → `Relaying`. Exactly one connect attempt, bounded by
    /// the configured timeout.
    ///
    /// The client stays watched while the attempt is in flight: a close
    /// ends the session at once, and payloads are held back and returned
    /// in arrival order for the relay to forward first.
    async fn connect_upstream(
        &mut self,
        config: &BridgeConfig,
        ws_rx: &mut WsStream,
    ) -> Result<(TcpStream, VecDeque<Message>), CloseReason> {
        let addr = config.upstream_addr();
        let timeout = config.upstream_connect_timeout;
        let connect = tokio::time::timeout(timeout, TcpStream::connect(addr.clone()));
        tokio::pin!(connect);

        let mut pending = VecDeque::new();
        let result = loop {
            tokio::select! {
                biased;
                request = &mut self.close_rx => return Err(CloseReason::from_request(request)),
                msg = ws_rx.next() => match msg {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => pending.push_back(msg),
                    Some(Ok(Message::Close(_))) | None => return Err(CloseReason::ClientClosed),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return Err(CloseReason::Failed(BridgeError::Transport(err.to_string())));
                    }
                },
                result = &mut connect => break result,
            }
        };

        let tcp = match result {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(source)) => {
                return Err(CloseReason::Failed(BridgeError::UpstreamConnect { addr, source }));
            }
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(CloseReason::Failed(BridgeError::UpstreamTimeout { addr, timeout_ms }));
            }
        };

        if !self.registry.transition(self.id, SessionState::Relaying).await {
            return Err(CloseReason::Deregistered);
        }
        if let Err(err) = tcp.set_nodelay(true) {
            tracing::debug!(session_id = %self.id, error = %err, "failed to set TCP_NODELAY");
        }
        tracing::debug!(
            session_id = %self.id,
            upstream = %addr,
            pending = pending.len(),
            "upstream connected"
        );
        Ok((tcp, pending))
    }

    /// Forwards payloads both ways until either side closes or errors.
    ///
    /// Each WebSocket message becomes one TCP write; each TCP read becomes
    /// one WebSocket message. Order is preserved per direction.
    async fn relay(
        &mut self,
        tcp: &mut TcpStream,
        ws_tx: &mut WsSink,
        ws_rx: &mut WsStream,
        pending: VecDeque<Message>,
        read_buffer: usize,
    ) -> CloseReason {
        let (mut tcp_rx, mut tcp_tx) = tcp.split();

        for msg in pending {
            let bytes: &[u8] = match &msg {
                Message::Text(text) => text.as_str().as_bytes(),
                Message::Binary(bytes) => bytes.as_ref(),
                _ => continue,
            };
            if let Err(err) = self.to_upstream(&mut tcp_tx, bytes).await {
                return CloseReason::Failed(err);
            }
        }

        let mut buf = Vec::with_capacity(read_buffer);
        loop {
            tokio::select! {
                biased;
                request = &mut self.close_rx => return CloseReason::from_request(request),
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(err) = self.to_upstream(&mut tcp_tx, text.as_str().as_bytes()).await {
                                return CloseReason::Failed(err);
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            if let Err(err) = self.to_upstream(&mut tcp_tx, &bytes).await {
                                return CloseReason::Failed(err);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            return CloseReason::Failed(BridgeError::Transport(err.to_string()));
                        }
                    }
                }
                read = tcp_rx.read_buf(&mut buf) => {
                    match read {
                        Ok(0) => return CloseReason::UpstreamClosed,
                        Ok(n) => {
                            let chunk = std::mem::take(&mut buf);
                            buf.reserve(read_buffer);
                            if let Err(err) = ws_tx.send(into_ws_message(chunk)).await {
                                return CloseReason::Failed(BridgeError::Transport(err.to_string()));
                            }
                            self.counters.add_to_client(n);
                            tracing::trace!(session_id = %self.id, bytes = n, "upstream -> client");
                        }
                        Err(err) => {
                            return CloseReason::Failed(BridgeError::Transport(err.to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn to_upstream(&self, tcp_tx: &mut WriteHalf<'_>, bytes: &[u8]) -> Result<(), BridgeError> {
        tcp_tx
            .write_all(bytes)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        self.counters.add_to_upstream(bytes.len());
        tracing::trace!(session_id = %self.id, bytes = bytes.len(), "client -> upstream");
        Ok(())
    }

    /// `Closing` → `Closed`: closes both sockets, deregisters, and answers
    /// a pending close request.
    async fn teardown(mut self, mut ws_tx: WsSink, tcp: Option<TcpStream>, reason: CloseReason) {
        // Still registered unless the registry initiated the close.
        self.registry.transition(self.id, SessionState::Closing).await;

        match &reason {
            CloseReason::Failed(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "closing session");
            }
            other => tracing::debug!(session_id = %self.id, reason = ?other, "closing session"),
        }

        let frame = reason.close_frame();
        if let Some(mut tcp) = tcp {
            let _ = tokio::time::timeout(CLOSE_GRACE, tcp.shutdown()).await;
        }
        close_websocket(&mut ws_tx, frame).await;
        drop(ws_tx);

        self.registry.deregister(self.id).await;
        tracing::info!(
            session_id = %self.id,
            state = %SessionState::Closed,
            bytes_to_upstream = self.counters.to_upstream(),
            bytes_to_client = self.counters.to_client(),
            "session closed"
        );

        let ack = match reason {
            CloseReason::Requested(ack) => Some(ack),
            _ => self.close_rx.try_recv().ok(),
        };
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

async fn close_websocket(ws_tx: &mut WsSink, frame: CloseFrame) {
    let close = async {
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
        let _ = ws_tx.close().await;
    };
    let _ = tokio::time::timeout(CLOSE_GRACE, close).await;
}

/// One TCP read → one WebSocket message. Text when the chunk is valid
/// UTF-8, binary otherwise.
fn into_ws_message(buf: Vec<u8>) -> Message {
    match String::from_utf8(buf) {
        Ok(text) => Message::text(text),
        Err(err) => Message::binary(err.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_chunks_become_text_frames() {
        let msg = into_ws_message(br#"{"type":"test_message","content":"hi"}"#.to_vec());
        assert!(matches!(msg, Message::Text(ref t) if t.as_str() == r#"{"type":"test_message","content":"hi"}"#));
    }

    #[test]
    fn non_utf8_chunks_become_binary_frames() {
        let msg = into_ws_message(vec![0xff, 0xfe, 0x00]);
        assert!(matches!(msg, Message::Binary(ref b) if b.to_vec() == vec![0xff, 0xfe, 0x00]));
    }

    #[test]
    fn upstream_failures_close_with_error_code() {
        let reason = CloseReason::Failed(BridgeError::UpstreamConnect {
            addr: "127.0.0.1:9919".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        });
        let frame = reason.close_frame();
        assert_eq!(frame.code, close_code::ERROR);
        assert_eq!(frame.reason.as_str(), "upstream unavailable");

        assert_eq!(CloseReason::UpstreamClosed.close_frame().code, close_code::NORMAL);
        assert_eq!(CloseReason::UpstreamClosed.close_frame().reason.as_str(), "upstream closed");
        assert_eq!(CloseReason::ClientClosed.close_frame().code, close_code::NORMAL);
        assert_eq!(CloseReason::ClientClosed.close_frame().reason.as_str(), "client closed");
        assert_eq!(CloseReason::Deregistered.close_frame().code, close_code::AWAY);
    }
}
