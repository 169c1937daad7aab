//! Shared fixtures: a fake upstream service and an in-process Bridge.

#![allow(dead_code, clippy::panic)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use ws_tcp_bridge::bridge::Bridge;
use ws_tcp_bridge::config::BridgeConfig;
use ws_tcp_bridge::error::BridgeError;

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(5);

/// A running Bridge with a handle to stop it.
pub struct RunningBridge {
    pub bridge: Bridge,
    pub addr: SocketAddr,
    pub shutdown: Option<oneshot::Sender<()>>,
    pub task: JoinHandle<Result<(), BridgeError>>,
}

impl RunningBridge {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Triggers shutdown and waits for `serve` to return.
    pub async fn stop(mut self) -> Result<(), BridgeError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(WAIT, self.task).await {
            Ok(Ok(result)) => result,
            _ => panic!("bridge did not stop"),
        }
    }
}

/// Binds a listener standing in for the upstream TCP service.
pub async fn upstream() -> (TcpListener, u16) {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind upstream");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("upstream address");
    };
    (listener, addr.port())
}

/// A port on which nothing is listening.
pub async fn dead_port() -> u16 {
    let (listener, port) = upstream().await;
    drop(listener);
    port
}

/// An upstream whose accept queue is full: connects to it hang until the
/// caller's timeout. The filler connections must be kept alive.
pub async fn saturated_upstream() -> (TcpListener, Vec<TcpStream>, u16) {
    let Ok(socket) = TcpSocket::new_v4() else {
        panic!("create upstream socket");
    };
    if socket.bind(SocketAddr::from(([127, 0, 0, 1], 0))).is_err() {
        panic!("bind upstream");
    }
    let Ok(listener) = socket.listen(0) else {
        panic!("listen upstream");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("upstream address");
    };

    let mut fillers = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => fillers.push(stream),
            _ => break,
        }
    }
    (listener, fillers, addr.port())
}

/// Starts a Bridge on an ephemeral port relaying to `127.0.0.1:tcp_port`.
pub async fn start_bridge(tcp_port: u16) -> RunningBridge {
    start_bridge_with_timeout(tcp_port, Duration::from_secs(2)).await
}

/// Like [`start_bridge`] with an explicit upstream connect timeout.
pub async fn start_bridge_with_timeout(tcp_port: u16, upstream_connect_timeout: Duration) -> RunningBridge {
    let config = BridgeConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        tcp_host: "127.0.0.1".to_string(),
        tcp_port,
        upstream_connect_timeout,
        relay_read_buffer: 8192,
    };
    let bridge = Bridge::new(config);
    let Ok(listener) = bridge.bind().await else {
        panic!("bind bridge");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("bridge address");
    };

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let server = bridge.clone();
    let task = tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    RunningBridge {
        bridge,
        addr,
        shutdown: Some(shutdown),
        task,
    }
}

/// Accepts the next upstream connection.
pub async fn accept(listener: &TcpListener) -> TcpStream {
    match tokio::time::timeout(WAIT, listener.accept()).await {
        Ok(Ok((stream, _))) => stream,
        _ => panic!("no upstream connection"),
    }
}

/// Reads exactly `len` bytes from the upstream side.
pub async fn read_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0_u8; len];
    match tokio::time::timeout(WAIT, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => buf,
        _ => panic!("upstream did not receive {len} bytes"),
    }
}

/// Waits until the upstream side observes EOF.
pub async fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0_u8; 64];
    match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("expected EOF, read {n} bytes"),
        Err(_) => panic!("upstream socket was not closed"),
    }
}

/// Polls `check` until it returns `true`.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
