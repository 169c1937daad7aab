//! End-to-end relay tests: a real WebSocket client, an in-process Bridge
//! and a plain TCP listener standing in for the upstream service.

#![allow(clippy::panic, clippy::indexing_slicing)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use ws_tcp_bridge::domain::SessionState;

use common::{
    WAIT, accept, dead_port, eventually, expect_eof, read_len, saturated_upstream, start_bridge,
    start_bridge_with_timeout, upstream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open(url: &str) -> Client {
    let (ws, _response) = tokio_test::assert_ok!(connect_async(url).await);
    ws
}

async fn next_message(ws: &mut Client) -> Message {
    match tokio::time::timeout(WAIT, ws.next()).await {
        Ok(Some(Ok(msg))) => msg,
        Ok(other) => panic!("websocket ended: {other:?}"),
        Err(_) => panic!("no websocket message"),
    }
}

async fn expect_close_code(ws: &mut Client, expected: u16) {
    loop {
        match next_message(ws).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), expected);
                return;
            }
            Message::Close(None) => panic!("close frame without a code"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn client_messages_reach_upstream_verbatim_and_in_order() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let mut tcp = accept(&listener).await;

    let payloads = [
        r#"{"type":"test_message","content":"p1"}"#,
        r#"{"type":"test_message","content":"p2"}"#,
        r#"{"type":"test_message","content":"p3"}"#,
    ];
    for payload in payloads {
        tokio_test::assert_ok!(ws.send(Message::text(payload)).await);
    }

    let expected = payloads.concat();
    let received = read_len(&mut tcp, expected.len()).await;
    assert_eq!(received, expected.as_bytes());

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn binary_messages_are_forwarded_as_raw_bytes() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let mut tcp = accept(&listener).await;

    let bytes = vec![0x00, 0x9f, 0x92, 0x96, 0xff];
    tokio_test::assert_ok!(ws.send(Message::binary(bytes.clone())).await);
    assert_eq!(read_len(&mut tcp, bytes.len()).await, bytes);

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn upstream_bytes_reach_the_client_as_text() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let mut tcp = accept(&listener).await;

    let reply = r#"{"type":"chat_message","content":{"role":"assistant","content":"hello","name":"Bot"}}"#;
    tokio_test::assert_ok!(tcp.write_all(reply.as_bytes()).await);

    let Message::Text(text) = next_message(&mut ws).await else {
        panic!("expected a text message");
    };
    assert_eq!(text.as_str(), reply);

    let registry = bridge.bridge.registry();
    let expected = reply.len() as u64;
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move {
            let sessions = registry.list().await;
            sessions.len() == 1 && sessions.iter().all(|s| s.bytes_to_client == expected)
        }
    })
    .await;

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn consecutive_upstream_reads_arrive_as_separate_messages() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let mut tcp = accept(&listener).await;

    for chunk in ["first chunk", "2nd", "third"] {
        tokio_test::assert_ok!(tcp.write_all(chunk.as_bytes()).await);
        let Message::Text(text) = next_message(&mut ws).await else {
            panic!("expected a text message");
        };
        assert_eq!(text.as_str(), chunk);
    }

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn upstream_close_closes_the_websocket() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let tcp = accept(&listener).await;

    drop(tcp);
    expect_close_code(&mut ws, 1000).await;

    let registry = bridge.bridge.registry();
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.is_empty().await }
    })
    .await;

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn client_close_closes_the_upstream_socket() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let mut tcp = accept(&listener).await;

    tokio_test::assert_ok!(ws.close(None).await);
    expect_eof(&mut tcp).await;

    let registry = bridge.bridge.registry();
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.is_empty().await }
    })
    .await;

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn unreachable_upstream_closes_with_error_code() {
    let bridge = start_bridge(dead_port().await).await;
    let mut ws = open(&bridge.ws_url()).await;

    expect_close_code(&mut ws, 1011).await;

    let registry = bridge.bridge.registry();
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.is_empty().await }
    })
    .await;

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn upstream_connect_timeout_closes_with_error_code() {
    let (_listener, _fillers, port) = saturated_upstream().await;
    let bridge = start_bridge_with_timeout(port, Duration::from_millis(300)).await;
    let mut ws = open(&bridge.ws_url()).await;

    expect_close_code(&mut ws, 1011).await;

    let registry = bridge.bridge.registry();
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.is_empty().await }
    })
    .await;

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn client_close_while_connecting_ends_the_session() {
    let (_listener, _fillers, port) = saturated_upstream().await;
    // Far longer than any wait below: the session must not outlive the client.
    let bridge = start_bridge_with_timeout(port, Duration::from_secs(60)).await;
    let mut ws = open(&bridge.ws_url()).await;

    let registry = bridge.bridge.registry();
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move {
            let sessions = registry.list().await;
            sessions.len() == 1 && sessions.iter().all(|s| s.state == SessionState::Connecting)
        }
    })
    .await;

    tokio_test::assert_ok!(ws.send(Message::text("queued")).await);
    tokio_test::assert_ok!(ws.close(None).await);
    expect_close_code(&mut ws, 1000).await;

    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.is_empty().await }
    })
    .await;

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn sessions_are_independent() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;

    let mut first = open(&bridge.ws_url()).await;
    let mut first_tcp = accept(&listener).await;
    let mut second = open(&bridge.ws_url()).await;
    let mut second_tcp = accept(&listener).await;

    tokio_test::assert_ok!(first.send(Message::text("one")).await);
    tokio_test::assert_ok!(second.send(Message::text("two")).await);
    assert_eq!(read_len(&mut first_tcp, 3).await, b"one");
    assert_eq!(read_len(&mut second_tcp, 3).await, b"two");

    drop(first_tcp);
    expect_close_code(&mut first, 1000).await;

    // The second session keeps relaying.
    tokio_test::assert_ok!(second.send(Message::text("still here")).await);
    assert_eq!(read_len(&mut second_tcp, 10).await, b"still here");
    assert_eq!(bridge.bridge.registry().len().await, 1);

    tokio_test::assert_ok!(bridge.stop().await);
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let mut ws = open(&bridge.ws_url()).await;
    let mut tcp = accept(&listener).await;

    let registry = bridge.bridge.registry();
    tokio_test::assert_ok!(bridge.stop().await);

    expect_close_code(&mut ws, 1001).await;
    expect_eof(&mut tcp).await;
    assert!(registry.is_empty().await);
    assert!(!registry.is_accepting().await);
}

#[tokio::test]
async fn health_reports_upstream_and_sessions() {
    let (listener, port) = upstream().await;
    let bridge = start_bridge(port).await;
    let url = format!("http://{}/health", bridge.addr);

    let response = tokio_test::assert_ok!(reqwest::get(&url).await);
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = tokio_test::assert_ok!(response.json().await);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["upstream"], format!("127.0.0.1:{port}"));

    let _ws = open(&bridge.ws_url()).await;
    let _tcp = accept(&listener).await;
    let response = tokio_test::assert_ok!(reqwest::get(&url).await);
    let body: serde_json::Value = tokio_test::assert_ok!(response.json().await);
    assert_eq!(body["sessions"], 1);

    tokio_test::assert_ok!(bridge.stop().await);
}
