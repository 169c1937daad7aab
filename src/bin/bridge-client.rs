//! Headless ConnectionManager host.
//!
//! Stands in for the chat UI: each stdin line is sent as a `chat_message`
//! and recorded in a local history, which is dumped as `chat_history`
//! every time the connection opens. Lines starting with `/` are commands:
//!
//! ```text
//! /connect [host port]   /disconnect   /auto on|off
//! /test <text>           /raw <json>   /status      /quit
//! ```

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};

use ws_tcp_bridge::client::{ConnectionManager, Endpoint};
use ws_tcp_bridge::config::ClientConfig;
use ws_tcp_bridge::logging;
use ws_tcp_bridge::ws::messages::{ChatEntry, ChatFrame, InboundMessage, Role};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = ClientConfig::from_env();
    let name = std::env::var("CLIENT_NAME").unwrap_or_else(|_| "user".to_string());
    tracing::info!(
        host = %config.ws_host,
        port = config.ws_port,
        auto_connect = config.auto_connect,
        "starting bridge-client"
    );

    let (manager, driver) = ConnectionManager::spawn(&config);
    let history: Arc<Mutex<Vec<ChatEntry>>> = Arc::new(Mutex::new(Vec::new()));

    let dump = Arc::clone(&history);
    manager.on_open(move || {
        let entries = dump.lock().map(|h| h.clone()).unwrap_or_default();
        let count = entries.len();
        match ChatFrame::history(entries).to_json() {
            Ok(json) => {
                tracing::info!(count, "sending chat history");
                vec![json]
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to encode chat history");
                Vec::new()
            }
        }
    });

    let received = Arc::clone(&history);
    manager.on_message(move |message| match message {
        InboundMessage::Frame(ChatFrame::ChatMessage(entry)) => {
            println!("{}: {}", entry.name, entry.content);
            if let Ok(mut h) = received.lock() {
                h.push(entry);
            }
        }
        InboundMessage::Frame(frame) => println!("[{}] {frame:?}", frame.kind()),
        InboundMessage::Unrecognized { kind, raw } => {
            println!("[unrecognized {}] {raw}", kind.as_deref().unwrap_or("-"));
        }
    });

    let mut status = manager.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            println!("-- {current}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/connect" => {
                let mut parts = rest.split_whitespace();
                let endpoint = match (parts.next(), parts.next().and_then(|p| p.parse().ok())) {
                    (Some(host), Some(port)) => Endpoint::new(host, port),
                    _ => Endpoint::new(config.ws_host.clone(), config.ws_port),
                };
                manager.connect(endpoint);
            }
            "/disconnect" => manager.disconnect(),
            "/auto" => match rest {
                "on" => manager.set_auto_reconnect(true),
                "off" => manager.set_auto_reconnect(false),
                other => tracing::warn!(value = other, "expected `on` or `off`"),
            },
            "/test" => manager.send_frame(&ChatFrame::TestMessage(rest.to_string())),
            "/raw" => manager.send(rest),
            "/status" => println!("status: {}", manager.status()),
            "/quit" => break,
            _ => {
                let entry = ChatEntry {
                    role: Role::User,
                    content: line.to_string(),
                    name: name.clone(),
                };
                manager.send_frame(&ChatFrame::ChatMessage(entry.clone()));
                if let Ok(mut h) = history.lock() {
                    h.push(entry);
                }
            }
        }
    }

    manager.stop();
    driver.await?;
    Ok(())
}
