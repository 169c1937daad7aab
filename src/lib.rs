//! # ws-tcp-bridge
//!
//! Makes a TCP-only service reachable from a WebSocket-only client.
//!
//! The crate has two independently deployable halves that talk only over
//! the wire:
//!
//! - the **Bridge** accepts WebSocket connections and, for each one, opens
//!   exactly one TCP connection to a fixed upstream, relaying payloads
//!   verbatim in both directions and tearing both sides down together;
//! - the **ConnectionManager** owns a single outbound WebSocket to the
//!   Bridge, with a fixed-interval auto-reconnect policy.
//!
//! ## Architecture
//!
//! ```text
//! UI / chat layer
//!     │
//!     ├── ConnectionManager (client/)
//!     │       └── ConnectionState machine + transport task
//!     │
//!     │   ws://host:9918
//!     ▼
//! Bridge (bridge.rs, api/, ws/)
//!     ├── SessionRegistry (domain/)
//!     └── one relay task per session
//!             │
//!             │   tcp://127.0.0.1:9919
//!             ▼
//!         Upstream service
//! ```

pub mod api;
pub mod app_state;
pub mod bridge;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ws;
