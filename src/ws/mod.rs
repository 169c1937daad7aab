//! WebSocket layer: upgrade handling, per-session relay, wire messages.
//!
//! Every WebSocket accepted on `/` or `/ws` gets its own relay session
//! paired with one upstream TCP connection.

pub mod handler;
pub mod messages;
pub mod session;
