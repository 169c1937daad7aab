//! Domain layer: session identity, lifecycle state and the live-session
//! registry used by the Bridge.

pub mod session;
pub mod session_id;
pub mod session_registry;

pub use session::{SessionCounters, SessionEntry, SessionState, SessionSummary};
pub use session_id::SessionId;
pub use session_registry::{SessionRegistry, SessionTicket};
