//! Client side: the reconnecting WebSocket connection to the Bridge.
//!
//! ```text
//! UI / chat layer
//!     │  connect / disconnect / send / set_auto_reconnect
//!     ▼
//! ConnectionManager (handle) ──commands──► Driver task
//!                                            ├── ConnectionState (pure state machine)
//!                                            ├── transport task (tokio-tungstenite)
//!                                            └── reconnect timer task
//!     ▲                                       │
//!     └──── notifications / status / inbound ◄┘
//! ```

pub mod manager;
pub mod notification;
pub mod state;
pub mod transport;

pub use manager::ConnectionManager;
pub use notification::{Notification, NotificationBus, NotificationEvent};
pub use state::{ConnectionState, ConnectionStatus, Endpoint};
