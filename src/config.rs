//! Bridge and client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Both components are independently
//! deployable, so each has its own config type and loader.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default port the Bridge accepts WebSocket connections on.
pub const DEFAULT_WS_PORT: u16 = 9918;

/// Default upstream TCP port.
pub const DEFAULT_TCP_PORT: u16 = 9919;

/// Default upstream TCP host.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Default fixed reconnect interval.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Server-side configuration for the Bridge process.
///
/// Loaded once at startup via [`BridgeConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Socket address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,

    /// Upstream TCP host every session connects to.
    pub tcp_host: String,

    /// Upstream TCP port every session connects to.
    pub tcp_port: u16,

    /// Upper bound on a single upstream connect attempt.
    pub upstream_connect_timeout: Duration,

    /// Maximum number of bytes taken from one TCP read. Each read becomes
    /// exactly one WebSocket message.
    pub relay_read_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_WS_PORT),
            tcp_host: DEFAULT_TCP_HOST.to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            upstream_connect_timeout: Duration::from_secs(5),
            relay_read_buffer: 8192,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `WS_BIND_HOST` is set but cannot be parsed as
    /// an IP address.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let bind_host: IpAddr = std::env::var("WS_BIND_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse()?;
        let ws_port = parse_env("WS_PORT", DEFAULT_WS_PORT);

        let tcp_host = std::env::var("TCP_HOST").unwrap_or_else(|_| DEFAULT_TCP_HOST.to_string());
        let tcp_port = parse_env("TCP_PORT", DEFAULT_TCP_PORT);

        let connect_timeout_secs = parse_env("UPSTREAM_CONNECT_TIMEOUT_SECS", 5_u64);
        let relay_read_buffer = parse_env("RELAY_READ_BUFFER", 8192_usize).max(1);

        Ok(Self {
            listen_addr: SocketAddr::new(bind_host, ws_port),
            tcp_host,
            tcp_port,
            upstream_connect_timeout: Duration::from_secs(connect_timeout_secs),
            relay_read_buffer,
        })
    }

    /// Returns the `host:port` string of the upstream service.
    #[must_use]
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.tcp_host, self.tcp_port)
    }
}

/// Reconnection policy for the client-side connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay between reconnect attempts. No backoff is applied.
    pub interval: Duration,

    /// Maximum consecutive attempts before giving up. `None` means unlimited.
    pub max_attempts: Option<u32>,

    /// Whether an explicit `disconnect()` still arms the reconnect timer
    /// while auto-reconnect is enabled.
    pub rearm_on_disconnect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: None,
            rearm_on_disconnect: true,
        }
    }
}

/// Client-side configuration for the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bridge host (`wsUrl`).
    pub ws_host: String,

    /// Bridge port (`wsPort`).
    pub ws_port: u16,

    /// Connect at startup and keep auto-reconnect enabled.
    pub auto_connect: bool,

    /// Upper bound on a single WebSocket connect attempt.
    pub connect_timeout: Duration,

    /// Reconnect behavior.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_host: "127.0.0.1".to_string(),
            ws_port: DEFAULT_WS_PORT,
            auto_connect: false,
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to [`ClientConfig::default`].
    /// `RECONNECT_MAX_ATTEMPTS=0` means unlimited.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let max_attempts = parse_env("RECONNECT_MAX_ATTEMPTS", 0_u32);

        Self {
            ws_host: std::env::var("WS_URL").unwrap_or(defaults.ws_host),
            ws_port: parse_env("WS_PORT", defaults.ws_port),
            auto_connect: parse_env_bool("AUTO_CONNECT", defaults.auto_connect),
            connect_timeout: Duration::from_secs(parse_env("CONNECT_TIMEOUT_SECS", 5_u64)),
            reconnect: ReconnectPolicy {
                interval: Duration::from_secs(parse_env("RECONNECT_INTERVAL_SECS", 5_u64).max(1)),
                max_attempts: (max_attempts > 0).then_some(max_attempts),
                rearm_on_disconnect: parse_env_bool("RECONNECT_ON_DISCONNECT", true),
            },
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_defaults_match_documented_ports() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.listen_addr.port(), 9918);
        assert_eq!(cfg.tcp_port, 9919);
        assert_eq!(cfg.upstream_addr(), "127.0.0.1:9919");
    }

    #[test]
    fn client_defaults() {
        let cfg = ClientConfig::default();
        assert!(!cfg.auto_connect);
        assert_eq!(cfg.reconnect.interval, Duration::from_secs(5));
        assert_eq!(cfg.reconnect.max_attempts, None);
        assert!(cfg.reconnect.rearm_on_disconnect);
    }

    #[test]
    fn parse_env_falls_back_when_missing() {
        let value: u16 = parse_env("WS_TCP_BRIDGE_TEST_SURELY_UNSET", 42);
        assert_eq!(value, 42);
        assert!(parse_env_bool("WS_TCP_BRIDGE_TEST_SURELY_UNSET", true));
    }
}
