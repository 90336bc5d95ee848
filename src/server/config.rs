//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Default signaling port
pub const DEFAULT_PORT: u16 = 3001;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// WebSocket handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Candidates are small and latency sensitive
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Load from `BIND_ADDR`, `PORT` and `MAX_CONNECTIONS`
    ///
    /// `BIND_ADDR` is the host part only; unparsable values fall back to
    /// the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env_parse("BIND_ADDR", defaults.bind_addr.ip());
        let port = env_parse("PORT", DEFAULT_PORT);

        Self {
            bind_addr: SocketAddr::new(host, port),
            max_connections: env_parse("MAX_CONNECTIONS", defaults.max_connections),
            ..defaults
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

/// Non-empty environment variable
pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parsed environment variable, or `default` if unset or invalid
pub(crate) fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring invalid environment value");
                default
            }
        },
        None => default,
    }
}

/// Boolean flag, set only by a case-insensitive `true`
pub(crate) fn env_flag(name: &str) -> bool {
    env_string(name).is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}
