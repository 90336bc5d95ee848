//! Network traversal configuration for relay endpoints

use crate::server::config::{env_flag, env_parse, env_string};

/// Default public STUN server
pub const DEFAULT_STUN_ADDRESS: &str = "stun.l.google.com";

/// Default STUN port
pub const DEFAULT_STUN_PORT: u16 = 19302;

/// STUN/TURN settings applied to every endpoint the coordinator creates
///
/// STUN and TURN can each be switched off independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalConfig {
    /// STUN server host
    pub stun_address: Option<String>,

    /// STUN server port
    pub stun_port: Option<u16>,

    /// TURN URL (`user:password@host:port?transport=udp`)
    pub turn_url: Option<String>,

    /// Skip STUN configuration entirely
    pub disable_stun: bool,

    /// Skip TURN configuration entirely
    pub disable_turn: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            stun_address: Some(DEFAULT_STUN_ADDRESS.to_string()),
            stun_port: Some(DEFAULT_STUN_PORT),
            turn_url: None,
            disable_stun: false,
            disable_turn: false,
        }
    }
}

impl TraversalConfig {
    /// Load from `STUN_ADDRESS`, `STUN_PORT`, `TURN_URL`, `DISABLE_STUN`
    /// and `DISABLE_TURN`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            stun_address: env_string("STUN_ADDRESS").or(defaults.stun_address),
            stun_port: Some(env_parse("STUN_PORT", DEFAULT_STUN_PORT)),
            turn_url: env_string("TURN_URL"),
            disable_stun: env_flag("DISABLE_STUN"),
            disable_turn: env_flag("DISABLE_TURN"),
        }
    }

    /// Set the STUN server
    pub fn stun(mut self, address: impl Into<String>, port: u16) -> Self {
        self.stun_address = Some(address.into());
        self.stun_port = Some(port);
        self
    }

    /// Set the TURN URL
    pub fn turn(mut self, url: impl Into<String>) -> Self {
        self.turn_url = Some(url.into());
        self
    }

    /// Disable STUN
    pub fn disable_stun(mut self) -> Self {
        self.disable_stun = true;
        self
    }

    /// Disable TURN
    pub fn disable_turn(mut self) -> Self {
        self.disable_turn = true;
        self
    }

    /// Settings to hand to the relay, with disabled parts removed
    ///
    /// STUN needs both address and port; a half-configured STUN server is
    /// dropped.
    pub fn network_traversal(&self) -> NetworkTraversal {
        let stun = match (&self.stun_address, self.stun_port) {
            (Some(address), Some(port)) if !self.disable_stun && !address.is_empty() => {
                Some((address.clone(), port))
            }
            _ => None,
        };

        let turn_url = self
            .turn_url
            .clone()
            .filter(|url| !self.disable_turn && !url.is_empty());

        NetworkTraversal {
            stun_address: stun.as_ref().map(|(address, _)| address.clone()),
            stun_port: stun.map(|(_, port)| port),
            turn_url,
        }
    }
}

/// Effective traversal parameters for one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkTraversal {
    pub stun_address: Option<String>,
    pub stun_port: Option<u16>,
    pub turn_url: Option<String>,
}

impl NetworkTraversal {
    /// Whether there is anything to configure
    pub fn is_empty(&self) -> bool {
        self.stun_address.is_none() && self.turn_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_public_stun() {
        let traversal = TraversalConfig::default().network_traversal();

        assert_eq!(traversal.stun_address.as_deref(), Some(DEFAULT_STUN_ADDRESS));
        assert_eq!(traversal.stun_port, Some(DEFAULT_STUN_PORT));
        assert!(traversal.turn_url.is_none());
    }

    #[test]
    fn test_toggles_are_independent() {
        let config = TraversalConfig::default()
            .turn("user:pass@turn.example.com:3478?transport=udp")
            .disable_stun();
        let traversal = config.network_traversal();

        assert!(traversal.stun_address.is_none());
        assert!(traversal.stun_port.is_none());
        assert_eq!(
            traversal.turn_url.as_deref(),
            Some("user:pass@turn.example.com:3478?transport=udp")
        );

        let traversal = TraversalConfig::default()
            .turn("turn.example.com")
            .disable_turn()
            .network_traversal();
        assert!(traversal.stun_address.is_some());
        assert!(traversal.turn_url.is_none());
    }

    #[test]
    fn test_half_configured_stun_is_dropped() {
        let config = TraversalConfig {
            stun_port: None,
            ..TraversalConfig::default()
        };

        assert!(config.network_traversal().is_empty());
    }
}
