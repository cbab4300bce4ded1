//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::OperationClass;

/// Built-in defaults.
pub mod defaults {
    /// Queries and controls wait one polling interval.
    pub const QUERY_TIMEOUT_SECS: u64 = 15;
    pub const CONTROL_TIMEOUT_SECS: u64 = 15;
    /// The first exchange after connecting is slower.
    pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;
    pub const EVENT_CAPACITY: usize = 1000;
    pub const INBOUND_CAPACITY: usize = 1000;
}

/// Environment variables overriding the configuration.
pub mod env_vars {
    use super::defaults;

    pub const QUERY_TIMEOUT_SECS: &str = "NAVILINK_QUERY_TIMEOUT_SECS";
    pub const CONTROL_TIMEOUT_SECS: &str = "NAVILINK_CONTROL_TIMEOUT_SECS";
    pub const HANDSHAKE_TIMEOUT_SECS: &str = "NAVILINK_HANDSHAKE_TIMEOUT_SECS";

    fn secs(name: &str, default: u64) -> u64 {
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }

    /// Query timeout from the environment, or the default.
    pub fn query_timeout_secs() -> u64 {
        secs(QUERY_TIMEOUT_SECS, defaults::QUERY_TIMEOUT_SECS)
    }

    pub fn control_timeout_secs() -> u64 {
        secs(CONTROL_TIMEOUT_SECS, defaults::CONTROL_TIMEOUT_SECS)
    }

    pub fn handshake_timeout_secs() -> u64 {
        secs(HANDSHAKE_TIMEOUT_SECS, defaults::HANDSHAKE_TIMEOUT_SECS)
    }
}

fn default_query_timeout() -> u64 {
    defaults::QUERY_TIMEOUT_SECS
}

fn default_control_timeout() -> u64 {
    defaults::CONTROL_TIMEOUT_SECS
}

fn default_handshake_timeout() -> u64 {
    defaults::HANDSHAKE_TIMEOUT_SECS
}

fn default_event_capacity() -> usize {
    defaults::EVENT_CAPACITY
}

fn default_inbound_capacity() -> usize {
    defaults::INBOUND_CAPACITY
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Timeout for status and info queries, in seconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Timeout for control commands, in seconds.
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,

    /// Timeout for the first info exchange, in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Messages the transport may buffer ahead of the dispatch loop.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout(),
            control_timeout_secs: default_control_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            event_capacity: default_event_capacity(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

impl SessionConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self {
            query_timeout_secs: env_vars::query_timeout_secs(),
            control_timeout_secs: env_vars::control_timeout_secs(),
            handshake_timeout_secs: env_vars::handshake_timeout_secs(),
            ..Self::default()
        }
    }

    /// Set the timeout of one operation class.
    pub fn with_timeout(mut self, class: OperationClass, secs: u64) -> Self {
        match class {
            OperationClass::Query => self.query_timeout_secs = secs,
            OperationClass::Control => self.control_timeout_secs = secs,
            OperationClass::Handshake => self.handshake_timeout_secs = secs,
        }
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    pub fn timeout_for(&self, class: OperationClass) -> Duration {
        Duration::from_secs(match class {
            OperationClass::Query => self.query_timeout_secs,
            OperationClass::Control => self.control_timeout_secs,
            OperationClass::Handshake => self.handshake_timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout_for(OperationClass::Query), Duration::from_secs(15));
        assert_eq!(config.timeout_for(OperationClass::Handshake), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"control_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.control_timeout_secs, 5);
        assert_eq!(config.query_timeout_secs, 15);
        assert_eq!(config.event_capacity, 1000);
        assert_eq!(config.inbound_capacity, 1000);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::default()
            .with_timeout(OperationClass::Control, 3)
            .with_event_capacity(0)
            .with_inbound_capacity(0);
        assert_eq!(config.timeout_for(OperationClass::Control), Duration::from_secs(3));
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.inbound_capacity, 1);
    }
}
