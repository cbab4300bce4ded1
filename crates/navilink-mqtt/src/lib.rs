//! MQTT transport adapter for `navilink-core`.
//!
//! Connection lifecycle, credentials, TLS and the last-will registration
//! live here; the protocol layer only sees the [`Transport`] contract.
//!
//! [`Transport`]: navilink_core::Transport

pub mod config;
pub mod transport;

pub use config::{MqttConfig, Qos};
pub use transport::MqttTransport;
