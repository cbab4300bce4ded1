//! Configuration file for the `navilink` binary.

use std::path::Path;

use anyhow::{Context, Result};
use navilink_core::{DeviceIdentity, SessionConfig, SessionContext};
use navilink_mqtt::MqttConfig;
use serde::{Deserialize, Serialize};

/// Environment variables that override the file.
pub mod env_vars {
    pub const BROKER: &str = "NAVILINK_BROKER";
    pub const USERNAME: &str = "NAVILINK_USERNAME";
    pub const PASSWORD: &str = "NAVILINK_PASSWORD";
    pub const LOG_JSON: &str = "NAVILINK_LOG_JSON";
}

/// Device to control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_type: u32,
    pub mac_address: String,
    #[serde(default)]
    pub additional_value: String,
    pub home_seq: String,
    pub user_seq: String,
    /// Client id used in envelopes and, unless set there, for MQTT.
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    pub mqtt: MqttConfig,
    pub device: DeviceConfig,
    #[serde(default = "SessionConfig::from_env")]
    pub session: SessionConfig,
}

impl CliConfig {
    /// Read the file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.fill_client_id();
        Ok(config)
    }

    /// Apply overrides from `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(broker) = var(env_vars::BROKER) {
            self.mqtt.broker = broker;
        }
        if let Some(username) = var(env_vars::USERNAME) {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = var(env_vars::PASSWORD) {
            self.mqtt.password = Some(password);
        }
    }

    /// Pick one client id for the envelope and the MQTT connection.
    pub fn fill_client_id(&mut self) {
        let client_id = self
            .device
            .client_id
            .clone()
            .or_else(|| self.mqtt.client_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.device.client_id = Some(client_id.clone());
        self.mqtt.client_id.get_or_insert(client_id);
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.device.device_type,
            &self.device.mac_address,
            self.device.additional_value.clone(),
        )
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            home_seq: Some(self.device.home_seq.clone()),
            user_seq: Some(self.device.user_seq.clone()),
            client_id: self.device.client_id.clone(),
        }
    }
}
