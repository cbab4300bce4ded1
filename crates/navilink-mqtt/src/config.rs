//! MQTT connection settings.

use std::time::Duration;

use navilink_core::LastWill;
use rumqttc::{MqttOptions, Transport};
use serde::{Deserialize, Serialize};

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Default for Qos {
    fn default() -> Self {
        Self::AtLeastOnce
    }
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Broker connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    pub broker: String,

    /// Broker port (default 1883 for plain TCP, 8883 for TLS).
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Connect over TLS with the platform's root certificates.
    #[serde(default)]
    pub tls: bool,

    /// QoS for publishes and subscriptions.
    #[serde(default)]
    pub qos: Qos,

    /// Delay before polling again after a connection error, in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Capacity of the client request channel and the inbound buffer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    100
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            clean_session: default_clean_session(),
            tls: false,
            qos: Qos::default(),
            reconnect_interval_ms: default_reconnect_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Enable TLS, moving the default port to 8883.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        if tls && self.port == 1883 {
            self.port = 8883;
        }
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Client options for this configuration.
    pub fn options(&self, last_will: Option<&LastWill>) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("navilink_{}", uuid::Uuid::new_v4().simple()));

        let mut opts = MqttOptions::new(client_id, &self.broker, self.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive));
        opts.set_clean_session(self.clean_session);

        if let Some(username) = &self.username {
            opts.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        if self.tls {
            opts.set_transport(Transport::tls_with_default_config());
        }
        if let Some(will) = last_will {
            opts.set_last_will(rumqttc::LastWill::new(
                &will.topic,
                will.payload.clone(),
                self.qos.into(),
                false,
            ));
        }
        opts
    }
}
