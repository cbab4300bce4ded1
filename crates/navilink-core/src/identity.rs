//! Device identity, protocol generation and backend session context.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device type that speaks the current (MGPP) generation.
pub const CURRENT_GENERATION_DEVICE_TYPE: u32 = 52;

/// Wire-protocol generation of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// Protocol version 1: channel based gateways.
    Legacy,
    /// Protocol version 2: heat-pump units (MGPP).
    Current,
}

impl ProtocolGeneration {
    /// Detect the generation from the vendor device type.
    pub fn from_device_type(device_type: u32) -> Self {
        if device_type == CURRENT_GENERATION_DEVICE_TYPE {
            Self::Current
        } else {
            Self::Legacy
        }
    }

    /// Value of the envelope `protocolVersion` field.
    pub fn protocol_version(self) -> u8 {
        match self {
            Self::Legacy => 1,
            Self::Current => 2,
        }
    }

    /// Inverse of [`protocol_version`](Self::protocol_version).
    pub fn from_protocol_version(version: u8) -> Option<Self> {
        match version {
            1 => Some(Self::Legacy),
            2 => Some(Self::Current),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Current => f.write_str("current"),
        }
    }
}

/// Normalize a MAC address to lowercase hex without separators.
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Identity of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Vendor device type.
    pub device_type: u32,
    /// Normalized MAC address.
    pub mac_address: String,
    /// Opaque value echoed in every request.
    #[serde(default)]
    pub additional_value: String,
}

impl DeviceIdentity {
    /// Create an identity, normalizing the MAC address.
    pub fn new(
        device_type: u32,
        mac_address: impl AsRef<str>,
        additional_value: impl Into<String>,
    ) -> Self {
        Self {
            device_type,
            mac_address: normalize_mac(mac_address.as_ref()),
            additional_value: additional_value.into(),
        }
    }

    /// Generation spoken by this device.
    pub fn generation(&self) -> ProtocolGeneration {
        ProtocolGeneration::from_device_type(self.device_type)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_type, self.mac_address)
    }
}

/// Routing segments assigned by the backend to the controlling user.
///
/// Any segment left as `None` acts as a single-level wildcard when
/// subscribing and matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default)]
    pub home_seq: Option<String>,
    #[serde(default)]
    pub user_seq: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl SessionContext {
    pub fn new(
        home_seq: impl Into<String>,
        user_seq: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            home_seq: Some(home_seq.into()),
            user_seq: Some(user_seq.into()),
            client_id: Some(client_id.into()),
        }
    }

    /// Client id to put in the envelope, generating one when unknown.
    pub fn client_id_or_generate(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("04:78:63:AB:CD:EF"), "047863abcdef");
        assert_eq!(normalize_mac("04-78-63-ab-cd-ef"), "047863abcdef");
        assert_eq!(normalize_mac("047863abcdef"), "047863abcdef");
    }

    #[test]
    fn test_generation_from_device_type() {
        assert_eq!(ProtocolGeneration::from_device_type(52), ProtocolGeneration::Current);
        assert_eq!(ProtocolGeneration::from_device_type(1), ProtocolGeneration::Legacy);
        assert_eq!(ProtocolGeneration::Current.protocol_version(), 2);
        assert_eq!(
            ProtocolGeneration::from_protocol_version(1),
            Some(ProtocolGeneration::Legacy)
        );
        assert_eq!(ProtocolGeneration::from_protocol_version(3), None);
    }

    #[test]
    fn test_identity_display() {
        let id = DeviceIdentity::new(52, "AA:BB:CC:00:11:22", "5322");
        assert_eq!(id.to_string(), "52/aabbcc001122");
        assert_eq!(id.generation(), ProtocolGeneration::Current);
    }
}
