//! Message envelope and request bodies.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::encoding::FlagField;
use crate::error::{ProtocolError, Result};
use crate::identity::{DeviceIdentity, ProtocolGeneration};
use crate::registry::{CommandDescriptor, RequestShape};
use crate::state::ReservationEntry;

/// Wire envelope shared by requests, responses and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub protocol_version: u8,
    #[serde(rename = "clientID", default)]
    pub client_id: String,
    #[serde(
        rename = "sessionID",
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
}

// An empty id means the peer did not correlate the message.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Borrowed view of the envelope body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeBody<'a> {
    Request(&'a Value),
    Response(&'a Value),
    Event(&'a Value),
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        generation: ProtocolGeneration,
        client_id: impl Into<String>,
        session_id: impl Into<String>,
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            protocol_version: generation.protocol_version(),
            client_id: client_id.into(),
            session_id: Some(session_id.into()),
            request_topic: Some(request_topic.into()),
            response_topic: Some(response_topic.into()),
            request: Some(body),
            response: None,
            event: None,
        }
    }

    /// Last-will announcement: the app went offline.
    ///
    /// Both generations announce with protocol version 1.
    pub fn last_will(
        identity: &DeviceIdentity,
        client_id: impl Into<String>,
        session_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version: ProtocolGeneration::Legacy.protocol_version(),
            client_id: client_id.into(),
            session_id: Some(session_id.into()),
            request_topic: Some(topic.into()),
            response_topic: None,
            request: None,
            response: None,
            event: Some(json!({
                "additionalValue": identity.additional_value,
                "connection": {"os": "A", "status": 0},
                "deviceType": identity.device_type,
                "macAddress": identity.mac_address,
            })),
        }
    }

    /// Parse an inbound payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::Decode(format!("invalid envelope: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn generation(&self) -> Option<ProtocolGeneration> {
        ProtocolGeneration::from_protocol_version(self.protocol_version)
    }

    pub fn body(&self) -> Option<EnvelopeBody<'_>> {
        if let Some(v) = &self.response {
            Some(EnvelopeBody::Response(v))
        } else if let Some(v) = &self.event {
            Some(EnvelopeBody::Event(v))
        } else {
            self.request.as_ref().map(EnvelopeBody::Request)
        }
    }

    /// Fail unless the envelope was produced by `generation`.
    pub fn expect_generation(&self, generation: ProtocolGeneration) -> Result<()> {
        if self.generation() == Some(generation) {
            Ok(())
        } else {
            Err(ProtocolError::Decode(format!(
                "protocol version {} does not match the {generation} generation",
                self.protocol_version
            )))
        }
    }
}

/// Monotonic millisecond session ids.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    last: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch milliseconds, bumped so ids never repeat.
    pub fn next_id(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1).to_string()
    }
}

/// Reservation program carried by a reservation write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationProgram {
    pub enabled: bool,
    pub entries: Vec<ReservationEntry>,
}

pub(crate) const RESERVATION_USE: FlagField = FlagField::b("reservationUse");

/// Parameters filled into a request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    /// Legacy channel number (defaults to 1).
    pub channel: Option<u8>,
    /// Legacy unit count for status queries (defaults to 1).
    pub unit_count: Option<u8>,
    pub param: Vec<i64>,
    pub param_str: String,
    pub reservation: Option<ReservationProgram>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_unit_count(mut self, count: u8) -> Self {
        self.unit_count = Some(count);
        self
    }

    pub fn with_param(mut self, param: impl Into<Vec<i64>>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_reservation(mut self, program: ReservationProgram) -> Self {
        self.reservation = Some(program);
        self
    }
}

/// Build the request body for a descriptor.
pub fn build_request_body(
    identity: &DeviceIdentity,
    descriptor: &CommandDescriptor,
    params: &RequestParams,
) -> Result<Value> {
    let mut body = Map::new();
    body.insert("additionalValue".into(), json!(identity.additional_value));
    body.insert("command".into(), json!(descriptor.command_id));
    body.insert("deviceType".into(), json!(identity.device_type));
    body.insert("macAddress".into(), json!(identity.mac_address));

    let channel = params.channel.unwrap_or(1);
    let mode = || {
        descriptor.mode.ok_or_else(|| {
            ProtocolError::InvalidParameter(format!("{:?} has no mode", descriptor.operation))
        })
    };

    match descriptor.request {
        RequestShape::Query => {}
        RequestShape::ChannelQuery => {
            body.insert(
                "status".into(),
                json!({
                    "channelNumber": channel,
                    "unitNumberStart": 1,
                    "unitNumberEnd": params.unit_count.unwrap_or(1),
                }),
            );
        }
        RequestShape::ChannelControl => {
            body.insert(
                "control".into(),
                json!({
                    "channelNumber": channel,
                    "mode": mode()?,
                    "param": params.param,
                }),
            );
        }
        RequestShape::Control => {
            body.insert("mode".into(), json!(mode()?));
            body.insert("param".into(), json!(params.param));
            body.insert("paramStr".into(), json!(params.param_str));
        }
        RequestShape::Reservation => {
            let program = params.reservation.as_ref().ok_or_else(|| {
                ProtocolError::InvalidParameter("reservation program missing".into())
            })?;
            body.insert("mode".into(), json!(mode()?));
            body.insert(
                RESERVATION_USE.key.into(),
                json!(RESERVATION_USE.encode(program.enabled)),
            );
            body.insert(
                "reservation".into(),
                Value::Array(program.entries.iter().map(ReservationEntry::to_wire).collect()),
            );
        }
    }

    Ok(Value::Object(body))
}
