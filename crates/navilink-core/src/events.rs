//! Unsolicited event classification.
//!
//! Control failures, connection heartbeats and broker disconnect
//! broadcasts arrive without a matching request. The topic decides the
//! kind; the payload only fills in the details. A payload that does not
//! carry what its kind needs is reported as [`UnrecognizedEvent`].

use serde::Serialize;
use serde_json::Value;

use crate::encoding::as_i64;
use crate::envelope::{Envelope, EnvelopeBody};
use crate::identity::DeviceIdentity;
use crate::registry::EventTopic;

/// Fail code reported when controls are sent faster than the device
/// accepts them.
pub const FAIL_CODE_RATE_LIMITED: i64 = 2;

/// The device rejected a control command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFailEvent {
    pub device: DeviceIdentity,
    pub fail_code: i64,
    pub session_id: Option<String>,
}

impl ControlFailEvent {
    pub fn is_rate_limited(&self) -> bool {
        self.fail_code == FAIL_CODE_RATE_LIMITED
    }
}

/// Connection heartbeat of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub device: DeviceIdentity,
    pub status: i64,
    pub session_number: Option<i64>,
    pub online: bool,
}

/// The broker dropped the mobile client sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportDisconnectEvent {
    pub topic: String,
}

/// Inbound message no rule understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnrecognizedEvent {
    pub topic: String,
    pub payload: String,
}

impl UnrecognizedEvent {
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        Self {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// Classified unsolicited message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceEvent {
    ControlFail(ControlFailEvent),
    Connection(ConnectionEvent),
    TransportDisconnect(TransportDisconnectEvent),
    Unrecognized(UnrecognizedEvent),
}

/// Classify a message that arrived on an event topic.
pub fn classify(kind: EventTopic, device: &DeviceIdentity, topic: &str, payload: &[u8]) -> DeviceEvent {
    if kind == EventTopic::Disconnect {
        return DeviceEvent::TransportDisconnect(TransportDisconnectEvent {
            topic: topic.to_string(),
        });
    }

    let Ok(envelope) = Envelope::parse(payload) else {
        return DeviceEvent::Unrecognized(UnrecognizedEvent::new(topic, payload));
    };

    let classified = match kind {
        EventTopic::ControlFail => control_fail(device, &envelope),
        EventTopic::Connection => connection(device, &envelope),
        EventTopic::Disconnect => None,
    };

    classified.unwrap_or_else(|| DeviceEvent::Unrecognized(UnrecognizedEvent::new(topic, payload)))
}

fn body(envelope: &Envelope) -> Option<&Value> {
    match envelope.body()? {
        EnvelopeBody::Response(v) | EnvelopeBody::Event(v) | EnvelopeBody::Request(v) => Some(v),
    }
}

fn control_fail(device: &DeviceIdentity, envelope: &Envelope) -> Option<DeviceEvent> {
    let fail_code = body(envelope)?.get("failCode").and_then(as_i64)?;
    Some(DeviceEvent::ControlFail(ControlFailEvent {
        device: device.clone(),
        fail_code,
        session_id: envelope.session_id.clone(),
    }))
}

fn connection(device: &DeviceIdentity, envelope: &Envelope) -> Option<DeviceEvent> {
    let body = body(envelope)?;
    let connection = body.get("connection")?;
    let status = connection.get("status").and_then(as_i64)?;
    let session_number = connection
        .get("sessionNumber")
        .or_else(|| body.get("sessionNumber"))
        .and_then(as_i64);

    Some(DeviceEvent::Connection(ConnectionEvent {
        device: device.clone(),
        status,
        session_number,
        online: status > 0,
    }))
}
