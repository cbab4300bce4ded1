//! Codec registry.
//!
//! One table per protocol generation maps each logical [`Operation`] to
//! its command id, mode discriminator, payload shapes and topic
//! templates. Command ids are not unique across operations, so entries
//! are keyed by `(generation, command id, request topic)`.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, RegistryError};
use crate::identity::ProtocolGeneration;
use crate::topic::{RouteTarget, TopicTemplate, validate_templates};

/// Logical operations across both generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    // legacy
    ChannelInfo,
    ChannelStatus,
    Power,
    HotButton,
    Temperature,
    // current
    DeviceInfo,
    Status,
    ReservationRead,
    ReservationWrite,
    PowerOn,
    PowerOff,
    DhwMode,
    RecircHotButton,
    FreezeProtection,
    DhwTemperature,
    AntiLegionellaOff,
    AntiLegionellaOn,
}

/// Timeout class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Query,
    Control,
    Handshake,
}

/// Shape of the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// Identity fields only.
    Query,
    /// Legacy `status` block with channel and unit range.
    ChannelQuery,
    /// Legacy `control` block with channel, mode and param.
    ChannelControl,
    /// Current generation flat `mode`/`param`/`paramStr`.
    Control,
    /// Current generation reservation list.
    Reservation,
}

/// Shape of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    ChannelInfo,
    ChannelStatus,
    DeviceFeature,
    DeviceStatus,
    Reservation,
}

/// Unsolicited topic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    ControlFail,
    Connection,
    Disconnect,
}

/// Static definition of a table entry.
#[derive(Debug, Clone, Copy)]
pub struct CommandEntry {
    pub operation: Operation,
    pub command_id: u32,
    pub mode: Option<&'static str>,
    pub class: OperationClass,
    pub request: RequestShape,
    pub response: ResponseShape,
    pub request_suffix: &'static str,
    pub response_override: Option<&'static str>,
}

/// Topic layout of a generation.
#[derive(Debug, Clone, Copy)]
pub struct TopicGrammar {
    pub request_prefix: &'static str,
    pub response_prefix: &'static str,
    /// Derive a response suffix from a request suffix.
    pub derive_response: fn(&str) -> Option<String>,
}

fn derive_legacy(suffix: &str) -> Option<String> {
    suffix.strip_prefix("status/").map(|rest| format!("res/{rest}"))
}

fn derive_current(suffix: &str) -> Option<String> {
    match suffix {
        "st" | "ctrl" => Some("res".to_string()),
        _ => suffix
            .strip_prefix("st/")
            .or_else(|| suffix.strip_prefix("ctrl/"))
            .map(|rest| format!("res/{rest}")),
    }
}

const REQUEST_PREFIX: &str = "cmd/{deviceType}/navilink-{macAddress}/";
const RESPONSE_PREFIX: &str = "cmd/{deviceType}/{homeSeq}/{userSeq}/{clientId}/";
const DISCONNECT_TOPIC: &str = "evt/+/mobile/event/disconnect-mqtt";

pub const LEGACY_GRAMMAR: TopicGrammar = TopicGrammar {
    request_prefix: REQUEST_PREFIX,
    response_prefix: RESPONSE_PREFIX,
    derive_response: derive_legacy,
};

pub const CURRENT_GRAMMAR: TopicGrammar = TopicGrammar {
    request_prefix: REQUEST_PREFIX,
    response_prefix: RESPONSE_PREFIX,
    derive_response: derive_current,
};

const fn entry(
    operation: Operation,
    command_id: u32,
    mode: Option<&'static str>,
    class: OperationClass,
    request: RequestShape,
    response: ResponseShape,
    request_suffix: &'static str,
    response_override: Option<&'static str>,
) -> CommandEntry {
    CommandEntry {
        operation,
        command_id,
        mode,
        class,
        request,
        response,
        request_suffix,
        response_override,
    }
}

use OperationClass::{Control, Handshake, Query};

pub const LEGACY_ENTRIES: &[CommandEntry] = &[
    entry(
        Operation::ChannelInfo,
        16777217,
        None,
        Handshake,
        RequestShape::Query,
        ResponseShape::ChannelInfo,
        "status/start",
        Some("res/channelinfo"),
    ),
    entry(
        Operation::ChannelStatus,
        16777220,
        None,
        Query,
        RequestShape::ChannelQuery,
        ResponseShape::ChannelStatus,
        "status/channelstatus",
        None,
    ),
    entry(
        Operation::Power,
        33554433,
        Some("power"),
        Control,
        RequestShape::ChannelControl,
        ResponseShape::ChannelStatus,
        "control",
        Some("res/channelstatus"),
    ),
    entry(
        Operation::HotButton,
        33554437,
        Some("onDemand"),
        Control,
        RequestShape::ChannelControl,
        ResponseShape::ChannelStatus,
        "control",
        Some("res/channelstatus"),
    ),
    entry(
        Operation::Temperature,
        33554435,
        Some("DHWTemperature"),
        Control,
        RequestShape::ChannelControl,
        ResponseShape::ChannelStatus,
        "control",
        Some("res/channelstatus"),
    ),
];

pub const CURRENT_ENTRIES: &[CommandEntry] = &[
    entry(
        Operation::DeviceInfo,
        16777217,
        None,
        Handshake,
        RequestShape::Query,
        ResponseShape::DeviceFeature,
        "st/did",
        None,
    ),
    entry(
        Operation::Status,
        16777219,
        None,
        Query,
        RequestShape::Query,
        ResponseShape::DeviceStatus,
        "st",
        None,
    ),
    entry(
        Operation::ReservationRead,
        16777222,
        None,
        Query,
        RequestShape::Query,
        ResponseShape::Reservation,
        "st/rsv/rd",
        None,
    ),
    entry(
        Operation::ReservationWrite,
        16777222,
        Some("rsv"),
        Control,
        RequestShape::Reservation,
        ResponseShape::Reservation,
        "ctrl/rsv/rd",
        None,
    ),
    entry(
        Operation::PowerOff,
        33554433,
        Some("power-off"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::PowerOn,
        33554434,
        Some("power-on"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::DhwMode,
        33554437,
        Some("dhw-mode"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::RecircHotButton,
        33554444,
        Some("recirc-hotbtn"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::FreezeProtection,
        33554451,
        Some("freeze-protection"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::DhwTemperature,
        33554464,
        Some("dhw-temperature"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::AntiLegionellaOff,
        33554471,
        Some("anti-leg-off"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
    entry(
        Operation::AntiLegionellaOn,
        33554472,
        Some("anti-leg-on"),
        Control,
        RequestShape::Control,
        ResponseShape::DeviceStatus,
        "ctrl",
        None,
    ),
];

pub const LEGACY_EVENTS: &[(EventTopic, &str)] = &[
    (
        EventTopic::ControlFail,
        "cmd/{deviceType}/navilink-{macAddress}/res/controlfail",
    ),
    (
        EventTopic::Connection,
        "cmd/{deviceType}/navilink-{macAddress}/connection",
    ),
    (
        EventTopic::Connection,
        "evt/{deviceType}/navilink-{macAddress}/connection",
    ),
    (
        EventTopic::Connection,
        "evt/1/navilink-{macAddress}/app-connection",
    ),
    (EventTopic::Disconnect, DISCONNECT_TOPIC),
];

pub const CURRENT_EVENTS: &[(EventTopic, &str)] = &[
    (
        EventTopic::ControlFail,
        "cmd/{deviceType}/navilink-{macAddress}/ctrl-fail",
    ),
    (
        EventTopic::Connection,
        "evt/{deviceType}/navilink-{macAddress}/connection",
    ),
    (
        EventTopic::Connection,
        "evt/{deviceType}/navilink-{macAddress}/app-connection",
    ),
    (EventTopic::Disconnect, DISCONNECT_TOPIC),
];

/// Legacy last will goes out on device type 1 regardless of the device.
pub const LEGACY_LAST_WILL: &str = "evt/1/navilink-{macAddress}/app-connection";
pub const CURRENT_LAST_WILL: &str = "evt/{deviceType}/navilink-{macAddress}/app-connection";

/// Resolved registry entry.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub generation: ProtocolGeneration,
    pub operation: Operation,
    pub command_id: u32,
    pub mode: Option<&'static str>,
    pub class: OperationClass,
    pub request: RequestShape,
    pub response: ResponseShape,
    pub request_suffix: &'static str,
    response_override: Option<&'static str>,
    request_template: TopicTemplate,
    response_template: TopicTemplate,
}

impl CommandDescriptor {
    fn compile(
        generation: ProtocolGeneration,
        grammar: &TopicGrammar,
        entry: &CommandEntry,
    ) -> Result<Self, RegistryError> {
        let response_suffix = match entry.response_override {
            Some(s) => s.to_string(),
            None => (grammar.derive_response)(entry.request_suffix)
                .ok_or(RegistryError::MissingResponse(entry.operation))?,
        };
        let request_template =
            TopicTemplate::parse(&format!("{}{}", grammar.request_prefix, entry.request_suffix))?;
        let response_template =
            TopicTemplate::parse(&format!("{}{}", grammar.response_prefix, response_suffix))?;

        Ok(Self {
            generation,
            operation: entry.operation,
            command_id: entry.command_id,
            mode: entry.mode,
            class: entry.class,
            request: entry.request,
            response: entry.response,
            request_suffix: entry.request_suffix,
            response_override: entry.response_override,
            request_template,
            response_template,
        })
    }

    pub fn request_template(&self) -> &TopicTemplate {
        &self.request_template
    }

    pub fn response_template(&self) -> &TopicTemplate {
        &self.response_template
    }

    /// Whether the response topic is an explicit override rather than
    /// derived from the request topic.
    pub fn has_response_override(&self) -> bool {
        self.response_override.is_some()
    }
}

/// Validated table for one generation.
#[derive(Debug, Clone)]
pub struct GenerationTable {
    generation: ProtocolGeneration,
    descriptors: Vec<CommandDescriptor>,
    events: Vec<(EventTopic, TopicTemplate)>,
    last_will: TopicTemplate,
}

impl GenerationTable {
    /// Compile and validate a table.
    pub fn from_entries(
        generation: ProtocolGeneration,
        grammar: &TopicGrammar,
        entries: &[CommandEntry],
        events: &[(EventTopic, &str)],
        last_will: &str,
    ) -> Result<Self, RegistryError> {
        let mut descriptors: Vec<CommandDescriptor> = Vec::with_capacity(entries.len());
        for entry in entries {
            if descriptors.iter().any(|d| d.operation == entry.operation) {
                return Err(RegistryError::DuplicateOperation(entry.operation));
            }
            if descriptors.iter().any(|d| {
                d.command_id == entry.command_id && d.request_suffix == entry.request_suffix
            }) {
                return Err(RegistryError::DuplicateCommand {
                    command_id: entry.command_id,
                    request_suffix: entry.request_suffix.to_string(),
                });
            }
            descriptors.push(CommandDescriptor::compile(generation, grammar, entry)?);
        }

        let events = events
            .iter()
            .map(|(kind, t)| TopicTemplate::parse(t).map(|t| (*kind, t)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut routes: Vec<(TopicTemplate, RouteTarget)> = Vec::new();
        for d in &descriptors {
            let shared = routes.iter_mut().find(|(t, _)| t == d.response_template());
            if let Some((_, RouteTarget::Response(ops))) = shared {
                ops.push(d.operation);
            } else {
                routes.push((
                    d.response_template().clone(),
                    RouteTarget::Response(vec![d.operation]),
                ));
            }
        }
        for (kind, t) in &events {
            if !routes.iter().any(|(rt, target)| rt == t && *target == RouteTarget::Event(*kind)) {
                routes.push((t.clone(), RouteTarget::Event(*kind)));
            }
        }
        validate_templates(&routes)?;

        Ok(Self {
            generation,
            descriptors,
            events,
            last_will: TopicTemplate::parse(last_will)?,
        })
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.descriptors.iter()
    }

    pub fn event_templates(&self) -> impl Iterator<Item = &(EventTopic, TopicTemplate)> {
        self.events.iter()
    }

    pub fn last_will_template(&self) -> &TopicTemplate {
        &self.last_will
    }

    pub fn get(&self, operation: Operation) -> Option<&CommandDescriptor> {
        self.descriptors.iter().find(|d| d.operation == operation)
    }
}

/// Both generation tables.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    legacy: GenerationTable,
    current: GenerationTable,
}

static STANDARD: OnceCell<CodecRegistry> = OnceCell::new();

impl CodecRegistry {
    /// Compile the built-in tables.
    pub fn load() -> Result<Self, RegistryError> {
        Ok(Self {
            legacy: GenerationTable::from_entries(
                ProtocolGeneration::Legacy,
                &LEGACY_GRAMMAR,
                LEGACY_ENTRIES,
                LEGACY_EVENTS,
                LEGACY_LAST_WILL,
            )?,
            current: GenerationTable::from_entries(
                ProtocolGeneration::Current,
                &CURRENT_GRAMMAR,
                CURRENT_ENTRIES,
                CURRENT_EVENTS,
                CURRENT_LAST_WILL,
            )?,
        })
    }

    /// Process-wide copy of the built-in tables, compiled on first use.
    pub fn standard() -> Result<&'static Self, RegistryError> {
        STANDARD.get_or_try_init(Self::load)
    }

    pub fn table(&self, generation: ProtocolGeneration) -> &GenerationTable {
        match generation {
            ProtocolGeneration::Legacy => &self.legacy,
            ProtocolGeneration::Current => &self.current,
        }
    }

    /// Descriptor for an operation in a generation.
    pub fn resolve(
        &self,
        generation: ProtocolGeneration,
        operation: Operation,
    ) -> Result<&CommandDescriptor, ProtocolError> {
        self.table(generation)
            .get(operation)
            .ok_or(ProtocolError::UnknownOperation {
                generation,
                operation,
            })
    }

    /// Exact lookup by command id and request topic suffix.
    pub fn lookup(
        &self,
        generation: ProtocolGeneration,
        command_id: u32,
        request_suffix: &str,
    ) -> Option<&CommandDescriptor> {
        self.table(generation)
            .descriptors()
            .find(|d| d.command_id == command_id && d.request_suffix == request_suffix)
    }

    /// All descriptors sharing a command id.
    pub fn by_command_id(
        &self,
        generation: ProtocolGeneration,
        command_id: u32,
    ) -> Vec<&CommandDescriptor> {
        self.table(generation)
            .descriptors()
            .filter(|d| d.command_id == command_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tables_load() {
        let registry = CodecRegistry::standard().unwrap();
        assert_eq!(registry.table(ProtocolGeneration::Legacy).descriptors().count(), 5);
        assert_eq!(registry.table(ProtocolGeneration::Current).descriptors().count(), 12);
    }

    #[test]
    fn test_resolve_unknown_operation() {
        let registry = CodecRegistry::standard().unwrap();
        let err = registry
            .resolve(ProtocolGeneration::Legacy, Operation::DhwMode)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownOperation { .. }));
        assert!(registry
            .resolve(ProtocolGeneration::Current, Operation::ChannelInfo)
            .is_err());
    }

    #[test]
    fn test_response_derivation() {
        let registry = CodecRegistry::standard().unwrap();
        let did = registry
            .resolve(ProtocolGeneration::Current, Operation::DeviceInfo)
            .unwrap();
        assert_eq!(
            did.response_template().as_str(),
            "cmd/{deviceType}/{homeSeq}/{userSeq}/{clientId}/res/did"
        );
        assert!(!did.has_response_override());

        let ctrl = registry
            .resolve(ProtocolGeneration::Current, Operation::PowerOn)
            .unwrap();
        assert_eq!(
            ctrl.response_template().as_str(),
            "cmd/{deviceType}/{homeSeq}/{userSeq}/{clientId}/res"
        );
    }

    #[test]
    fn test_handshake_response_override() {
        let registry = CodecRegistry::standard().unwrap();
        let info = registry
            .resolve(ProtocolGeneration::Legacy, Operation::ChannelInfo)
            .unwrap();
        assert!(info.has_response_override());
        assert!(info.request_template().as_str().ends_with("/status/start"));
        assert!(info.response_template().as_str().ends_with("/res/channelinfo"));
        assert_eq!(info.class, OperationClass::Handshake);
    }

    #[test]
    fn test_shared_command_id_disambiguated_by_topic() {
        let registry = CodecRegistry::standard().unwrap();
        let shared = registry.by_command_id(ProtocolGeneration::Current, 16777222);
        assert_eq!(shared.len(), 2);

        let read = registry
            .lookup(ProtocolGeneration::Current, 16777222, "st/rsv/rd")
            .unwrap();
        let write = registry
            .lookup(ProtocolGeneration::Current, 16777222, "ctrl/rsv/rd")
            .unwrap();
        assert_eq!(read.operation, Operation::ReservationRead);
        assert_eq!(write.operation, Operation::ReservationWrite);
        assert!(registry
            .lookup(ProtocolGeneration::Current, 16777222, "ctrl")
            .is_none());
    }

    #[test]
    fn test_command_id_reused_across_generations() {
        let registry = CodecRegistry::standard().unwrap();
        let legacy = registry
            .lookup(ProtocolGeneration::Legacy, 33554437, "control")
            .unwrap();
        let current = registry
            .lookup(ProtocolGeneration::Current, 33554437, "ctrl")
            .unwrap();
        assert_eq!(legacy.operation, Operation::HotButton);
        assert_eq!(current.operation, Operation::DhwMode);
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let entries = [
            CURRENT_ENTRIES[0],
            CommandEntry {
                operation: Operation::Status,
                ..CURRENT_ENTRIES[0]
            },
        ];
        let err = GenerationTable::from_entries(
            ProtocolGeneration::Current,
            &CURRENT_GRAMMAR,
            &entries,
            &[],
            CURRENT_LAST_WILL,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCommand { .. }));
    }

    #[test]
    fn test_ambiguous_event_templates_rejected() {
        let err = GenerationTable::from_entries(
            ProtocolGeneration::Current,
            &CURRENT_GRAMMAR,
            CURRENT_ENTRIES,
            &[
                (EventTopic::Connection, "evt/{deviceType}/{macAddress}/connection"),
                (EventTopic::ControlFail, "evt/{deviceType}/{clientId}/connection"),
            ],
            CURRENT_LAST_WILL,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousTemplates { .. }));
    }

    #[test]
    fn test_missing_response_rejected() {
        let entries = [CommandEntry {
            request_suffix: "control",
            response_override: None,
            ..LEGACY_ENTRIES[2]
        }];
        let err = GenerationTable::from_entries(
            ProtocolGeneration::Legacy,
            &LEGACY_GRAMMAR,
            &entries,
            &[],
            LEGACY_LAST_WILL,
        )
        .unwrap_err();
        assert_eq!(err, RegistryError::MissingResponse(Operation::Power));
    }
}
