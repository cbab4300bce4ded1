//! Canonical device state.
//!
//! Wire payloads of both generations decode into the same
//! [`DeviceState`] snapshot. Snapshots are immutable; every successful
//! decode produces a new one.

mod current;
mod legacy;
mod translator;

pub use current::{CurrentStatus, DeviceFeature};
pub use legacy::{LegacyChannelInfo, LegacyChannelStatus, UnitType};
pub use translator::StateTranslator;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::encoding::{
    BinaryState, FlagField, TemperatureUnit, WeekdaySet, as_i64, decode_half_degree,
    decode_tenth_degree, encode_half_degree,
};
use crate::error::{ProtocolError, Result};
use crate::identity::ProtocolGeneration;

/// Days a vacation lasts when the caller does not say.
pub const DEFAULT_VACATION_DAYS: u32 = 7;
pub const MIN_VACATION_DAYS: u32 = 1;
pub const MAX_VACATION_DAYS: u32 = 99;

/// Offset subtracted from the nominal vacation end.
pub const VACATION_END_OFFSET_HOURS: i64 = 9;

/// End of a vacation started at `started_at` lasting `days` days.
///
/// The device resumes nine hours before the nominal end so the tank is
/// hot on return.
pub fn vacation_end(started_at: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    started_at + Duration::days(i64::from(days)) - Duration::hours(VACATION_END_OFFSET_HOURS)
}

/// DHW operation mode of a current-generation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Standby,
    HeatPump,
    Electric,
    EnergySaver,
    HighDemand,
    Vacation,
    PowerOff,
    Other(u8),
}

impl OperationMode {
    pub fn from_wire(raw: i64) -> Self {
        match raw {
            0 => Self::Standby,
            1 => Self::HeatPump,
            2 => Self::Electric,
            3 => Self::EnergySaver,
            4 => Self::HighDemand,
            5 => Self::Vacation,
            6 => Self::PowerOff,
            other => Self::Other(other.clamp(0, u8::MAX as i64) as u8),
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            Self::Standby => 0,
            Self::HeatPump => 1,
            Self::Electric => 2,
            Self::EnergySaver => 3,
            Self::HighDemand => 4,
            Self::Vacation => 5,
            Self::PowerOff => 6,
            Self::Other(v) => i64::from(v),
        }
    }

    /// Modes whose reservation `param` is a set-point.
    pub fn is_temperature_bearing(self) -> bool {
        matches!(
            self,
            Self::HeatPump | Self::Electric | Self::EnergySaver | Self::HighDemand
        )
    }

    /// Parse a user-facing name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "standby" => Some(Self::Standby),
            "heat_pump" | "heatpump" => Some(Self::HeatPump),
            "electric" => Some(Self::Electric),
            "energy_saver" | "eco" | "hybrid" => Some(Self::EnergySaver),
            "high_demand" => Some(Self::HighDemand),
            "vacation" => Some(Self::Vacation),
            "power_off" | "off" => Some(Self::PowerOff),
            _ => None,
        }
    }
}

/// Parameter of a reservation entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationParam {
    /// Set-point in Celsius.
    Temperature(f64),
    Raw(i64),
}

const RESERVATION_ENABLE: FlagField = FlagField::b("enable");

/// One entry of the weekly reservation program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationEntry {
    pub enabled: bool,
    pub weekdays: WeekdaySet,
    pub hour: u8,
    pub minute: u8,
    pub mode: OperationMode,
    pub param: ReservationParam,
}

impl ReservationEntry {
    /// Decode one wire entry.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(as_i64)
                .ok_or_else(|| ProtocolError::Decode(format!("reservation entry missing '{key}'")))
        };

        let hour = field("hour")?;
        let minute = field("min")?;
        if !(0..24).contains(&hour) || !(0..60).contains(&minute) {
            return Err(ProtocolError::Decode(format!(
                "reservation time {hour}:{minute} out of range"
            )));
        }
        let mode = OperationMode::from_wire(field("mode")?);
        let raw_param = value.get("param").and_then(as_i64).unwrap_or(0);
        let param = if mode.is_temperature_bearing() {
            ReservationParam::Temperature(decode_half_degree(raw_param))
        } else {
            ReservationParam::Raw(raw_param)
        };

        Ok(Self {
            enabled: RESERVATION_ENABLE.read(value).is_on(),
            weekdays: WeekdaySet::from_mask(field("week")?.clamp(0, 255) as u8),
            hour: hour as u8,
            minute: minute as u8,
            mode,
            param,
        })
    }

    pub fn to_wire(&self) -> Value {
        let param = match self.param {
            ReservationParam::Temperature(c) => encode_half_degree(c),
            ReservationParam::Raw(raw) => raw,
        };
        json!({
            "enable": RESERVATION_ENABLE.encode(self.enabled),
            "week": self.weekdays.mask(),
            "hour": self.hour,
            "min": self.minute,
            "mode": self.mode.to_wire(),
            "param": param,
        })
    }
}

/// Weekly reservation program as reported by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationSchedule {
    pub enabled: BinaryState,
    pub entries: Vec<ReservationEntry>,
}

impl ReservationSchedule {
    /// Decode a reservation response body.
    pub fn from_response(response: &Value) -> Result<Self> {
        let entries = response
            .get("reservation")
            .and_then(Value::as_array)
            .ok_or_else(|| ProtocolError::Decode("reservation list missing".into()))?
            .iter()
            .map(ReservationEntry::from_wire)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            enabled: crate::envelope::RESERVATION_USE.read(response),
            entries,
        })
    }
}

/// Allowed set-point range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointRange {
    pub min: f64,
    pub max: f64,
}

impl SetpointRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Tenth-degree sensor telemetry (current generation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    pub tank_upper: Option<f64>,
    pub tank_lower: Option<f64>,
    pub ambient: Option<f64>,
    pub discharge: Option<f64>,
    pub suction: Option<f64>,
    pub evaporator: Option<f64>,
    pub current_superheat: Option<f64>,
    pub target_superheat: Option<f64>,
    pub recirc_faucet: Option<f64>,
}

/// Heat-pump component activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentFlags {
    pub upper_heater: BinaryState,
    pub lower_heater: BinaryState,
    pub compressor: BinaryState,
    pub evaporator_fan: BinaryState,
    pub expansion_valve: BinaryState,
    pub busy: BinaryState,
}

/// User-switchable features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub anti_legionella: BinaryState,
    pub freeze_protection: BinaryState,
    /// Legacy on-demand (hot button) or current recirculation.
    pub hot_button: BinaryState,
}

/// What the device supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub hot_button: bool,
    pub recirculation: bool,
}

/// Fault block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultStatus {
    pub has_error: bool,
    pub error_code: Option<i64>,
    pub sub_error_code: Option<i64>,
    pub fault_status1: Option<i64>,
    pub fault_status2: Option<i64>,
}

/// Telemetry of one unit of a legacy cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit_number: i64,
    pub gas_instant_usage: Option<f64>,
    pub accumulated_gas_usage: Option<f64>,
    pub flow_rate: Option<f64>,
    pub inlet_temperature: Option<f64>,
    pub outlet_temperature: Option<f64>,
}

/// Active vacation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VacationSchedule {
    pub days: u32,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl VacationSchedule {
    pub fn new(started_at: DateTime<Utc>, days: u32) -> Self {
        Self {
            days,
            started_at,
            ends_at: vacation_end(started_at, days),
        }
    }
}

/// Canonical snapshot of one channel of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub generation: ProtocolGeneration,
    pub channel: u8,
    pub updated_at: DateTime<Utc>,
    pub temperature_unit: TemperatureUnit,
    pub power: BinaryState,
    pub operation_mode: Option<OperationMode>,
    pub dhw_temperature: Option<f64>,
    pub dhw_setpoint: Option<f64>,
    pub setpoint_range: Option<SetpointRange>,
    pub inlet_temperature: Option<f64>,
    pub outlet_temperature: Option<f64>,
    pub sensors: SensorReadings,
    pub components: ComponentFlags,
    pub features: FeatureFlags,
    pub capabilities: Capabilities,
    pub fault: FaultStatus,
    pub dhw_charge_percent: Option<i64>,
    pub wifi_rssi: Option<i64>,
    pub current_power: Option<i64>,
    pub avg_calorie: Option<f64>,
    pub vacation: Option<VacationSchedule>,
    pub reservations: Option<ReservationSchedule>,
    pub units: Vec<UnitStatus>,
}

impl DeviceState {
    /// Empty snapshot.
    pub fn empty(generation: ProtocolGeneration, channel: u8, now: DateTime<Utc>) -> Self {
        Self {
            generation,
            channel,
            updated_at: now,
            temperature_unit: match generation {
                ProtocolGeneration::Current => TemperatureUnit::Celsius,
                ProtocolGeneration::Legacy => TemperatureUnit::Fahrenheit,
            },
            power: BinaryState::Unknown,
            operation_mode: None,
            dhw_temperature: None,
            dhw_setpoint: None,
            setpoint_range: None,
            inlet_temperature: None,
            outlet_temperature: None,
            sensors: SensorReadings::default(),
            components: ComponentFlags::default(),
            features: FeatureFlags::default(),
            capabilities: Capabilities::default(),
            fault: FaultStatus::default(),
            dhw_charge_percent: None,
            wifi_rssi: None,
            current_power: None,
            avg_calorie: None,
            vacation: None,
            reservations: None,
            units: Vec::new(),
        }
    }
}

pub(crate) fn int(object: &Value, key: &str) -> Option<i64> {
    object.get(key).and_then(as_i64)
}

pub(crate) fn half(object: &Value, key: &str) -> Option<f64> {
    int(object, key).map(decode_half_degree)
}

pub(crate) fn tenth(object: &Value, key: &str) -> Option<f64> {
    int(object, key).map(decode_tenth_degree)
}

/// Round to one decimal.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
