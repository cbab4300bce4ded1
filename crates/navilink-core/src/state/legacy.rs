//! Legacy (channel based) payload decoding.

use serde_json::Value;

use super::{DeviceState, SetpointRange, UnitStatus, half, int, round1};
use crate::encoding::{FlagField, TemperatureUnit};
use crate::error::{ProtocolError, Result};

const POWER_STATUS: FlagField = FlagField::a("powerStatus");
const ON_DEMAND_FLAG: FlagField = FlagField::a("onDemandUseFlag");
const ON_DEMAND_USE: FlagField = FlagField::a("onDemandUse");

const DEFAULT_SETPOINT_MIN_F: i64 = 100;
const DEFAULT_SETPOINT_MAX_F: i64 = 140;

/// Product family reported as `unitType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    NoDevice,
    Npe,
    Ncb,
    Nhb,
    CasNpe,
    CasNhb,
    Nfb,
    CasNfb,
    Nfc,
    Npn,
    CasNpn,
    Npe2,
    CasNpe2,
    NcbH,
    Nvw,
    CasNvw,
}

impl UnitType {
    pub fn from_wire(raw: i64) -> Option<Self> {
        Some(match raw {
            0 => Self::NoDevice,
            1 => Self::Npe,
            2 => Self::Ncb,
            3 => Self::Nhb,
            4 => Self::CasNpe,
            5 => Self::CasNhb,
            6 => Self::Nfb,
            7 => Self::CasNfb,
            8 => Self::Nfc,
            9 => Self::Npn,
            10 => Self::CasNpn,
            11 => Self::Npe2,
            12 => Self::CasNpe2,
            13 => Self::NcbH,
            14 => Self::Nvw,
            15 => Self::CasNvw,
            _ => return None,
        })
    }

    /// Families whose telemetry is scaled (temperatures, gas and flow).
    pub fn has_scaled_telemetry(self) -> bool {
        !matches!(self, Self::NoDevice | Self::Nhb | Self::CasNhb)
    }

    /// Families reporting gas usage with the larger multiplier.
    pub fn is_high_capacity(self) -> bool {
        matches!(self, Self::Nfc | Self::NcbH | Self::Nfb | Self::Nvw)
    }
}

/// Static description of one legacy channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyChannelInfo {
    pub channel_number: u8,
    pub unit: TemperatureUnit,
    pub setpoint_range: SetpointRange,
    pub unit_count: u8,
    pub hot_button_supported: bool,
}

impl LegacyChannelInfo {
    /// Decode the channel list of a channel-info response.
    pub fn from_response(response: &Value) -> Result<Vec<Self>> {
        let list = response
            .pointer("/channelInfo/channelList")
            .and_then(Value::as_array)
            .ok_or_else(|| ProtocolError::Decode("channelInfo.channelList missing".into()))?;

        list.iter()
            .map(|entry| {
                let number = int(entry, "channelNumber")
                    .ok_or_else(|| ProtocolError::Decode("channel without channelNumber".into()))?;
                let channel = entry.get("channel").unwrap_or(&Value::Null);
                Ok(Self::decode(channel_number(number)?, channel))
            })
            .collect()
    }

    fn decode(channel_number: u8, channel: &Value) -> Self {
        let unit = int(channel, "temperatureType")
            .and_then(TemperatureUnit::from_wire)
            .unwrap_or(TemperatureUnit::Fahrenheit);
        let min = int(channel, "setupDHWTempMin").unwrap_or(DEFAULT_SETPOINT_MIN_F);
        let max = int(channel, "setupDHWTempMax").unwrap_or(DEFAULT_SETPOINT_MAX_F);

        Self {
            channel_number,
            unit,
            setpoint_range: SetpointRange {
                min: unit.decode_setpoint(min),
                max: unit.decode_setpoint(max),
            },
            unit_count: int(channel, "unitCount").unwrap_or(1).clamp(1, 16) as u8,
            hot_button_supported: ON_DEMAND_USE.read(channel).is_on(),
        }
    }
}

/// Raw status block of one legacy channel.
///
/// Scaling depends on the channel's temperature unit, so conversion is
/// deferred until the snapshot is built.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyChannelStatus {
    pub channel_number: u8,
    raw: Value,
}

impl LegacyChannelStatus {
    pub fn from_response(response: &Value) -> Result<Self> {
        let status = response
            .get("channelStatus")
            .ok_or_else(|| ProtocolError::Decode("channelStatus missing".into()))?;
        let number = int(status, "channelNumber")
            .ok_or_else(|| ProtocolError::Decode("channelStatus without channelNumber".into()))?;
        let raw = status
            .get("channel")
            .filter(|c| c.is_object())
            .cloned()
            .ok_or_else(|| ProtocolError::Decode("channelStatus.channel missing".into()))?;
        Ok(Self {
            channel_number: channel_number(number)?,
            raw,
        })
    }

    /// Fill `state` from this status and the channel's static info.
    pub fn apply(&self, info: Option<&LegacyChannelInfo>, state: &mut DeviceState) {
        let raw = &self.raw;
        let unit = info.map(|i| i.unit).unwrap_or(TemperatureUnit::Fahrenheit);
        let unit_type = int(raw, "unitType").and_then(UnitType::from_wire);
        let scaled = unit_type.is_some_and(UnitType::has_scaled_telemetry);
        let high_capacity = unit_type.is_some_and(UnitType::is_high_capacity);

        state.temperature_unit = unit;
        state.power = POWER_STATUS.read(raw);
        state.features.hot_button = ON_DEMAND_FLAG.read(raw);
        state.avg_calorie = int(raw, "avgCalorie").map(|v| v as f64 / 2.0);

        let temperature = |key: &str| match (unit, scaled) {
            (TemperatureUnit::Celsius, true) => half(raw, key).map(round1),
            _ => int(raw, key).map(|v| v as f64),
        };
        state.dhw_setpoint = temperature("DHWSettingTemp");
        state.inlet_temperature = temperature("avgInletTemp");
        state.outlet_temperature = temperature("avgOutletTemp");

        if let Some(info) = info {
            state.setpoint_range = Some(info.setpoint_range);
            state.capabilities.hot_button = info.hot_button_supported;
        }

        let units = raw
            .pointer("/unitInfo/unitStatusList")
            .and_then(Value::as_array)
            .map(|list| list.as_slice())
            .unwrap_or_default();
        state.units = units
            .iter()
            .map(|u| decode_unit(u, unit, scaled, high_capacity))
            .collect();
    }
}

fn decode_unit(unit_status: &Value, unit: TemperatureUnit, scaled: bool, high_capacity: bool) -> UnitStatus {
    let raw = |key: &str| int(unit_status, key).map(|v| v as f64);

    let (gas, accumulated, flow, inlet, outlet) = match (unit, scaled) {
        (TemperatureUnit::Celsius, true) => {
            let factor = if high_capacity { 100.0 } else { 10.0 };
            (
                raw("gasInstantUsage").map(|v| round1(v * factor / 10.0)),
                raw("accumulatedGasUsage").map(|v| round1(v / 10.0)),
                raw("DHWFlowRate").map(|v| round1(v / 10.0)),
                raw("currentInletTemp").map(|v| round1(v / 2.0)),
                raw("currentOutletTemp").map(|v| round1(v / 2.0)),
            )
        }
        (TemperatureUnit::Fahrenheit, true) => {
            let factor = if high_capacity { 10.0 } else { 1.0 };
            (
                raw("gasInstantUsage").map(|v| round1(v * factor * 3.968)),
                raw("accumulatedGasUsage").map(|v| round1(v * 35.314667 / 10.0)),
                raw("DHWFlowRate").map(|v| round1(v / 37.85)),
                raw("currentInletTemp"),
                raw("currentOutletTemp"),
            )
        }
        _ => (
            raw("gasInstantUsage"),
            raw("accumulatedGasUsage"),
            raw("DHWFlowRate"),
            raw("currentInletTemp"),
            raw("currentOutletTemp"),
        ),
    };

    UnitStatus {
        unit_number: int(unit_status, "unitNumber").unwrap_or_default(),
        gas_instant_usage: gas,
        accumulated_gas_usage: accumulated,
        flow_rate: flow,
        inlet_temperature: inlet,
        outlet_temperature: outlet,
    }
}

fn channel_number(raw: i64) -> Result<u8> {
    u8::try_from(raw).map_err(|_| ProtocolError::Decode(format!("invalid channel number {raw}")))
}
