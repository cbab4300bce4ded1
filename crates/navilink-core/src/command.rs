//! Logical commands.
//!
//! A [`Command`] says what the caller wants independent of generation.
//! [`Command::encode`] picks the operation for the device's generation
//! and fills in the wire parameters.

use serde::{Deserialize, Serialize};

use crate::encoding::{Polarity, TemperatureUnit, encode_half_degree};
use crate::envelope::{ReservationProgram, RequestParams};
use crate::error::{ProtocolError, Result};
use crate::identity::ProtocolGeneration;
use crate::registry::Operation;
use crate::state::{
    DEFAULT_VACATION_DAYS, MAX_VACATION_DAYS, MIN_VACATION_DAYS, OperationMode, SetpointRange,
};

/// Switch parameters: legacy controls use 1 = on, current ones 2 = on.
const LEGACY_SWITCH: Polarity = Polarity::OneIsOn;
const CURRENT_SWITCH: Polarity = Polarity::OneIsOff;

/// Anti-legionella period sent when enabling, in days.
pub const ANTI_LEGIONELLA_PERIOD_DAYS: i64 = 7;

/// Generation-independent command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Channel info (legacy) or device features (current).
    RequestInfo,
    RefreshStatus { channel: u8 },
    SetPower { channel: u8, on: bool },
    /// Set-point in the channel's unit (Celsius for current devices).
    SetTemperature { channel: u8, value: f64 },
    /// On-demand (legacy) or recirculation (current) hot button.
    SetHotButton { channel: u8, on: bool },
    SetOperationMode {
        mode: OperationMode,
        vacation_days: Option<u32>,
    },
    SetAntiLegionella { on: bool },
    SetFreezeProtection { on: bool },
    ReadReservations,
    WriteReservations { program: ReservationProgram },
}

/// Device facts a command needs to encode its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeContext {
    pub generation: ProtocolGeneration,
    pub unit: TemperatureUnit,
    pub setpoint_range: Option<SetpointRange>,
    pub unit_count: u8,
}

impl EncodeContext {
    pub fn new(generation: ProtocolGeneration) -> Self {
        Self {
            generation,
            unit: match generation {
                ProtocolGeneration::Current => TemperatureUnit::Celsius,
                ProtocolGeneration::Legacy => TemperatureUnit::Fahrenheit,
            },
            setpoint_range: None,
            unit_count: 1,
        }
    }
}

impl Command {
    /// Channel the command targets.
    pub fn channel(&self) -> u8 {
        match self {
            Self::RefreshStatus { channel }
            | Self::SetPower { channel, .. }
            | Self::SetTemperature { channel, .. }
            | Self::SetHotButton { channel, .. } => *channel,
            _ => 1,
        }
    }

    /// Operation and parameters for the given device.
    pub fn encode(&self, ctx: &EncodeContext) -> Result<(Operation, RequestParams)> {
        use ProtocolGeneration::{Current, Legacy};

        let unsupported = |operation| ProtocolError::UnknownOperation {
            generation: ctx.generation,
            operation,
        };
        let channel = RequestParams::new().with_channel(self.channel());

        Ok(match (ctx.generation, self) {
            (Legacy, Self::RequestInfo) => (Operation::ChannelInfo, channel),
            (Current, Self::RequestInfo) => (Operation::DeviceInfo, channel),

            (Legacy, Self::RefreshStatus { .. }) => (
                Operation::ChannelStatus,
                channel.with_unit_count(ctx.unit_count),
            ),
            (Current, Self::RefreshStatus { .. }) => (Operation::Status, channel),

            (Legacy, Self::SetPower { on, .. }) => (
                Operation::Power,
                channel.with_param(vec![LEGACY_SWITCH.encode(*on)]),
            ),
            (Current, Self::SetPower { on: true, .. }) => (Operation::PowerOn, channel),
            (Current, Self::SetPower { on: false, .. }) => (Operation::PowerOff, channel),

            (_, Self::SetTemperature { value, .. }) => {
                if !value.is_finite() {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "temperature {value} is not a number"
                    )));
                }
                if let Some(range) = ctx.setpoint_range.filter(|r| !r.contains(*value)) {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "temperature {value} outside {}..={}",
                        range.min, range.max
                    )));
                }
                match ctx.generation {
                    Legacy => (
                        Operation::Temperature,
                        channel.with_param(vec![ctx.unit.encode_setpoint(*value)]),
                    ),
                    Current => (
                        Operation::DhwTemperature,
                        channel.with_param(vec![encode_half_degree(*value)]),
                    ),
                }
            }

            (Legacy, Self::SetHotButton { on, .. }) => (
                Operation::HotButton,
                channel.with_param(vec![LEGACY_SWITCH.encode(*on)]),
            ),
            (Current, Self::SetHotButton { on, .. }) => (
                Operation::RecircHotButton,
                channel.with_param(vec![CURRENT_SWITCH.encode(*on)]),
            ),

            (Current, Self::SetOperationMode { mode, .. }) => {
                let param = match mode {
                    OperationMode::Vacation => {
                        let days = self.vacation_days().unwrap_or(DEFAULT_VACATION_DAYS);
                        vec![mode.to_wire(), i64::from(days)]
                    }
                    OperationMode::Other(_) => {
                        return Err(ProtocolError::InvalidParameter(format!(
                            "unknown operation mode {mode:?}"
                        )));
                    }
                    _ => vec![mode.to_wire()],
                };
                (Operation::DhwMode, channel.with_param(param))
            }

            (Current, Self::SetAntiLegionella { on: true }) => (
                Operation::AntiLegionellaOn,
                channel.with_param(vec![ANTI_LEGIONELLA_PERIOD_DAYS]),
            ),
            (Current, Self::SetAntiLegionella { on: false }) => {
                (Operation::AntiLegionellaOff, channel)
            }

            (Current, Self::SetFreezeProtection { on }) => (
                Operation::FreezeProtection,
                channel.with_param(vec![CURRENT_SWITCH.encode(*on)]),
            ),

            (Current, Self::ReadReservations) => (Operation::ReservationRead, channel),
            (Current, Self::WriteReservations { program }) => (
                Operation::ReservationWrite,
                channel.with_reservation(program.clone()),
            ),

            (Legacy, Self::SetOperationMode { .. }) => return Err(unsupported(Operation::DhwMode)),
            (Legacy, Self::SetAntiLegionella { on }) => {
                return Err(unsupported(if *on {
                    Operation::AntiLegionellaOn
                } else {
                    Operation::AntiLegionellaOff
                }));
            }
            (Legacy, Self::SetFreezeProtection { .. }) => {
                return Err(unsupported(Operation::FreezeProtection));
            }
            (Legacy, Self::ReadReservations) => return Err(unsupported(Operation::ReservationRead)),
            (Legacy, Self::WriteReservations { .. }) => {
                return Err(unsupported(Operation::ReservationWrite));
            }
        })
    }

    /// Vacation length requested by this command, if it starts one,
    /// clamped to what the device accepts.
    pub fn vacation_days(&self) -> Option<u32> {
        match self {
            Self::SetOperationMode {
                mode: OperationMode::Vacation,
                vacation_days,
            } => Some(
                vacation_days
                    .unwrap_or(DEFAULT_VACATION_DAYS)
                    .clamp(MIN_VACATION_DAYS, MAX_VACATION_DAYS),
            ),
            _ => None,
        }
    }
}
