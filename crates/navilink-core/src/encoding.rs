//! Numeric encodings used on the wire.
//!
//! Temperatures travel as integers scaled by 2 (half degree) or 10
//! (tenth degree). Weekday sets travel as a bitmask. Booleans travel as
//! 1/2 with a polarity that depends on the field, so every boolean field
//! is described by a [`FlagField`] naming its [`Polarity`].

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encode Celsius to half-degree units.
pub fn encode_half_degree(celsius: f64) -> i64 {
    (celsius * 2.0).round() as i64
}

/// Decode half-degree units to Celsius.
pub fn decode_half_degree(raw: i64) -> f64 {
    raw as f64 / 2.0
}

/// Encode Celsius to tenth-degree units.
pub fn encode_tenth_degree(celsius: f64) -> i64 {
    (celsius * 10.0).round() as i64
}

/// Decode tenth-degree units to Celsius.
pub fn decode_tenth_degree(raw: i64) -> f64 {
    raw as f64 / 10.0
}

/// Unit a legacy channel reports temperatures in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Parse the legacy `temperatureType` field (1 = C, 2 = F).
    pub fn from_wire(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(Self::Celsius),
            2 => Some(Self::Fahrenheit),
            _ => None,
        }
    }

    /// Encode a set-point in this unit. Celsius uses half degrees,
    /// Fahrenheit whole degrees.
    pub fn encode_setpoint(self, value: f64) -> i64 {
        match self {
            Self::Celsius => encode_half_degree(value),
            Self::Fahrenheit => value.round() as i64,
        }
    }

    pub fn decode_setpoint(self, raw: i64) -> f64 {
        match self {
            Self::Celsius => decode_half_degree(raw),
            Self::Fahrenheit => raw as f64,
        }
    }
}

const WEEKDAY_BITS: [(Weekday, u8); 7] = [
    (Weekday::Sun, 128),
    (Weekday::Mon, 64),
    (Weekday::Tue, 32),
    (Weekday::Wed, 16),
    (Weekday::Thu, 8),
    (Weekday::Fri, 4),
    (Weekday::Sat, 2),
];

/// Set of weekdays encoded as a bitmask (Sun = 128 ... Sat = 2).
///
/// Bit 1 is unused; decoding drops it instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0xFE);

    /// Decode a wire bitmask.
    pub fn from_mask(mask: u8) -> Self {
        Self(mask & Self::ALL.0)
    }

    /// Wire bitmask.
    pub fn mask(self) -> u8 {
        self.0
    }

    pub fn from_days<I: IntoIterator<Item = Weekday>>(days: I) -> Self {
        days.into_iter().fold(Self::EMPTY, |set, day| set.with(day))
    }

    pub fn with(self, day: Weekday) -> Self {
        Self(self.0 | bit(day))
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & bit(day) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Days in the set, Sunday first.
    pub fn days(self) -> Vec<Weekday> {
        WEEKDAY_BITS
            .iter()
            .filter(|(_, b)| self.0 & b != 0)
            .map(|(d, _)| *d)
            .collect()
    }
}

fn bit(day: Weekday) -> u8 {
    WEEKDAY_BITS
        .iter()
        .find(|(d, _)| *d == day)
        .map(|(_, b)| *b)
        .unwrap_or(0)
}

/// Decoded value of a polarity-tagged boolean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryState {
    #[default]
    Unknown,
    On,
    Off,
}

impl BinaryState {
    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Unknown => None,
        }
    }
}

/// Mapping between raw 1/2 values and on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Convention A: 1 = on, 2 = off.
    OneIsOn,
    /// Convention B: 1 = off, 2 = on.
    OneIsOff,
}

impl Polarity {
    /// Decode a raw value. Anything other than 1 or 2 is `Unknown`.
    pub fn decode(self, raw: i64) -> BinaryState {
        match (self, raw) {
            (Self::OneIsOn, 1) | (Self::OneIsOff, 2) => BinaryState::On,
            (Self::OneIsOn, 2) | (Self::OneIsOff, 1) => BinaryState::Off,
            _ => BinaryState::Unknown,
        }
    }

    pub fn encode(self, on: bool) -> i64 {
        match (self, on) {
            (Self::OneIsOn, true) | (Self::OneIsOff, false) => 1,
            (Self::OneIsOn, false) | (Self::OneIsOff, true) => 2,
        }
    }
}

/// A boolean field of a wire payload together with its polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagField {
    pub key: &'static str,
    pub polarity: Polarity,
}

impl FlagField {
    pub const fn a(key: &'static str) -> Self {
        Self {
            key,
            polarity: Polarity::OneIsOn,
        }
    }

    pub const fn b(key: &'static str) -> Self {
        Self {
            key,
            polarity: Polarity::OneIsOff,
        }
    }

    /// Read the field from a JSON object. Missing or non-numeric values
    /// decode to `Unknown`.
    pub fn read(&self, object: &Value) -> BinaryState {
        object
            .get(self.key)
            .and_then(as_i64)
            .map(|raw| self.polarity.decode(raw))
            .unwrap_or_default()
    }

    pub fn encode(&self, on: bool) -> i64 {
        self.polarity.encode(on)
    }
}

/// Interpret a JSON number (or numeric string) as an integer.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
