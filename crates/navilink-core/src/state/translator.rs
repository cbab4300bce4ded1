//! Decoded payloads to canonical snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use super::{
    CurrentStatus, DEFAULT_VACATION_DAYS, DeviceFeature, DeviceState, LegacyChannelInfo,
    LegacyChannelStatus, OperationMode, ReservationSchedule, SetpointRange, VacationSchedule,
};
use crate::encoding::TemperatureUnit;
use crate::error::{ProtocolError, Result};
use crate::identity::ProtocolGeneration;
use crate::registry::ResponseShape;

/// Channel used by current-generation devices.
const SINGLE_CHANNEL: u8 = 1;

enum Decoded {
    ChannelInfo(Vec<LegacyChannelInfo>),
    ChannelStatus(LegacyChannelStatus),
    Feature(DeviceFeature),
    Status(CurrentStatus),
    Reservation(ReservationSchedule),
}

#[derive(Default)]
struct Fragments {
    channel_info: BTreeMap<u8, LegacyChannelInfo>,
    channel_status: BTreeMap<u8, LegacyChannelStatus>,
    feature: Option<DeviceFeature>,
    status: Option<CurrentStatus>,
    reservations: Option<ReservationSchedule>,
    vacation_started_at: Option<DateTime<Utc>>,
    snapshots: BTreeMap<u8, Arc<DeviceState>>,
}

/// Keeps the latest decoded fragment of each response kind and rebuilds
/// whole snapshots from them.
///
/// Decoding happens before the lock is taken; a payload that fails to
/// decode leaves every fragment and snapshot untouched. Readers get an
/// `Arc` to a complete snapshot, never a partially updated one.
pub struct StateTranslator {
    generation: ProtocolGeneration,
    inner: RwLock<Fragments>,
}

impl StateTranslator {
    pub fn new(generation: ProtocolGeneration) -> Self {
        Self {
            generation,
            inner: RwLock::new(Fragments::default()),
        }
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    /// Decode a response body and publish new snapshots for the channels
    /// it affects.
    pub fn apply(
        &self,
        shape: ResponseShape,
        response: &Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<Arc<DeviceState>>> {
        let decoded = self.decode(shape, response)?;

        let mut inner = self.inner.write();
        let channels: BTreeSet<u8> = match decoded {
            Decoded::ChannelInfo(infos) => {
                inner.channel_info = infos.into_iter().map(|i| (i.channel_number, i)).collect();
                inner
                    .channel_info
                    .keys()
                    .chain(inner.channel_status.keys())
                    .copied()
                    .collect()
            }
            Decoded::ChannelStatus(status) => {
                let channel = status.channel_number;
                inner.channel_status.insert(channel, status);
                BTreeSet::from([channel])
            }
            Decoded::Feature(feature) => {
                inner.feature = Some(feature);
                BTreeSet::from([SINGLE_CHANNEL])
            }
            Decoded::Status(status) => {
                if status.operation_mode == Some(OperationMode::Vacation) {
                    inner.vacation_started_at.get_or_insert(now);
                } else {
                    inner.vacation_started_at = None;
                }
                inner.status = Some(status);
                BTreeSet::from([SINGLE_CHANNEL])
            }
            Decoded::Reservation(schedule) => {
                inner.reservations = Some(schedule);
                BTreeSet::from([SINGLE_CHANNEL])
            }
        };

        Ok(channels
            .into_iter()
            .map(|channel| {
                let state = Arc::new(self.build(&inner, channel, now));
                inner.snapshots.insert(channel, state.clone());
                state
            })
            .collect())
    }

    /// Record the instant a vacation was activated.
    pub fn mark_vacation_started(&self, at: DateTime<Utc>) -> Option<Arc<DeviceState>> {
        if self.generation != ProtocolGeneration::Current {
            return None;
        }
        let mut inner = self.inner.write();
        inner.vacation_started_at = Some(at);
        let state = Arc::new(self.build(&inner, SINGLE_CHANNEL, Utc::now()));
        inner.snapshots.insert(SINGLE_CHANNEL, state.clone());
        Some(state)
    }

    /// Latest snapshot of a channel.
    pub fn snapshot(&self, channel: u8) -> Option<Arc<DeviceState>> {
        self.inner.read().snapshots.get(&channel).cloned()
    }

    /// Latest snapshot of every known channel.
    pub fn snapshots(&self) -> Vec<Arc<DeviceState>> {
        self.inner.read().snapshots.values().cloned().collect()
    }

    /// Unit the channel's set-points are encoded in.
    pub fn temperature_unit(&self, channel: u8) -> TemperatureUnit {
        match self.generation {
            ProtocolGeneration::Current => TemperatureUnit::Celsius,
            ProtocolGeneration::Legacy => self
                .inner
                .read()
                .channel_info
                .get(&channel)
                .map(|i| i.unit)
                .unwrap_or(TemperatureUnit::Fahrenheit),
        }
    }

    /// Allowed set-point range, when known.
    pub fn setpoint_range(&self, channel: u8) -> Option<SetpointRange> {
        let inner = self.inner.read();
        match self.generation {
            ProtocolGeneration::Current => inner.feature.as_ref().and_then(|f| f.setpoint_range),
            ProtocolGeneration::Legacy => inner.channel_info.get(&channel).map(|i| i.setpoint_range),
        }
    }

    /// Unit count of a legacy channel (1 when unknown).
    pub fn unit_count(&self, channel: u8) -> u8 {
        self.inner
            .read()
            .channel_info
            .get(&channel)
            .map(|i| i.unit_count)
            .unwrap_or(1)
    }

    /// Channels announced by the last channel-info response.
    pub fn channels(&self) -> Vec<u8> {
        match self.generation {
            ProtocolGeneration::Current => vec![SINGLE_CHANNEL],
            ProtocolGeneration::Legacy => self.inner.read().channel_info.keys().copied().collect(),
        }
    }

    fn decode(&self, shape: ResponseShape, response: &Value) -> Result<Decoded> {
        let decoded = match (self.generation, shape) {
            (ProtocolGeneration::Legacy, ResponseShape::ChannelInfo) => {
                Decoded::ChannelInfo(LegacyChannelInfo::from_response(response)?)
            }
            (ProtocolGeneration::Legacy, ResponseShape::ChannelStatus) => {
                Decoded::ChannelStatus(LegacyChannelStatus::from_response(response)?)
            }
            (ProtocolGeneration::Current, ResponseShape::DeviceFeature) => {
                Decoded::Feature(DeviceFeature::from_response(response)?)
            }
            (ProtocolGeneration::Current, ResponseShape::DeviceStatus) => {
                Decoded::Status(CurrentStatus::from_response(response)?)
            }
            (ProtocolGeneration::Current, ResponseShape::Reservation) => {
                Decoded::Reservation(ReservationSchedule::from_response(response)?)
            }
            (generation, shape) => {
                return Err(ProtocolError::Decode(format!(
                    "{shape:?} payload is not valid for the {generation} generation"
                )));
            }
        };
        Ok(decoded)
    }

    fn build(&self, inner: &Fragments, channel: u8, now: DateTime<Utc>) -> DeviceState {
        let mut state = DeviceState::empty(self.generation, channel, now);

        match self.generation {
            ProtocolGeneration::Legacy => {
                let info = inner.channel_info.get(&channel);
                if let Some(info) = info {
                    state.temperature_unit = info.unit;
                    state.setpoint_range = Some(info.setpoint_range);
                    state.capabilities.hot_button = info.hot_button_supported;
                }
                if let Some(status) = inner.channel_status.get(&channel) {
                    status.apply(info, &mut state);
                }
            }
            ProtocolGeneration::Current => {
                if let Some(feature) = &inner.feature {
                    state.setpoint_range = feature.setpoint_range;
                    state.capabilities.recirculation = feature.recirculation_supported;
                }
                if let Some(status) = &inner.status {
                    status.apply(&mut state);
                    if status.operation_mode == Some(OperationMode::Vacation) {
                        let days = status.vacation_days.unwrap_or(DEFAULT_VACATION_DAYS);
                        let started = inner.vacation_started_at.unwrap_or(now);
                        state.vacation = Some(VacationSchedule::new(started, days));
                    }
                }
                state.reservations = inner.reservations.clone();
            }
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::BinaryState;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn test_current_status_then_feature() {
        let translator = StateTranslator::new(ProtocolGeneration::Current);
        let now = Utc::now();

        let states = translator
            .apply(
                ResponseShape::DeviceStatus,
                &json!({"status": {"dhwOperationSetting": 1, "dhwTemperatureSetting": 100}}),
                now,
            )
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].dhw_setpoint, Some(50.0));
        assert_eq!(states[0].power, BinaryState::On);
        assert!(states[0].setpoint_range.is_none());

        translator
            .apply(
                ResponseShape::DeviceFeature,
                &json!({"feature": {"dhwTemperatureMin": 76, "dhwTemperatureMax": 130}}),
                now,
            )
            .unwrap();
        let snap = translator.snapshot(1).unwrap();
        assert_eq!(snap.dhw_setpoint, Some(50.0));
        assert_eq!(snap.setpoint_range.unwrap().max, 65.0);
    }

    #[test]
    fn test_decode_failure_leaves_state_untouched() {
        let translator = StateTranslator::new(ProtocolGeneration::Current);
        let now = Utc::now();
        translator
            .apply(
                ResponseShape::DeviceStatus,
                &json!({"status": {"dhwTemperatureSetting": 100}}),
                now,
            )
            .unwrap();
        let before = translator.snapshot(1).unwrap();

        let err = translator.apply(ResponseShape::DeviceStatus, &json!({"oops": 1}), now);
        assert!(matches!(err, Err(ProtocolError::Decode(_))));
        assert!(Arc::ptr_eq(&before, &translator.snapshot(1).unwrap()));
    }

    #[test]
    fn test_wrong_generation_shape_rejected() {
        let translator = StateTranslator::new(ProtocolGeneration::Legacy);
        let err = translator.apply(ResponseShape::DeviceStatus, &json!({"status": {}}), Utc::now());
        assert!(matches!(err, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_vacation_end_from_first_observation() {
        let translator = StateTranslator::new(ProtocolGeneration::Current);
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let vacation = json!({"status": {"dhwOperationSetting": 5, "vacationDaySetting": 7}});

        translator.apply(ResponseShape::DeviceStatus, &vacation, t0).unwrap();
        let later = t0 + Duration::hours(3);
        let states = translator.apply(ResponseShape::DeviceStatus, &vacation, later).unwrap();

        let schedule = states[0].vacation.clone().unwrap();
        assert_eq!(schedule.started_at, t0);
        assert_eq!(schedule.ends_at, t0 + Duration::days(6) + Duration::hours(15));

        let states = translator
            .apply(
                ResponseShape::DeviceStatus,
                &json!({"status": {"dhwOperationSetting": 1}}),
                later,
            )
            .unwrap();
        assert!(states[0].vacation.is_none());
    }

    #[test]
    fn test_mark_vacation_started_overrides() {
        let translator = StateTranslator::new(ProtocolGeneration::Current);
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        translator
            .apply(
                ResponseShape::DeviceStatus,
                &json!({"status": {"dhwOperationSetting": 5, "vacationDaySetting": 3}}),
                t0 + Duration::minutes(1),
            )
            .unwrap();
        let state = translator.mark_vacation_started(t0).unwrap();
        let schedule = state.vacation.clone().unwrap();
        assert_eq!(schedule.days, 3);
        assert_eq!(schedule.ends_at, t0 + Duration::days(3) - Duration::hours(9));
    }

    #[test]
    fn test_legacy_channels() {
        let translator = StateTranslator::new(ProtocolGeneration::Legacy);
        let now = Utc::now();
        let states = translator
            .apply(
                ResponseShape::ChannelInfo,
                &json!({"channelInfo": {"channelList": [
                    {"channelNumber": 1, "channel": {"temperatureType": 1, "setupDHWTempMin": 74, "setupDHWTempMax": 120}},
                    {"channelNumber": 2, "channel": {"temperatureType": 2}}
                ]}}),
                now,
            )
            .unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(translator.channels(), vec![1, 2]);
        assert_eq!(translator.temperature_unit(1), TemperatureUnit::Celsius);
        assert_eq!(translator.temperature_unit(2), TemperatureUnit::Fahrenheit);

        let states = translator
            .apply(
                ResponseShape::ChannelStatus,
                &json!({"channelStatus": {"channelNumber": 2, "channel": {"powerStatus": 1, "DHWSettingTemp": 125, "unitType": 1}}}),
                now,
            )
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].channel, 2);
        assert_eq!(states[0].dhw_setpoint, Some(125.0));
        assert_eq!(states[0].power, BinaryState::On);
        assert_eq!(translator.snapshots().len(), 2);
    }
}
