//! Current-generation (MGPP) payload decoding.

use serde_json::Value;

use super::{
    ComponentFlags, DeviceState, FaultStatus, OperationMode, SensorReadings, SetpointRange, half,
    int, tenth,
};
use crate::encoding::{BinaryState, FlagField};
use crate::error::{ProtocolError, Result};

const ANTI_LEGIONELLA: FlagField = FlagField::b("antiLegionellaUse");
const FREEZE_PROTECTION: FlagField = FlagField::b("freezeProtectionUse");
const RECIRCULATION: FlagField = FlagField::b("recirculationUse");
const HEAT_UPPER: FlagField = FlagField::b("heatUpperUse");
const HEAT_LOWER: FlagField = FlagField::b("heatLowerUse");
const COMPRESSOR: FlagField = FlagField::b("compUse");
const EVAPORATOR_FAN: FlagField = FlagField::b("evaFanUse");
const EXPANSION_VALVE: FlagField = FlagField::b("eevUse");
const OPERATION_BUSY: FlagField = FlagField::b("operationBusy");

/// Device features from the `did` response.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFeature {
    pub setpoint_range: Option<SetpointRange>,
    pub recirculation_supported: bool,
}

impl DeviceFeature {
    pub fn from_response(response: &Value) -> Result<Self> {
        let feature = response
            .get("feature")
            .filter(|f| f.is_object())
            .ok_or_else(|| ProtocolError::Decode("feature block missing".into()))?;

        let setpoint_range = match (
            half(feature, "dhwTemperatureMin"),
            half(feature, "dhwTemperatureMax"),
        ) {
            (Some(min), Some(max)) if min <= max => Some(SetpointRange { min, max }),
            _ => None,
        };

        Ok(Self {
            setpoint_range,
            recirculation_supported: RECIRCULATION.read(feature).is_on(),
        })
    }
}

/// Decoded `status` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentStatus {
    pub operation_mode: Option<OperationMode>,
    pub vacation_days: Option<u32>,
    pub dhw_temperature: Option<f64>,
    pub dhw_setpoint: Option<f64>,
    pub sensors: SensorReadings,
    pub components: ComponentFlags,
    pub anti_legionella: BinaryState,
    pub freeze_protection: BinaryState,
    pub recirculation: BinaryState,
    pub fault: FaultStatus,
    pub dhw_charge_percent: Option<i64>,
    pub wifi_rssi: Option<i64>,
    pub current_power: Option<i64>,
}

impl CurrentStatus {
    pub fn from_response(response: &Value) -> Result<Self> {
        let status = response
            .get("status")
            .filter(|s| s.is_object())
            .ok_or_else(|| ProtocolError::Decode("status block missing".into()))?;

        let sensors = SensorReadings {
            tank_upper: tenth(status, "tankUpperTemperature"),
            tank_lower: tenth(status, "tankLowerTemperature"),
            ambient: tenth(status, "ambientTemperature"),
            discharge: tenth(status, "dischargeTemperature"),
            suction: tenth(status, "suctionTemperature"),
            evaporator: tenth(status, "evaporatorTemperature"),
            current_superheat: tenth(status, "currentSuperHeat"),
            target_superheat: tenth(status, "targetSuperHeat"),
            recirc_faucet: tenth(status, "recircFaucetTemperature"),
        };

        let components = ComponentFlags {
            upper_heater: HEAT_UPPER.read(status),
            lower_heater: HEAT_LOWER.read(status),
            compressor: COMPRESSOR.read(status),
            evaporator_fan: EVAPORATOR_FAN.read(status),
            expansion_valve: EXPANSION_VALVE.read(status),
            busy: OPERATION_BUSY.read(status),
        };

        let error_code = int(status, "errorCode").filter(|c| *c != 0);
        let fault = FaultStatus {
            has_error: int(status, "hasError").is_some_and(|v| v != 0) || error_code.is_some(),
            error_code,
            sub_error_code: int(status, "subErrorCode").filter(|c| *c != 0),
            fault_status1: int(status, "faultStatus1"),
            fault_status2: int(status, "faultStatus2"),
        };

        Ok(Self {
            operation_mode: int(status, "dhwOperationSetting").map(OperationMode::from_wire),
            vacation_days: int(status, "vacationDaySetting")
                .and_then(|d| u32::try_from(d).ok())
                .filter(|d| *d > 0),
            dhw_temperature: half(status, "dhwTemperature"),
            dhw_setpoint: half(status, "dhwTemperatureSetting"),
            sensors,
            components,
            anti_legionella: ANTI_LEGIONELLA.read(status),
            freeze_protection: FREEZE_PROTECTION.read(status),
            recirculation: RECIRCULATION.read(status),
            fault,
            dhw_charge_percent: int(status, "dhwChargePer"),
            wifi_rssi: int(status, "wifiRssi"),
            current_power: int(status, "currentInstPower"),
        })
    }

    /// Fill `state` from this status.
    pub fn apply(&self, state: &mut DeviceState) {
        state.operation_mode = self.operation_mode;
        state.power = match self.operation_mode {
            Some(OperationMode::PowerOff) => BinaryState::Off,
            Some(_) => BinaryState::On,
            None => BinaryState::Unknown,
        };
        state.dhw_temperature = self.dhw_temperature;
        state.dhw_setpoint = self.dhw_setpoint;
        state.sensors = self.sensors.clone();
        state.components = self.components.clone();
        state.features.anti_legionella = self.anti_legionella;
        state.features.freeze_protection = self.freeze_protection;
        state.features.hot_button = self.recirculation;
        state.fault = self.fault.clone();
        state.dhw_charge_percent = self.dhw_charge_percent;
        state.wifi_rssi = self.wifi_rssi;
        state.current_power = self.current_power;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_decoding() {
        let feature = DeviceFeature::from_response(&json!({
            "feature": {"dhwTemperatureMin": 76, "dhwTemperatureMax": 130, "recirculationUse": 2}
        }))
        .unwrap();
        assert_eq!(feature.setpoint_range, Some(SetpointRange { min: 38.0, max: 65.0 }));
        assert!(feature.recirculation_supported);
    }

    #[test]
    fn test_feature_requires_block() {
        assert!(DeviceFeature::from_response(&json!({"status": {}})).is_err());
    }

    #[test]
    fn test_status_decoding() {
        let status = CurrentStatus::from_response(&json!({"status": {
            "dhwOperationSetting": 3,
            "dhwTemperature": 98,
            "dhwTemperatureSetting": 101,
            "tankUpperTemperature": 512,
            "ambientTemperature": -35,
            "antiLegionellaUse": 2,
            "freezeProtectionUse": 1,
            "compUse": 2,
            "eevUse": 1,
            "operationBusy": 0,
            "errorCode": 0,
            "dhwChargePer": 80,
            "wifiRssi": -61
        }}))
        .unwrap();
        assert_eq!(status.operation_mode, Some(OperationMode::EnergySaver));
        assert_eq!(status.dhw_temperature, Some(49.0));
        assert_eq!(status.dhw_setpoint, Some(50.5));
        assert_eq!(status.sensors.tank_upper, Some(51.2));
        assert_eq!(status.sensors.ambient, Some(-3.5));
        assert_eq!(status.anti_legionella, BinaryState::On);
        assert_eq!(status.freeze_protection, BinaryState::Off);
        assert_eq!(status.components.compressor, BinaryState::On);
        assert_eq!(status.components.expansion_valve, BinaryState::Off);
        assert_eq!(status.components.busy, BinaryState::Unknown);
        assert!(!status.fault.has_error);
        assert_eq!(status.dhw_charge_percent, Some(80));
    }

    #[test]
    fn test_status_fault_block() {
        let status = CurrentStatus::from_response(&json!({"status": {
            "errorCode": 517, "subErrorCode": 1, "faultStatus1": 4
        }}))
        .unwrap();
        assert!(status.fault.has_error);
        assert_eq!(status.fault.error_code, Some(517));
        assert_eq!(status.fault.fault_status1, Some(4));
    }
}
