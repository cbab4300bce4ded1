//! MQTT configuration parsing tests.

use navilink_mqtt::{MqttConfig, Qos};

#[test]
fn test_config_defaults_from_json() {
    let config: MqttConfig = serde_json::from_str(r#"{"broker": "mqtt.example"}"#).unwrap();

    assert_eq!(config, MqttConfig::new("mqtt.example"));
    assert_eq!(config.port, 1883);
    assert!(config.clean_session);
    assert!(!config.tls);
    assert_eq!(config.reconnect_interval_ms, 5000);
}

#[test]
fn test_config_full_json() {
    let config: MqttConfig = serde_json::from_str(
        r#"{
            "broker": "mqtt.example",
            "port": 8883,
            "client_id": "app-1",
            "username": "user",
            "password": "secret",
            "keep_alive": 30,
            "tls": true,
            "qos": "AtMostOnce"
        }"#,
    )
    .unwrap();

    assert_eq!(config.broker_addr(), "mqtt.example:8883");
    assert_eq!(config.client_id.as_deref(), Some("app-1"));
    assert_eq!(config.keep_alive, 30);
    assert_eq!(config.qos, Qos::AtMostOnce);
    assert_eq!(rumqttc_qos(config.qos), 0);
}

#[test]
fn test_config_serialization_skips_missing_credentials() {
    let json = serde_json::to_value(MqttConfig::new("mqtt.example")).unwrap();
    assert!(json.get("username").is_none());
    assert!(json.get("password").is_none());
}

fn rumqttc_qos(qos: Qos) -> u8 {
    qos as u8
}
