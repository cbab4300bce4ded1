//! Device session tests.
//!
//! Drives whole request/response exchanges through the in-memory
//! transport, acting as the device on the other side.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;

use navilink_core::state::ReservationParam;
use navilink_core::{
    Command, Controller, DeviceEvent, DeviceIdentity, DeviceSession, Dispatched, InboundMessage,
    MemoryTransport, Operation, OperationMode, ProtocolError, ReservationEntry,
    ReservationProgram, SessionConfig, SessionContext, SessionEvent, TemperatureUnit, WeekdaySet,
};

const MAC: &str = "04:78:63:AB:CD:EF";
const CURRENT_RESPONSE: &str = "cmd/52/100/200/client-1/res";

fn identity(device_type: u32) -> DeviceIdentity {
    DeviceIdentity::new(device_type, MAC, "5322")
}

fn context() -> SessionContext {
    SessionContext::new("100", "200", "client-1")
}

/// Helper to start a session on a fresh transport.
async fn start(device_type: u32) -> (DeviceSession, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let session = DeviceSession::start(
        identity(device_type),
        context(),
        transport.clone(),
        SessionConfig::default(),
    )
    .await
    .unwrap();
    (session, transport)
}

/// Wait for the next published request and return its topic and envelope.
async fn next_request(watch: &mut broadcast::Receiver<InboundMessage>) -> (String, Value) {
    let msg = watch.recv().await.unwrap();
    let envelope: Value = serde_json::from_slice(&msg.payload).unwrap();
    (msg.topic, envelope)
}

/// Answer a request the way the device would.
async fn reply(transport: &MemoryTransport, request: &Value, body: Value) {
    let topic = request["responseTopic"].as_str().unwrap();
    let payload = json!({
        "protocolVersion": request["protocolVersion"],
        "clientID": "device",
        "sessionID": request["sessionID"],
        "response": body,
    });
    assert!(transport.inject(topic, serde_json::to_vec(&payload).unwrap()).await);
}

fn status_body(mode: i64) -> Value {
    json!({"status": {
        "dhwOperationSetting": mode,
        "dhwTemperature": 100,
        "dhwTemperatureSetting": 110,
        "vacationDaySetting": 7,
    }})
}

#[tokio::test]
async fn test_status_request_resolves() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move { s.refresh_status(1).await });

    let (topic, request) = next_request(&mut watch).await;
    assert_eq!(topic, "cmd/52/navilink-047863abcdef/st");
    assert_eq!(request["protocolVersion"], 2);
    assert_eq!(request["responseTopic"], CURRENT_RESPONSE);
    assert_eq!(request["request"]["command"], 16777219);
    assert!(transport.is_subscribed(CURRENT_RESPONSE));

    reply(&transport, &request, status_body(3)).await;

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.operation, Operation::Status);
    assert_eq!(response.session_id, request["sessionID"].as_str().unwrap());

    let state = session.state(1).unwrap();
    assert_eq!(state.dhw_temperature, Some(50.0));
    assert_eq!(state.dhw_setpoint, Some(55.0));
    assert_eq!(state.operation_mode, Some(OperationMode::EnergySaver));
    assert!(state.power.is_on());
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_duplicate_request_is_busy() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let first = tokio::spawn(async move { s.refresh_status(1).await });
    let (_, request) = next_request(&mut watch).await;

    let second = session.refresh_status(1).await;
    assert!(matches!(
        second,
        Err(ProtocolError::Busy {
            operation: Operation::Status,
            ..
        })
    ));

    // Busy never replaces the first request
    reply(&transport, &request, status_body(1)).await;
    assert!(first.await.unwrap().is_ok());
    assert_eq!(transport.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_frees_key() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let err = session.refresh_status(1).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(session.pending_count(), 0);
    assert!(session.state(1).is_none());

    let (_, stale) = next_request(&mut watch).await;

    let s = session.clone();
    let retry = tokio::spawn(async move { s.refresh_status(1).await });
    let (_, request) = next_request(&mut watch).await;
    assert_ne!(request["sessionID"], stale["sessionID"]);

    reply(&transport, &request, status_body(1)).await;
    assert!(retry.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_control_failure_fails_pending_control() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();
    let mut events = session.subscribe_events();

    let s = session.clone();
    let task = tokio::spawn(async move {
        s.execute(Command::SetTemperature {
            channel: 1,
            value: 50.0,
        })
        .await
    });

    let (_, request) = next_request(&mut watch).await;
    assert_eq!(request["request"]["mode"], "dhw-temperature");
    assert_eq!(request["request"]["param"], json!([100]));

    let fail = json!({
        "protocolVersion": 2,
        "sessionID": request["sessionID"],
        "response": {"failCode": 2},
    });
    assert!(
        transport
            .inject(
                "cmd/52/navilink-047863abcdef/ctrl-fail",
                serde_json::to_vec(&fail).unwrap()
            )
            .await
    );

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtocolError::ControlFailure { code: 2 }));
    assert!(err.is_retryable());

    match events.recv().await.unwrap() {
        SessionEvent::Device(DeviceEvent::ControlFail(e)) => assert!(e.is_rate_limited()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_control_failure_with_empty_session_id() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move {
        s.execute(Command::SetTemperature {
            channel: 1,
            value: 50.0,
        })
        .await
    });
    next_request(&mut watch).await;

    // devices echo the empty id the mobile app sends
    let fail = json!({"protocolVersion": 2, "sessionID": "", "response": {"failCode": 2}});
    assert!(
        transport
            .inject(
                "cmd/52/navilink-047863abcdef/ctrl-fail",
                serde_json::to_vec(&fail).unwrap()
            )
            .await
    );

    let err = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ControlFailure { code: 2 }));
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_response_with_empty_session_id_resolves_oldest() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move { s.refresh_status(1).await });
    let (_, request) = next_request(&mut watch).await;

    let payload = json!({"protocolVersion": 2, "sessionID": "", "response": status_body(1)});
    assert!(
        transport
            .inject(CURRENT_RESPONSE, serde_json::to_vec(&payload).unwrap())
            .await
    );

    let response = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.operation, Operation::Status);
    assert_eq!(response.session_id, request["sessionID"].as_str().unwrap());
}

#[tokio::test]
async fn test_connection_heartbeat() {
    let (session, _transport) = start(52).await;
    let topic = "evt/52/navilink-047863abcdef/connection";

    let offline = json!({"protocolVersion": 2, "event": {"connection": {"status": 0}}});
    match session.dispatch(InboundMessage::new(topic, serde_json::to_vec(&offline).unwrap())) {
        Dispatched::Event(DeviceEvent::Connection(e)) => {
            assert!(!e.online);
            assert_eq!(e.session_number, None);
        }
        other => panic!("unexpected {other:?}"),
    }

    let online = json!({"protocolVersion": 2, "event": {"connection": {"status": 5, "sessionNumber": 3}}});
    match session.dispatch(InboundMessage::new(topic, serde_json::to_vec(&online).unwrap())) {
        Dispatched::Event(DeviceEvent::Connection(e)) => {
            assert!(e.online);
            assert_eq!(e.session_number, Some(3));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_broker_disconnect_and_unknown_topics() {
    let (session, _transport) = start(52).await;

    let disconnect = session.dispatch(InboundMessage::new("evt/1/mobile/event/disconnect-mqtt", b"{}".to_vec()));
    assert!(matches!(
        disconnect,
        Dispatched::Event(DeviceEvent::TransportDisconnect(_))
    ));

    let unknown = session.dispatch(InboundMessage::new("foo/bar", b"raw".to_vec()));
    match unknown {
        Dispatched::Event(DeviceEvent::Unrecognized(e)) => {
            assert_eq!(e.topic, "foo/bar");
            assert_eq!(e.payload, "raw");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_unmatched_response_dropped() {
    let (session, _transport) = start(52).await;
    let payload = json!({"protocolVersion": 2, "sessionID": 42, "response": status_body(1)});

    let outcome = session.dispatch(InboundMessage::new(
        CURRENT_RESPONSE,
        serde_json::to_vec(&payload).unwrap(),
    ));
    assert_eq!(
        outcome,
        Dispatched::Unmatched {
            topic: CURRENT_RESPONSE.to_string()
        }
    );
    assert!(session.state(1).is_none());
}

#[tokio::test]
async fn test_decode_error_leaves_state() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move { s.refresh_status(1).await });
    let (_, request) = next_request(&mut watch).await;
    reply(&transport, &request, status_body(1)).await;
    task.await.unwrap().unwrap();
    let before = session.state(1).unwrap();

    let s = session.clone();
    let task = tokio::spawn(async move { s.refresh_status(1).await });
    let (_, request) = next_request(&mut watch).await;
    reply(&transport, &request, json!({"unexpected": true})).await;

    assert!(matches!(task.await.unwrap(), Err(ProtocolError::Decode(_))));
    assert!(Arc::ptr_eq(&before, &session.state(1).unwrap()));
}

#[tokio::test]
async fn test_wrong_protocol_version_rejected() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move { s.refresh_status(1).await });
    let (_, mut request) = next_request(&mut watch).await;
    request["protocolVersion"] = json!(1);
    reply(&transport, &request, status_body(1)).await;

    assert!(matches!(task.await.unwrap(), Err(ProtocolError::Decode(_))));
    assert!(session.state(1).is_none());
}

#[tokio::test]
async fn test_vacation_end_time() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move {
        s.execute(Command::SetOperationMode {
            mode: OperationMode::Vacation,
            vacation_days: Some(7),
        })
        .await
    });

    let (_, request) = next_request(&mut watch).await;
    assert_eq!(request["request"]["mode"], "dhw-mode");
    assert_eq!(request["request"]["param"], json!([5, 7]));
    reply(&transport, &request, status_body(5)).await;

    task.await.unwrap().unwrap();
    let vacation = session.state(1).unwrap().vacation.clone().unwrap();
    assert_eq!(vacation.days, 7);
    assert_eq!(
        vacation.ends_at - vacation.started_at,
        chrono::Duration::days(6) + chrono::Duration::hours(15)
    );
}

#[tokio::test]
async fn test_reservation_read_and_write_share_response_topic() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let read = tokio::spawn(async move { s.execute(Command::ReadReservations).await });
    let (read_topic, read_req) = next_request(&mut watch).await;
    assert_eq!(read_topic, "cmd/52/navilink-047863abcdef/st/rsv/rd");

    let program = ReservationProgram {
        enabled: true,
        entries: vec![ReservationEntry {
            enabled: true,
            weekdays: WeekdaySet::ALL,
            hour: 6,
            minute: 30,
            mode: OperationMode::EnergySaver,
            param: ReservationParam::Temperature(50.0),
        }],
    };
    let s = session.clone();
    let write = tokio::spawn(async move {
        s.execute(Command::WriteReservations { program }).await
    });
    let (write_topic, write_req) = next_request(&mut watch).await;
    assert_eq!(write_topic, "cmd/52/navilink-047863abcdef/ctrl/rsv/rd");
    assert_eq!(write_req["responseTopic"], read_req["responseTopic"]);
    assert_eq!(write_req["request"]["command"], read_req["request"]["command"]);
    assert_eq!(write_req["request"]["reservation"][0]["param"], 100);

    let body = json!({
        "reservationUse": 2,
        "reservation": [{"enable": 2, "week": 254, "hour": 6, "min": 30, "mode": 3, "param": 100}],
    });
    reply(&transport, &write_req, body.clone()).await;
    assert_eq!(
        write.await.unwrap().unwrap().operation,
        Operation::ReservationWrite
    );
    assert_eq!(session.pending_count(), 1);

    reply(&transport, &read_req, body).await;
    assert_eq!(
        read.await.unwrap().unwrap().operation,
        Operation::ReservationRead
    );

    let schedule = session.state(1).unwrap().reservations.clone().unwrap();
    assert!(schedule.enabled.is_on());
    assert_eq!(schedule.entries[0].weekdays, WeekdaySet::ALL);
}

#[tokio::test]
async fn test_legacy_handshake_and_control() {
    let (session, transport) = start(1).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move { s.request_info().await });
    let (topic, request) = next_request(&mut watch).await;
    assert_eq!(topic, "cmd/1/navilink-047863abcdef/status/start");
    assert_eq!(request["protocolVersion"], 1);
    assert_eq!(request["responseTopic"], "cmd/1/100/200/client-1/res/channelinfo");

    reply(
        &transport,
        &request,
        json!({"channelInfo": {"channelList": [{
            "channelNumber": 1,
            "channel": {"temperatureType": 1, "setupDHWTempMin": 74, "setupDHWTempMax": 120, "unitCount": 1}
        }]}}),
    )
    .await;
    task.await.unwrap().unwrap();
    assert_eq!(session.channels(), vec![1]);
    assert_eq!(session.state(1).unwrap().temperature_unit, TemperatureUnit::Celsius);

    // outside 37..=60 is rejected before anything is sent
    let err = session
        .execute(Command::SetTemperature {
            channel: 1,
            value: 70.0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParameter(_)));

    let s = session.clone();
    let task = tokio::spawn(async move {
        s.execute(Command::SetTemperature {
            channel: 1,
            value: 48.5,
        })
        .await
    });
    let (topic, request) = next_request(&mut watch).await;
    assert_eq!(topic, "cmd/1/navilink-047863abcdef/control");
    assert_eq!(request["request"]["control"]["mode"], "DHWTemperature");
    assert_eq!(request["request"]["control"]["param"], json!([97]));

    reply(
        &transport,
        &request,
        json!({"channelStatus": {"channelNumber": 1, "channel": {
            "powerStatus": 1, "unitType": 1, "DHWSettingTemp": 97
        }}}),
    )
    .await;
    task.await.unwrap().unwrap();
    assert_eq!(session.state(1).unwrap().dhw_setpoint, Some(48.5));
}

#[tokio::test]
async fn test_legacy_switch_bodies() {
    let (session, transport) = start(1).await;
    let mut watch = transport.watch_published();

    let cases = [
        (Command::SetPower { channel: 1, on: true }, 33554433, "power", 1),
        (Command::SetPower { channel: 1, on: false }, 33554433, "power", 2),
        (Command::SetHotButton { channel: 1, on: true }, 33554437, "onDemand", 1),
        (Command::SetHotButton { channel: 1, on: false }, 33554437, "onDemand", 2),
    ];
    for (command, id, mode, param) in cases {
        let s = session.clone();
        let task = tokio::spawn(async move { s.execute(command).await });

        let (topic, request) = next_request(&mut watch).await;
        assert_eq!(topic, "cmd/1/navilink-047863abcdef/control");
        assert_eq!(
            request["request"],
            json!({
                "additionalValue": "5322",
                "command": id,
                "control": {"channelNumber": 1, "mode": mode, "param": [param]},
                "deviceType": 1,
                "macAddress": "047863abcdef",
            })
        );

        reply(
            &transport,
            &request,
            json!({"channelStatus": {"channelNumber": 1, "channel": {"powerStatus": param}}}),
        )
        .await;
        task.await.unwrap().unwrap();
    }
    assert!(!session.state(1).unwrap().power.is_on());
}

#[tokio::test]
async fn test_legacy_rejects_current_only_commands() {
    let (session, transport) = start(1).await;
    let err = session.execute(Command::ReadReservations).await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownOperation { .. }));
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_publish_failure_releases_key() {
    let (session, transport) = start(52).await;
    transport.set_fail_publish(true);

    let err = session.refresh_status(1).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Transport(_)));
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_last_will_announces_offline() {
    let will = DeviceSession::last_will(&identity(52), &context()).unwrap();
    assert_eq!(will.topic, "evt/52/navilink-047863abcdef/app-connection");
    let payload: Value = serde_json::from_slice(&will.payload).unwrap();
    assert_eq!(payload["protocolVersion"], 1);
    assert_eq!(payload["event"]["connection"]["status"], 0);

    let legacy = DeviceSession::last_will(&identity(1), &context()).unwrap();
    assert_eq!(legacy.topic, "evt/1/navilink-047863abcdef/app-connection");

    let transport = Arc::new(MemoryTransport::new().with_last_will(will));
    let session = DeviceSession::start(identity(52), context(), transport.clone(), SessionConfig::default())
        .await
        .unwrap();
    let mut events = session.subscribe_events();
    assert!(transport.trigger_last_will().await);

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        SessionEvent::Device(DeviceEvent::Connection(e)) => assert!(!e.online),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_close_fails_pending_requests() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();

    let s = session.clone();
    let task = tokio::spawn(async move { s.refresh_status(1).await });
    next_request(&mut watch).await;

    session.close().await;
    assert!(matches!(task.await.unwrap(), Err(ProtocolError::SessionClosed)));
    assert!(transport.subscriptions().is_empty());
    assert!(matches!(
        session.refresh_status(1).await,
        Err(ProtocolError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_controller_routes_by_identity() {
    let (session, transport) = start(52).await;
    let mut watch = transport.watch_published();
    let controller = Arc::new(Controller::new());
    assert!(controller.add(session).is_none());
    assert_eq!(controller.len(), 1);

    let c = controller.clone();
    let task = tokio::spawn(async move {
        c.execute(&identity(52), Command::RefreshStatus { channel: 1 })
            .await
    });
    let (_, request) = next_request(&mut watch).await;
    reply(&transport, &request, status_body(1)).await;
    assert!(task.await.unwrap().is_ok());

    let err = controller
        .execute(&identity(1), Command::RequestInfo)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParameter(_)));

    assert!(controller.remove(&identity(52)).await.is_some());
    assert!(controller.is_empty());
}
