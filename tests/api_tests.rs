mod common;

use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::NamedTempFile;
use wemportal::{
    EntityKind, Error, Event, MessageLogMode, Mode, ModuleAddress, Platform, Value,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

#[tokio::test]
async fn api_mode_classifies_number_and_sensor() {
    let server = MockServer::start().await;
    mount_heating_api(&server).await;

    let mut portal = builder(&server, Mode::Api).build().unwrap();
    let snapshot = portal.fetch_data().await.expect("fetch should succeed");
    let device = &snapshot["42"];
    assert!(device.is_connected());
    assert_eq!(device.records.len(), 2);

    let flow = device.record("heating-vorlauf").expect("number record");
    assert_eq!(flow.platform(), Platform::Number);
    assert_eq!(flow.value, Value::Number(21.5));
    assert_eq!(
        flow.kind,
        EntityKind::Number {
            min: 10.0,
            max: 30.0,
            step: 0.5
        }
    );
    assert_eq!(flow.address, Some(ModuleAddress { index: 0, module_type: 1 }));

    let power = device.record("heating-heat_output").expect("sensor record");
    assert_eq!(power.platform(), Platform::Sensor);
    assert_eq!(power.unit, "W");
    assert_eq!(power.value, Value::Number(3.0));
}

#[tokio::test]
async fn discovery_runs_once() {
    let server = MockServer::start().await;
    api_login(200).expect(1).mount(&server).await;
    devices(json!([{ "Index": 0, "Type": 1, "Name": "Heating" }]))
        .expect(1)
        .mount(&server)
        .await;
    parameters(
        0,
        json!([{ "ParameterID": "Aussentemperatur", "IsWriteable": false, "DataType": 0 }]),
    )
    .expect(1)
    .mount(&server)
    .await;
    refresh().expect(3).mount(&server).await;
    read(json!([{
        "ModuleIndex": 0, "ModuleType": 1,
        "Values": [{ "ParameterID": "Aussentemperatur", "NumericValue": 4.5, "Unit": "°C" }]
    }]))
    .expect(3)
    .mount(&server)
    .await;

    let mut portal = builder(&server, Mode::Api).build().unwrap();
    for _ in 0..3 {
        portal.fetch_data().await.unwrap();
    }
    let outside = portal.device("42").unwrap().record("heating-outside_temperature").unwrap();
    assert_eq!(outside.value, Value::Number(4.5));
    assert_eq!(outside.icon, "mdi:thermometer");
}

#[tokio::test]
async fn modules_without_parameters_are_pruned() {
    let server = MockServer::start().await;
    api_login(200).mount(&server).await;
    devices(json!([
        { "Index": 0, "Type": 1, "Name": "Heating" },
        { "Index": 1, "Type": 2, "Name": "Gateway" },
        { "Index": 2, "Type": 3, "Name": "Solar" },
        { "Index": 3, "Type": 4, "Name": "Buffer" }
    ]))
    .mount(&server)
    .await;
    parameters(
        0,
        json!([{ "ParameterID": "Betriebsart", "IsWriteable": true, "DataType": 1,
                 "EnumValues": [{ "Name": "Automatic", "Value": 1 }, { "Name": "Comfort", "Value": 2 }] }]),
    )
    .expect(1)
    .mount(&server)
    .await;
    parameters(1, json!([])).expect(1).mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/app/EventType/Read"))
        .and(body_partial_json(json!({ "ModuleIndex": 2 })))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;
    // A 400 is final: no re-login, the module is dropped straight away.
    Mock::given(method("POST"))
        .and(path("/app/EventType/Read"))
        .and(body_partial_json(json!({ "ModuleIndex": 3 })))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;
    refresh().mount(&server).await;
    read(json!([{
        "ModuleIndex": 0, "ModuleType": 1,
        "Values": [{ "ParameterID": "Betriebsart", "NumericValue": 2.0 }]
    }]))
    .mount(&server)
    .await;

    let mut portal = builder(&server, Mode::Api).build().unwrap();
    portal.fetch_data().await.expect("refused modules must not fail the cycle");
    portal.fetch_data().await.unwrap();

    let modules = portal.modules("42").unwrap();
    assert_eq!(modules.len(), 1);
    assert!(!modules.contains_key(&ModuleAddress { index: 3, module_type: 4 }));
    let heating = &modules[&ModuleAddress { index: 0, module_type: 1 }];
    assert_eq!(heating.name, "Heating");
    assert!(heating.parameters.as_ref().unwrap().contains_key("Betriebsart"));

    let mode = portal.device("42").unwrap().record("heating-operation_mode").unwrap();
    assert_eq!(mode.platform(), Platform::Select);
    assert_eq!(mode.option_names(), vec!["Automatic", "Comfort"]);
    assert_eq!(mode.current_option(), Some("Comfort"));
}

async fn login_error(status: u16) -> Error {
    let server = MockServer::start().await;
    api_login(status).expect(1).mount(&server).await;
    let mut portal = builder(&server, Mode::Api).build().unwrap();
    let err = portal.fetch_data().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(_)), "cycle errors are wrapped: {err:?}");
    assert!(!portal.has_api_session());
    match err {
        Error::Fetch(inner) => *inner,
        other => other,
    }
}

#[tokio::test]
async fn login_failures_are_classified() {
    assert!(matches!(login_error(400).await, Error::Auth(_)));
    assert!(matches!(login_error(403).await, Error::Forbidden(_)));
    assert!(matches!(login_error(500).await, Error::Server(_)));
    assert!(matches!(login_error(503).await, Error::Server(_)));
    assert!(matches!(login_error(418).await, Error::UnknownAuth(_)));
}

#[tokio::test]
async fn rejected_session_relogs_exactly_once() {
    let server = MockServer::start().await;
    api_login(200).expect(2).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/app/device/Read"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let mut portal = builder(&server, Mode::Api).build().unwrap();
    let err = portal.fetch_data().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(_)));
    assert!(matches!(err.root(), Error::Api { status: 401, .. }));
}

#[tokio::test]
async fn expired_session_recovers_after_relogin() {
    let server = MockServer::start().await;
    mount_heating_api(&server).await;
    Mock::given(method("GET"))
        .and(path("/app/device/Read"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let mut portal = builder(&server, Mode::Api).build().unwrap();
    let snapshot = portal.fetch_data().await.expect("retry after re-login succeeds");
    assert_eq!(snapshot["42"].records.len(), 2);
}

#[tokio::test]
async fn events_and_snapshots_are_published() {
    let server = MockServer::start().await;
    mount_heating_api(&server).await;

    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let snapshots = Arc::new(Mutex::new(0usize));
    let events_clone = events.clone();
    let snapshots_clone = snapshots.clone();

    let mut portal = builder(&server, Mode::Api)
        .on_event(move |event| events_clone.lock().unwrap().push(event.clone()))
        .on_snapshot(move |_| *snapshots_clone.lock().unwrap() += 1)
        .build()
        .unwrap();

    portal.fetch_data().await.unwrap();
    {
        let captured = events.lock().unwrap();
        assert!(matches!(
            captured[0],
            Event::ConnectionChanged { connected: true, .. }
        ));
        let added = captured
            .iter()
            .filter(|e| matches!(e, Event::RecordAdded { .. }))
            .count();
        assert_eq!(added, 2);
    }

    events.lock().unwrap().clear();
    portal.fetch_data().await.unwrap();
    assert!(events.lock().unwrap().is_empty(), "unchanged values emit nothing");
    assert_eq!(*snapshots.lock().unwrap(), 2);
}

#[tokio::test]
async fn message_log_never_contains_password() {
    let server = MockServer::start().await;
    mount_heating_api(&server).await;

    let tmp = NamedTempFile::new().unwrap();
    let log_path = tmp.path().to_str().unwrap().to_string();
    let mut portal = builder(&server, Mode::Api)
        .message_log(MessageLogMode::Diffed, log_path.clone())
        .build()
        .unwrap();
    portal.fetch_data().await.unwrap();
    portal.fetch_data().await.unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(!contents.contains(PASSWORD));
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines.iter().any(|l| l["dir"] == "req" && l["path"] == "/app/DataAccess/Read"));
    let cycles: Vec<_> = lines.iter().filter(|l| l["dir"] == "cycle").collect();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0]["full"], true);
    assert_eq!(cycles[1]["changes"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn change_value_retries_after_forbidden() {
    let server = MockServer::start().await;
    mount_heating_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/app/DataAccess/Write"))
        .and(body_partial_json(json!({ "DeviceID": "42" })))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/app/DataAccess/Write"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut portal = builder(&server, Mode::Api).build().unwrap();
    portal.fetch_data().await.unwrap();
    let address = ModuleAddress { index: 0, module_type: 1 };
    portal.change_value("42", "Vorlauf", address, 23.0).await.unwrap();

    let flow = portal.device("42").unwrap().record("heating-vorlauf").unwrap();
    assert_eq!(flow.value, Value::Number(23.0));
}
