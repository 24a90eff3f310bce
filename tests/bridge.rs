//! Method-call bridge and its HTTP surface, driven by the simulated platform.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use wifi_iot::bridge::{Bridge, MethodCall, Reply};
use wifi_iot::config::{Config, NetworkConfig, SettleSettings};
use wifi_iot::sim::JoinPlan;
use wifi_iot::{
    ConnectionState, ConnectivitySession, NetworkCapabilities, NetworkHandle, NetworkId,
    RememberedPolicy, Security, SimulatedPlatform, SupplicantState, WifiInfo, server,
};

fn robodog_plan() -> JoinPlan {
    JoinPlan {
        ssid: "RoboDog-AP".into(),
        password: Some("password123".into()),
        network_id: "7".into(),
        security: None,
        connects: Some("wlan0".into()),
        reject: None,
    }
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.settle = SettleSettings {
        max_attempts: 5,
        interval_ms: 10,
    };
    cfg.add_network(NetworkConfig {
        ssid: "RoboDog-AP".into(),
        password: "password123".into(),
        security: Security::Wpa,
        interface: None,
    });
    cfg
}

fn bridge_for(sim: &Arc<SimulatedPlatform>) -> Bridge {
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);
    Bridge::new(Arc::new(session), test_config())
}

fn error_code(reply: &Reply) -> &str {
    match reply {
        Reply::Error(err) => &err.code,
        Reply::Ok(value) => panic!("expected error, got {}", value),
    }
}

#[tokio::test]
async fn force_wifi_usage_binds_current_wifi() {
    let sim = Arc::new(
        SimulatedPlatform::new().with_network("wlan0", Some(NetworkCapabilities::wifi(true))),
    );
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new("forceWifiUsage", json!({ "useWifi": true })))
        .await;

    assert_eq!(reply, Reply::Ok(json!(true)));
    assert_eq!(sim.bound(), Some(NetworkHandle::new("wlan0")));

    let reply = bridge
        .call(MethodCall::new("forceWifiUsage", json!({ "useWifi": false })))
        .await;

    assert_eq!(reply, Reply::Ok(json!(true)));
    assert_eq!(sim.bound(), None);
}

#[tokio::test]
async fn force_wifi_usage_answers_false_when_nothing_is_found() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new(
            "forceWifiUsage",
            json!({ "useWifi": true, "timeoutMs": 20 }),
        ))
        .await;

    assert_eq!(reply, Reply::Ok(json!(false)));
    assert_eq!(sim.counters().unregister_calls, 1);
}

#[tokio::test]
async fn malformed_arguments_are_rejected() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim);

    let reply = bridge.call(MethodCall::new("forceWifiUsage", json!({}))).await;

    assert_eq!(error_code(&reply), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn unknown_methods_are_not_implemented() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim);

    let reply = bridge.call(MethodCall::new("setWiFiAPEnabled", Value::Null)).await;

    assert_eq!(error_code(&reply), "notImplemented");
}

#[tokio::test]
async fn connect_uses_saved_credentials() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    sim.push_states([ConnectionState {
        network_id: Some(NetworkId::new("7")),
        supplicant: SupplicantState::Completed,
    }]);
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new("connect", json!({ "ssid": "RoboDog-AP" })))
        .await;

    assert_eq!(reply, Reply::Ok(json!(true)));
    assert_eq!(
        bridge.session().remembered(),
        Some(NetworkHandle::new("wlan0"))
    );

    let reply = bridge.call(MethodCall::new("disconnect", Value::Null)).await;
    assert_eq!(reply, Reply::Ok(json!(true)));
    assert_eq!(bridge.session().remembered(), None);
}

#[tokio::test]
async fn connect_rejects_unknown_security() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new(
            "connect",
            json!({ "ssid": "RoboDog-AP", "security": "SAE" }),
        ))
        .await;

    assert_eq!(error_code(&reply), "INVALID_ARGUMENT");
    assert_eq!(sim.counters().connect_calls, 0);
}

#[tokio::test]
async fn registered_networks_come_from_config() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim);

    let known = bridge
        .call(MethodCall::new("isRegisteredWifiNetwork", json!({ "ssid": "RoboDog-AP" })))
        .await;
    let unknown = bridge
        .call(MethodCall::new("isRegisteredWifiNetwork", json!({ "ssid": "Cafe" })))
        .await;

    assert_eq!(known, Reply::Ok(json!(true)));
    assert_eq!(unknown, Reply::Ok(json!(false)));
}

#[tokio::test]
async fn force_wifi_usage_reports_a_refused_rebind() {
    let sim = Arc::new(
        SimulatedPlatform::new().with_network("wlan0", Some(NetworkCapabilities::wifi(true))),
    );
    let bridge = bridge_for(&sim);
    let force = || MethodCall::new("forceWifiUsage", json!({ "useWifi": true, "timeoutMs": 20 }));

    assert_eq!(bridge.call(force()).await, Reply::Ok(json!(true)));

    sim.set_bind_accepts(false);
    assert_eq!(bridge.call(force()).await, Reply::Ok(json!(false)));
    assert_eq!(sim.bound(), Some(NetworkHandle::new("wlan0")));
}

#[tokio::test]
async fn connection_getters_read_the_current_association() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim);

    for method in ["getSSID", "getBSSID", "getIP", "getCurrentSignalStrength", "getFrequency"] {
        let reply = bridge.call(MethodCall::new(method, Value::Null)).await;
        assert_eq!(reply, Reply::Ok(Value::Null), "{} without association", method);
    }

    sim.set_wifi_info(Some(WifiInfo {
        ssid: "RoboDog-AP".into(),
        bssid: Some("AA:BB:CC:DD:EE:FF".into()),
        rssi: Some(-52),
        frequency: Some(2437),
        ip: Some("192.168.4.2".into()),
    }));

    let bridge = &bridge;
    let get = move |method: &'static str| bridge.call(MethodCall::new(method, Value::Null));
    assert_eq!(get("getSSID").await, Reply::Ok(json!("RoboDog-AP")));
    assert_eq!(get("getBSSID").await, Reply::Ok(json!("AA:BB:CC:DD:EE:FF")));
    assert_eq!(get("getIP").await, Reply::Ok(json!("192.168.4.2")));
    assert_eq!(get("getCurrentSignalStrength").await, Reply::Ok(json!(-52)));
    assert_eq!(get("getFrequency").await, Reply::Ok(json!(2437)));
}

#[tokio::test]
async fn register_wifi_network_saves_profile_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = bridge_for(&sim).persist_to(path.clone());

    let reply = bridge
        .call(MethodCall::new(
            "registerWifiNetwork",
            json!({ "ssid": "Cafe", "password": "espresso", "security": "WPA" }),
        ))
        .await;

    assert_eq!(reply, Reply::Ok(Value::Null));
    assert_eq!(sim.profiles().len(), 1);
    assert_eq!(sim.profiles()[0].ssid, "Cafe");
    assert_eq!(sim.counters().connect_calls, 0);

    let saved = Config::load_from(&path).unwrap();
    let cafe = saved.find_network("Cafe").unwrap();
    assert_eq!(cafe.password, "espresso");
    assert_eq!(cafe.security, Security::Wpa);

    let known = bridge
        .call(MethodCall::new("isRegisteredWifiNetwork", json!({ "ssid": "Cafe" })))
        .await;
    assert_eq!(known, Reply::Ok(json!(true)));
}

#[tokio::test]
async fn remove_wifi_network_matches_ssid_prefix() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.add_profile("a", "RoboDog-AP");
    sim.add_profile("b", "RoboDog-Lab");
    sim.add_profile("c", "Cafe");
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new("removeWifiNetwork", json!({ "ssid": "RoboDog" })))
        .await;

    assert_eq!(reply, Reply::Ok(json!(true)));
    let left: Vec<_> = sim.profiles().into_iter().map(|p| p.ssid).collect();
    assert_eq!(left, vec!["Cafe".to_string()]);
    assert!(bridge.config().find_network("RoboDog-AP").is_none());

    let again = bridge
        .call(MethodCall::new("removeWifiNetwork", json!({ "ssid": "RoboDog" })))
        .await;
    assert_eq!(again, Reply::Ok(json!(false)));
}

#[tokio::test]
async fn remove_wifi_network_needs_a_prefix() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.add_profile("c", "Cafe");
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new("removeWifiNetwork", json!({ "ssid": "" })))
        .await;

    assert_eq!(error_code(&reply), "INVALID_ARGUMENT");
    assert_eq!(sim.profiles().len(), 1);
}

#[tokio::test]
async fn connect_rejects_malformed_bssid() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new(
            "connect",
            json!({ "ssid": "RoboDog-AP", "bssid": "not-a-mac" }),
        ))
        .await;

    assert_eq!(error_code(&reply), "INVALID_ARGUMENT");
    assert_eq!(sim.counters().connect_calls, 0);
}

#[tokio::test]
async fn connect_timeout_sets_the_settle_budget() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(JoinPlan {
        connects: None,
        ..robodog_plan()
    });
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new(
            "connect",
            json!({ "ssid": "RoboDog-AP", "timeout_in_seconds": 1 }),
        ))
        .await;

    assert_eq!(reply, Reply::Ok(json!(false)));
    // 1s at the 10ms poll interval.
    assert_eq!(sim.counters().state_reads, 100);
}

#[tokio::test]
async fn connect_join_once_releases_profile_on_disconnect() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    sim.push_states([ConnectionState {
        network_id: Some(NetworkId::new("7")),
        supplicant: SupplicantState::Completed,
    }]);
    let bridge = bridge_for(&sim);

    let reply = bridge
        .call(MethodCall::new(
            "connect",
            json!({ "ssid": "RoboDog-AP", "join_once": true, "bssid": "aa:bb:cc:dd:ee:ff" }),
        ))
        .await;
    assert_eq!(reply, Reply::Ok(json!(true)));
    assert_eq!(
        bridge.call(MethodCall::new("getBSSID", Value::Null)).await,
        Reply::Ok(json!("AA:BB:CC:DD:EE:FF"))
    );
    assert_eq!(sim.profiles().len(), 1);

    bridge.call(MethodCall::new("disconnect", Value::Null)).await;
    assert!(sim.profiles().is_empty());
}

#[tokio::test]
async fn http_call_endpoint_returns_json_reply() {
    let sim = Arc::new(
        SimulatedPlatform::new().with_network("wlan0", Some(NetworkCapabilities::wifi(false))),
    );
    let app = server::router(Arc::new(bridge_for(&sim)));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/call")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"method":"isConnected"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({ "ok": true }));
}

#[tokio::test]
async fn http_status_reports_session_state() {
    let sim = Arc::new(SimulatedPlatform::new());
    let bridge = Arc::new(bridge_for(&sim));
    bridge.session().remember(NetworkHandle::new("wlan9"));
    let app = server::router(bridge);

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["remembered"], json!("wlan9"));
    assert_eq!(value["bound"], Value::Null);
    assert_eq!(value["remembered_policy"], json!("trust"));
}
