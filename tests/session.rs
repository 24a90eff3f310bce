//! Join and disconnect flows. These go through the blocking worker pool, so
//! they run on the real clock with short settle intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wifi_iot::config::SettleSettings;
use wifi_iot::sim::JoinPlan;
use wifi_iot::{
    AcquisitionResult, ConnectionState, ConnectivitySession, JoinRequest, NetworkCapabilities,
    NetworkHandle, NetworkId, PlatformError, RememberedPolicy, Security, SettleOutcome,
    SimulatedPlatform, SupplicantState, WifiIotError,
};

const FAST: SettleSettings = SettleSettings {
    max_attempts: 5,
    interval_ms: 10,
};

fn robodog_plan() -> JoinPlan {
    JoinPlan {
        ssid: "RoboDog-AP".into(),
        password: Some("password123".into()),
        network_id: "7".into(),
        security: Some(Security::Wpa),
        connects: Some("wlan0".into()),
        reject: None,
    }
}

fn robodog_request(password: &str) -> JoinRequest {
    JoinRequest::new("RoboDog-AP", Some(password.into()), Security::Wpa)
}

fn completed(id: &str) -> ConnectionState {
    ConnectionState {
        network_id: Some(NetworkId::new(id)),
        supplicant: SupplicantState::Completed,
    }
}

#[tokio::test]
async fn successful_join_remembers_the_connected_wifi_network() {
    let sim = Arc::new(
        SimulatedPlatform::new().with_network("rmnet0", Some(NetworkCapabilities::cellular(true))),
    );
    sim.plan_join(robodog_plan());
    sim.push_states([ConnectionState::disconnected(), completed("7")]);
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    let outcome = session
        .join(robodog_request("password123"), FAST, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, SettleOutcome::Connected { attempts: 2 });
    assert_eq!(session.remembered(), Some(NetworkHandle::new("wlan0")));

    let result = session.acquire(Duration::from_secs(5)).await;
    assert_eq!(result, AcquisitionResult::Success(NetworkHandle::new("wlan0")));
    assert_eq!(sim.counters().request_calls, 0);
}

#[tokio::test]
async fn join_that_never_completes_is_not_remembered() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(JoinPlan {
        connects: None,
        ..robodog_plan()
    });
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    let outcome = session
        .join(robodog_request("password123"), FAST, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, SettleOutcome::Exhausted { attempts: 5 });
    assert_eq!(session.remembered(), None);
    assert_eq!(sim.counters().state_reads, 5);
}

#[tokio::test]
async fn rejected_connect_surfaces_platform_error() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    let err = session
        .join(robodog_request("wrong"), FAST, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WifiIotError::Platform(PlatformError::Rejected(_))
    ));
    assert_eq!(sim.counters().state_reads, 0);
}

#[tokio::test]
async fn cancelled_join_reports_cancelled() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let settings = SettleSettings {
        max_attempts: 20,
        interval_ms: 500,
    };
    let outcome = session
        .join(robodog_request("password123"), settings, cancel)
        .await
        .unwrap();

    assert_eq!(outcome, SettleOutcome::Cancelled { attempts: 1 });
    assert!(!outcome.connected());
}

#[tokio::test]
async fn disconnect_forgets_the_remembered_network() {
    let sim = Arc::new(SimulatedPlatform::new());
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);
    session.remember(NetworkHandle::new("wlan0"));

    let disconnected = session.disconnect().await.unwrap();

    assert!(disconnected);
    assert_eq!(session.remembered(), None);
    assert_eq!(sim.counters().disconnect_calls, 1);
}

#[tokio::test]
async fn wifi_presence_does_not_require_a_connection() {
    let sim = Arc::new(
        SimulatedPlatform::new()
            .with_network("rmnet0", Some(NetworkCapabilities::cellular(true)))
            .with_network("wlan0", Some(NetworkCapabilities::wifi(false))),
    );
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    assert!(session.is_wifi_connected());
    assert_eq!(session.find_connected_wifi(), None);

    let cellular_only = Arc::new(
        SimulatedPlatform::new().with_network("rmnet0", Some(NetworkCapabilities::cellular(true))),
    );
    let session = ConnectivitySession::new(cellular_only, RememberedPolicy::Trust);
    assert!(!session.is_wifi_connected());
}

#[tokio::test]
async fn join_once_profile_is_removed_on_disconnect() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    sim.push_states([completed("7")]);
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    let request = JoinRequest {
        join_once: true,
        ..robodog_request("password123")
    };
    let outcome = session
        .join(request, FAST, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.connected());
    assert_eq!(sim.profiles().len(), 1);

    session.disconnect().await.unwrap();

    assert!(sim.profiles().is_empty());
    assert_eq!(sim.counters().remove_calls, 1);
}

#[tokio::test]
async fn failed_join_once_removes_its_profile_right_away() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(JoinPlan {
        connects: None,
        ..robodog_plan()
    });
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    let request = JoinRequest {
        join_once: true,
        ..robodog_request("password123")
    };
    let outcome = session
        .join(request, FAST, CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.connected());
    assert!(sim.profiles().is_empty());

    // Nothing left for shutdown to clean up.
    session.release_join_once().await;
    assert_eq!(sim.counters().remove_calls, 1);
}

#[tokio::test]
async fn ordinary_join_keeps_its_profile() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    sim.push_states([completed("7")]);
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    session
        .join(robodog_request("password123"), FAST, CancellationToken::new())
        .await
        .unwrap();
    session.disconnect().await.unwrap();
    session.release_join_once().await;

    assert_eq!(sim.profiles().len(), 1);
    assert_eq!(sim.counters().remove_calls, 0);
}

#[tokio::test]
async fn join_with_wrong_security_is_rejected() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);

    let err = session
        .join(
            JoinRequest::new("RoboDog-AP", Some("password123".into()), Security::Wep),
            FAST,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WifiIotError::Platform(PlatformError::Rejected(_))
    ));
    assert!(sim.profiles().is_empty());
}

#[tokio::test]
async fn wifi_info_reflects_the_joined_network() {
    let sim = Arc::new(SimulatedPlatform::new());
    sim.plan_join(robodog_plan());
    sim.push_states([completed("7")]);
    let session = ConnectivitySession::new(sim.clone(), RememberedPolicy::Trust);
    assert_eq!(session.wifi_info(), None);

    let request = JoinRequest {
        bssid: Some("AA:BB:CC:DD:EE:FF".into()),
        ..robodog_request("password123")
    };
    session
        .join(request, FAST, CancellationToken::new())
        .await
        .unwrap();

    let info = session.wifi_info().unwrap();
    assert_eq!(info.ssid, "RoboDog-AP");
    assert_eq!(info.bssid.as_deref(), Some("AA:BB:CC:DD:EE:FF"));

    session.disconnect().await.unwrap();
    assert_eq!(session.wifi_info(), None);
}
