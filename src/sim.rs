//! In-process platform whose behaviour is scripted up front.
//!
//! Used by the test suite and by the `simulate` command, which reads the
//! script from a TOML scenario file:
//!
//! ```toml
//! remembered = "wlan0"          # optional
//! timeout_ms = 5000             # optional
//! bind_accepts = true
//!
//! [[networks]]
//! id = "rmnet0"
//! capabilities = { transport = "cellular", connected = true }
//!
//! [request]
//! events = [{ kind = "available", network = "wlan0", after_ms = 1200 }]
//!
//! [join]
//! ssid = "RoboDog-AP"
//! network_id = "7"
//! security = "WPA"
//! connects = "wlan0"
//!
//! [[connection_states]]
//! network_id = "7"
//! supplicant = "completed"
//! ```
//!
//! Scripted request events keep firing after the request is deregistered;
//! the cascade must drop them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::PlatformError;
use crate::network::{
    ConnectionState, NetworkCapabilities, NetworkCriteria, NetworkHandle, NetworkId, TransportKind,
    WifiInfo,
};
use crate::platform::{
    ConnectionStateReader, ConnectivityService, JoinRequest, LegacyConnector, NetworkEvent,
    ProfileStore, RequestId, Security, WifiInfoReader,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SimNetwork {
    pub id: String,
    #[serde(default)]
    pub capabilities: Option<NetworkCapabilities>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedEvent {
    Available { network: String, after_ms: u64 },
    Unavailable { after_ms: u64 },
    Lost { network: String, after_ms: u64 },
}

impl ScriptedEvent {
    fn delay(&self) -> Duration {
        match self {
            ScriptedEvent::Available { after_ms, .. }
            | ScriptedEvent::Unavailable { after_ms }
            | ScriptedEvent::Lost { after_ms, .. } => Duration::from_millis(*after_ms),
        }
    }

    fn event(&self) -> NetworkEvent {
        match self {
            ScriptedEvent::Available { network, .. } => {
                NetworkEvent::Available(NetworkHandle::new(network.as_str()))
            }
            ScriptedEvent::Unavailable { .. } => NetworkEvent::Unavailable,
            ScriptedEvent::Lost { network, .. } => {
                NetworkEvent::Lost(NetworkHandle::new(network.as_str()))
            }
        }
    }
}

/// What happens when a network request is registered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestPlan {
    /// Reject registration with this reason.
    #[serde(default)]
    pub reject: Option<String>,
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinPlan {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
    pub network_id: String,
    /// Reject joins asking for a different security type.
    #[serde(default)]
    pub security: Option<Security>,
    /// Network that reports connected Wi-Fi once the connect is issued.
    #[serde(default)]
    pub connects: Option<String>,
    #[serde(default)]
    pub reject: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub networks: Vec<SimNetwork>,
    #[serde(default = "default_bind_accepts")]
    pub bind_accepts: bool,
    #[serde(default)]
    pub request: RequestPlan,
    #[serde(default)]
    pub connection_states: Vec<ConnectionState>,
    #[serde(default)]
    pub join: Option<JoinPlan>,
    #[serde(default)]
    pub remembered: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub profiles: Vec<SimProfile>,
    #[serde(default)]
    pub wifi_info: Option<WifiInfo>,
}

/// A saved profile known to the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimProfile {
    pub id: NetworkId,
    pub ssid: String,
}

fn default_bind_accepts() -> bool {
    true
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse scenario file: {}", path.display()))
    }
}

/// Call counts observed by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub list_calls: usize,
    pub bind_calls: usize,
    pub request_calls: usize,
    pub unregister_calls: usize,
    pub state_reads: usize,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    pub register_calls: usize,
    pub remove_calls: usize,
}

struct SimState {
    networks: Vec<(NetworkHandle, Option<NetworkCapabilities>)>,
    bind_accepts: bool,
    bound: Option<NetworkHandle>,
    request: RequestPlan,
    next_request: u64,
    states: VecDeque<ConnectionState>,
    last_state: ConnectionState,
    join: Option<JoinPlan>,
    profiles: Vec<SimProfile>,
    next_profile: u64,
    wifi_info: Option<WifiInfo>,
    counters: SimCounters,
}

pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                networks: Vec::new(),
                bind_accepts: true,
                bound: None,
                request: RequestPlan::default(),
                next_request: 1,
                states: VecDeque::new(),
                last_state: ConnectionState::disconnected(),
                join: None,
                profiles: Vec::new(),
                next_profile: 1,
                wifi_info: None,
                counters: SimCounters::default(),
            }),
        }
    }

    pub fn from_scenario(scenario: &Scenario) -> Self {
        let sim = Self::new();
        {
            let mut state = sim.lock();
            state.networks = scenario
                .networks
                .iter()
                .map(|n| (NetworkHandle::new(n.id.as_str()), n.capabilities))
                .collect();
            state.bind_accepts = scenario.bind_accepts;
            state.request = scenario.request.clone();
            state.states = scenario.connection_states.iter().cloned().collect();
            state.join = scenario.join.clone();
            state.profiles = scenario.profiles.clone();
            state.wifi_info = scenario.wifi_info.clone();
        }
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_network(self, id: &str, capabilities: Option<NetworkCapabilities>) -> Self {
        self.lock()
            .networks
            .push((NetworkHandle::new(id), capabilities));
        self
    }

    /// Replaces the snapshot of `id`, adding the network if it is unknown.
    pub fn set_capabilities(&self, id: &str, capabilities: Option<NetworkCapabilities>) {
        let mut state = self.lock();
        let handle = NetworkHandle::new(id);
        match state.networks.iter().position(|(h, _)| *h == handle) {
            Some(index) => state.networks[index].1 = capabilities,
            None => state.networks.push((handle, capabilities)),
        }
    }

    pub fn set_bind_accepts(&self, accepts: bool) {
        self.lock().bind_accepts = accepts;
    }

    pub fn script_request(&self, events: Vec<ScriptedEvent>) {
        let mut state = self.lock();
        state.request.reject = None;
        state.request.events = events;
    }

    pub fn reject_requests(&self, reason: &str) {
        self.lock().request.reject = Some(reason.to_string());
    }

    pub fn push_states(&self, states: impl IntoIterator<Item = ConnectionState>) {
        self.lock().states.extend(states);
    }

    pub fn plan_join(&self, plan: JoinPlan) {
        self.lock().join = Some(plan);
    }

    pub fn set_wifi_info(&self, info: Option<WifiInfo>) {
        self.lock().wifi_info = info;
    }

    pub fn add_profile(&self, id: &str, ssid: &str) {
        self.lock().profiles.push(SimProfile {
            id: NetworkId::new(id),
            ssid: ssid.to_string(),
        });
    }

    pub fn profiles(&self) -> Vec<SimProfile> {
        self.lock().profiles.clone()
    }

    pub fn counters(&self) -> SimCounters {
        self.lock().counters
    }

    pub fn bound(&self) -> Option<NetworkHandle> {
        self.lock().bound.clone()
    }
}

impl ConnectivityService for SimulatedPlatform {
    fn list_networks(&self) -> Result<Vec<NetworkHandle>, PlatformError> {
        let mut state = self.lock();
        state.counters.list_calls += 1;
        Ok(state.networks.iter().map(|(h, _)| h.clone()).collect())
    }

    fn capabilities_of(&self, network: &NetworkHandle) -> Option<NetworkCapabilities> {
        self.lock()
            .networks
            .iter()
            .find(|(h, _)| h == network)
            .and_then(|(_, caps)| *caps)
    }

    fn bind_process_to(&self, network: Option<&NetworkHandle>) -> bool {
        let mut state = self.lock();
        state.counters.bind_calls += 1;
        if !state.bind_accepts {
            return false;
        }
        state.bound = network.cloned();
        true
    }

    fn request_network(
        &self,
        criteria: NetworkCriteria,
        events: UnboundedSender<NetworkEvent>,
    ) -> Result<RequestId, PlatformError> {
        let mut state = self.lock();
        state.counters.request_calls += 1;
        if let Some(reason) = &state.request.reject {
            return Err(PlatformError::Rejected(reason.clone()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PlatformError::Call("simulator needs a Tokio runtime".to_string()))?;

        let request = RequestId(state.next_request);
        state.next_request += 1;
        debug!(%request, ?criteria, "simulated network request");

        for scripted in state.request.events.clone() {
            let events = events.clone();
            runtime.spawn(async move {
                tokio::time::sleep(scripted.delay()).await;
                let _ = events.send(scripted.event());
            });
        }
        Ok(request)
    }

    fn unregister_request(&self, _request: RequestId) {
        self.lock().counters.unregister_calls += 1;
    }
}

impl ConnectionStateReader for SimulatedPlatform {
    /// Replays queued states, then repeats the last one.
    fn current_connection_state(&self) -> Result<ConnectionState, PlatformError> {
        let mut state = self.lock();
        state.counters.state_reads += 1;
        if let Some(next) = state.states.pop_front() {
            state.last_state = next;
        }
        Ok(state.last_state.clone())
    }
}

impl LegacyConnector for SimulatedPlatform {
    fn issue_connect(&self, request: &JoinRequest) -> Result<NetworkId, PlatformError> {
        let mut state = self.lock();
        state.counters.connect_calls += 1;
        let plan = state
            .join
            .clone()
            .ok_or_else(|| PlatformError::Call("no join planned".to_string()))?;

        if let Some(reason) = plan.reject {
            return Err(PlatformError::Rejected(reason));
        }
        if plan.ssid != request.ssid {
            return Err(PlatformError::Call(format!("unknown ssid '{}'", request.ssid)));
        }
        if plan.password.is_some() && plan.password != request.password {
            return Err(PlatformError::Rejected("wrong password".to_string()));
        }
        if plan.security.is_some_and(|security| security != request.security) {
            return Err(PlatformError::Rejected(format!(
                "network does not use {} security",
                request.security
            )));
        }

        if let Some(id) = &plan.connects {
            let handle = NetworkHandle::new(id.as_str());
            let caps = Some(NetworkCapabilities::wifi(true));
            match state.networks.iter().position(|(h, _)| *h == handle) {
                Some(index) => state.networks[index].1 = caps,
                None => state.networks.push((handle, caps)),
            }
            state.wifi_info = Some(WifiInfo {
                ssid: request.ssid.clone(),
                bssid: request.bssid.clone(),
                ..WifiInfo::default()
            });
        }

        let id = NetworkId::new(plan.network_id);
        if !state.profiles.iter().any(|p| p.id == id) {
            state.profiles.push(SimProfile {
                id: id.clone(),
                ssid: request.ssid.clone(),
            });
        }
        Ok(id)
    }

    fn disconnect(&self) -> Result<bool, PlatformError> {
        let mut state = self.lock();
        state.counters.disconnect_calls += 1;
        for (_, caps) in state.networks.iter_mut() {
            if let Some(caps) = caps {
                if caps.transport == TransportKind::Wifi {
                    caps.connected = false;
                }
            }
        }
        state.last_state = ConnectionState::disconnected();
        state.wifi_info = None;
        Ok(true)
    }
}

impl ProfileStore for SimulatedPlatform {
    fn register_network(&self, request: &JoinRequest) -> Result<NetworkId, PlatformError> {
        let mut state = self.lock();
        state.counters.register_calls += 1;
        let id = NetworkId::new(format!("profile-{}", state.next_profile));
        state.next_profile += 1;
        state.profiles.push(SimProfile {
            id: id.clone(),
            ssid: request.ssid.clone(),
        });
        Ok(id)
    }

    fn remove_networks(&self, ssid_prefix: &str) -> Result<usize, PlatformError> {
        let mut state = self.lock();
        state.counters.remove_calls += 1;
        let before = state.profiles.len();
        state.profiles.retain(|p| !p.ssid.starts_with(ssid_prefix));
        Ok(before - state.profiles.len())
    }

    fn remove_profile(&self, id: &NetworkId) -> Result<bool, PlatformError> {
        let mut state = self.lock();
        state.counters.remove_calls += 1;
        let before = state.profiles.len();
        state.profiles.retain(|p| p.id != *id);
        Ok(state.profiles.len() != before)
    }
}

impl WifiInfoReader for SimulatedPlatform {
    fn wifi_info(&self) -> Result<Option<WifiInfo>, PlatformError> {
        Ok(self.lock().wifi_info.clone())
    }
}
