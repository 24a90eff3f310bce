//! Linux platform adapter built on NetworkManager's `nmcli`.
//!
//! # Requirements
//!
//! - NetworkManager must be installed and running
//! - The `nmcli` command must be available in PATH
//! - User must have permission to manage network connections
//!
//! # Mapping
//!
//! - Every NetworkManager device is a [`NetworkHandle`] named after the device.
//! - Device type maps to the transport, device state "connected" to the
//!   connected flag. NetworkManager has no notion of restricted networks.
//! - The numeric device state maps onto [`SupplicantState`]; the active
//!   connection profile UUID is the [`NetworkId`].
//! - Linux has no per-process routing switch, so binding moves the default
//!   route instead: the bound device's active connection gets
//!   [`FORCED_ROUTE_METRIC`], which beats NetworkManager's defaults
//!   (ethernet 100, Wi-Fi 600). Unbinding restores the default metric. The
//!   marker lives in the NetworkManager profile, so a binding made by one
//!   process can be inspected and cleared by another.

use std::collections::{HashMap, HashSet};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::{PlatformError, WifiIotError};
use crate::network::{
    ConnectionState, NetworkCapabilities, NetworkCriteria, NetworkHandle, NetworkId,
    SupplicantState, TransportKind, WifiInfo,
};
use crate::platform::{
    ConnectionStateReader, ConnectivityService, JoinRequest, LegacyConnector, NetworkEvent,
    ProfileStore, RequestId, Security, WifiInfoReader,
};

/// How often a pending network request re-checks the device list.
const REQUEST_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Route metric marking the connection traffic is forced through.
pub const FORCED_ROUTE_METRIC: i64 = 50;

/// Lets NetworkManager pick the metric from the device type.
const DEFAULT_ROUTE_METRIC: i64 = -1;

const WIFI_CONNECTION_TYPE: &str = "802-11-wireless";

/// Runs nmcli and returns its stdout. A non-zero exit becomes
/// `NmcliExecution` carrying stderr (or stdout when stderr is empty).
pub(crate) fn run_nmcli(args: &[&str]) -> Result<String, WifiIotError> {
    let output = Command::new("nmcli")
        .args(args)
        .output()
        .map_err(|e| WifiIotError::NmcliExecution(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let error_msg = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(WifiIotError::NmcliExecution(error_msg));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// One line of `nmcli -t -f DEVICE,TYPE,STATE device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub kind: String,
    pub state: String,
}

impl DeviceEntry {
    pub fn transport(&self) -> TransportKind {
        match self.kind.as_str() {
            "wifi" => TransportKind::Wifi,
            "ethernet" => TransportKind::Ethernet,
            "gsm" | "cdma" | "modem" => TransportKind::Cellular,
            "loopback" => TransportKind::None,
            _ => TransportKind::Other,
        }
    }

    pub fn is_connected(&self) -> bool {
        // "connected", "connected (externally)", ...
        self.state.starts_with("connected")
    }

    pub fn capabilities(&self) -> NetworkCapabilities {
        NetworkCapabilities {
            transport: self.transport(),
            restricted: false,
            connected: self.is_connected(),
        }
    }
}

/// Splits one line of terse output into fields, undoing nmcli's `\:` and
/// `\\` escapes.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    field.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

pub fn parse_device_list(stdout: &str) -> Vec<DeviceEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 3 || parts[0].is_empty() {
                return None;
            }
            Some(DeviceEntry {
                name: parts[0].to_string(),
                kind: parts[1].to_string(),
                state: parts[2..].join(":"),
            })
        })
        .collect()
}

pub fn list_devices() -> Result<Vec<DeviceEntry>, WifiIotError> {
    let stdout = run_nmcli(&["-t", "-f", "DEVICE,TYPE,STATE", "device"])?;
    Ok(parse_device_list(&stdout))
}

/// Fields of `nmcli -t device show <iface>` the crate cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDetails {
    /// Raw state string, e.g. "100 (connected)".
    pub state: String,
    /// Active connection profile, if any.
    pub connection: Option<String>,
    pub connection_uuid: Option<String>,
    /// Primary IPv4 address with CIDR, e.g. "192.168.4.2/24".
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
}

impl DeviceDetails {
    /// Leading numeric NetworkManager device state, if present.
    pub fn state_code(&self) -> Option<u32> {
        self.state.split_whitespace().next()?.parse().ok()
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            network_id: self
                .connection_uuid
                .as_deref()
                .or(self.connection.as_deref())
                .map(NetworkId::new),
            supplicant: self
                .state_code()
                .map(supplicant_from_device_state)
                .unwrap_or(SupplicantState::Unknown),
        }
    }
}

/// Parses terse KEY:VALUE output. Values may contain colons.
pub fn parse_device_show(stdout: &str) -> DeviceDetails {
    let mut details = DeviceDetails {
        state: "unknown".to_string(),
        ..DeviceDetails::default()
    };

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => details.state = value.to_string(),
            "GENERAL.CONNECTION" if present => details.connection = Some(value.to_string()),
            "GENERAL.CON-UUID" if present => details.connection_uuid = Some(value.to_string()),
            "IP4.ADDRESS[1]" if present => details.ip_address = Some(value.to_string()),
            "IP4.GATEWAY" if present => details.gateway = Some(value.to_string()),
            _ => {}
        }
    }

    details
}

pub fn device_details(interface: &str) -> Result<DeviceDetails, WifiIotError> {
    let stdout = run_nmcli(&["-t", "device", "show", interface])?;
    if !stdout.lines().any(|line| line.starts_with("GENERAL.STATE:")) {
        return Err(WifiIotError::NmcliParse(format!(
            "no GENERAL.STATE for device '{}'",
            interface
        )));
    }
    Ok(parse_device_show(&stdout))
}

/// One line of `nmcli -t -f NAME,UUID,TYPE,DEVICE connection show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub name: String,
    pub uuid: String,
    pub kind: String,
    /// Device the profile is active on.
    pub device: Option<String>,
}

pub fn parse_connections(stdout: &str) -> Vec<ConnectionEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            if fields.len() < 4 || fields[1].is_empty() {
                return None;
            }
            let device = match fields[3].as_str() {
                "" | "--" => None,
                device => Some(device.to_string()),
            };
            Some(ConnectionEntry {
                name: fields[0].clone(),
                uuid: fields[1].clone(),
                kind: fields[2].clone(),
                device,
            })
        })
        .collect()
}

/// Saved profiles, or only the active ones.
pub fn list_connections(active_only: bool) -> Result<Vec<ConnectionEntry>, WifiIotError> {
    let mut args = vec!["-t", "-f", "NAME,UUID,TYPE,DEVICE", "connection", "show"];
    if active_only {
        args.push("--active");
    }
    Ok(parse_connections(&run_nmcli(&args)?))
}

/// Profile setting read with `nmcli -g`.
fn connection_setting(uuid: &str, setting: &str) -> Result<String, WifiIotError> {
    let stdout = run_nmcli(&["-g", setting, "connection", "show", "uuid", uuid])?;
    Ok(stdout.trim().to_string())
}

fn route_metric(uuid: &str) -> Result<i64, WifiIotError> {
    let value = connection_setting(uuid, "ipv4.route-metric")?;
    value
        .parse()
        .map_err(|_| WifiIotError::NmcliParse(format!("route metric '{}' of {}", value, uuid)))
}

fn set_route_metric(connection: &ConnectionEntry, metric: i64) -> Result<(), WifiIotError> {
    let metric = metric.to_string();
    run_nmcli(&[
        "connection",
        "modify",
        "uuid",
        connection.uuid.as_str(),
        "ipv4.route-metric",
        metric.as_str(),
        "ipv6.route-metric",
        metric.as_str(),
    ])?;
    if let Some(device) = connection.device.as_deref() {
        run_nmcli(&["device", "reapply", device])?;
    }
    Ok(())
}

/// Active connections carrying [`FORCED_ROUTE_METRIC`].
pub fn forced_connections() -> Result<Vec<ConnectionEntry>, WifiIotError> {
    let mut forced = Vec::new();
    for connection in list_connections(true)? {
        if route_metric(&connection.uuid)? == FORCED_ROUTE_METRIC {
            forced.push(connection);
        }
    }
    Ok(forced)
}

/// Route metric updates that leave only `device`'s connection forced, or
/// none at all when `device` is `None`. `metrics[i]` belongs to `active[i]`.
/// Returns `None` when `device` has no active connection.
fn route_changes<'a>(
    active: &'a [ConnectionEntry],
    metrics: &[i64],
    device: Option<&str>,
) -> Option<Vec<(&'a ConnectionEntry, i64)>> {
    let target = match device {
        Some(device) => Some(active.iter().position(|c| c.device.as_deref() == Some(device))?),
        None => None,
    };

    let mut changes = Vec::new();
    for (index, (connection, &metric)) in active.iter().zip(metrics).enumerate() {
        if Some(index) == target {
            if metric != FORCED_ROUTE_METRIC {
                changes.push((connection, FORCED_ROUTE_METRIC));
            }
        } else if metric == FORCED_ROUTE_METRIC {
            changes.push((connection, DEFAULT_ROUTE_METRIC));
        }
    }
    Some(changes)
}

/// UUID from "Device 'wlan0' successfully activated with '<uuid>'."
pub fn parse_activated_uuid(stdout: &str) -> Option<String> {
    let (_, rest) = stdout.split_once("successfully activated with '")?;
    let (uuid, _) = rest.split_once('\'')?;
    (!uuid.is_empty()).then(|| uuid.to_string())
}

/// UUID from "Connection 'name' (<uuid>) successfully added."
pub fn parse_added_uuid(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|l| l.contains("successfully added"))?;
    let (_, rest) = line.rsplit_once('(')?;
    let (uuid, _) = rest.split_once(')')?;
    (!uuid.is_empty()).then(|| uuid.to_string())
}

/// Converts NetworkManager's signal quality (0-100) back to dBm; NM derives
/// the quality as `2 * (dBm + 100)`.
pub fn quality_to_dbm(quality: u8) -> i32 {
    i32::from(quality.min(100)) / 2 - 100
}

/// In-use access point from
/// `nmcli -t -f IN-USE,SSID,BSSID,SIGNAL,FREQ device wifi list`.
pub fn parse_wifi_list(stdout: &str) -> Option<WifiInfo> {
    stdout.lines().find_map(|line| {
        let fields = split_terse(line);
        if fields.len() < 5 || fields[0] != "*" {
            return None;
        }
        Some(WifiInfo {
            ssid: fields[1].clone(),
            bssid: (!fields[2].is_empty()).then(|| fields[2].to_uppercase()),
            rssi: fields[3].parse().ok().map(quality_to_dbm),
            frequency: fields[4]
                .split_whitespace()
                .next()
                .and_then(|mhz| mhz.parse().ok()),
            ip: None,
        })
    })
}

/// Maps a NetworkManager device state (NMDeviceState) to the closest
/// supplicant phase.
pub fn supplicant_from_device_state(code: u32) -> SupplicantState {
    match code {
        10 | 20 => SupplicantState::Inactive,
        30 => SupplicantState::Disconnected,
        40 => SupplicantState::Scanning,
        50 => SupplicantState::Associating,
        60 => SupplicantState::Authenticating,
        70 | 80 | 90 => SupplicantState::Associated,
        100 => SupplicantState::Completed,
        110 | 120 => SupplicantState::Disconnected,
        _ => SupplicantState::Unknown,
    }
}

pub struct NmcliPlatform {
    interface: String,
    requests: Mutex<HashMap<RequestId, Arc<AtomicBool>>>,
    next_request: AtomicU64,
    /// UUIDs of profiles this process created by joining.
    created: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NmcliPlatform {
    /// `interface` is the Wi-Fi device used for joins and state reads.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            requests: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            created: Mutex::new(HashSet::new()),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Device whose connection currently carries the forced route metric.
    pub fn bound_device(&self) -> Result<Option<String>, WifiIotError> {
        Ok(forced_connections()?
            .into_iter()
            .find_map(|connection| connection.device))
    }

    fn apply_binding(&self, network: Option<&NetworkHandle>) -> Result<bool, WifiIotError> {
        let active = list_connections(true)?;
        let metrics = active
            .iter()
            .map(|c| route_metric(&c.uuid))
            .collect::<Result<Vec<_>, _>>()?;

        let Some(changes) = route_changes(&active, &metrics, network.map(NetworkHandle::as_str))
        else {
            debug!(network = ?network, "no active connection on device");
            return Ok(false);
        };
        for (connection, metric) in changes {
            set_route_metric(connection, metric)?;
            debug!(connection = %connection.name, metric, "route metric changed");
        }
        Ok(true)
    }

    fn wifi_profile_uuids(&self) -> Result<HashSet<String>, WifiIotError> {
        Ok(list_connections(false)?
            .into_iter()
            .filter(|c| c.kind == WIFI_CONNECTION_TYPE)
            .map(|c| c.uuid)
            .collect())
    }
}

fn connect_error(err: WifiIotError) -> PlatformError {
    match err {
        WifiIotError::NmcliExecution(msg) => PlatformError::from(WifiIotError::ConnectionFailed(msg)),
        other => PlatformError::from(other),
    }
}

impl ConnectivityService for NmcliPlatform {
    fn list_networks(&self) -> Result<Vec<NetworkHandle>, PlatformError> {
        Ok(list_devices()?
            .into_iter()
            .filter(|d| d.transport() != TransportKind::None)
            .map(|d| NetworkHandle::new(d.name))
            .collect())
    }

    fn capabilities_of(&self, network: &NetworkHandle) -> Option<NetworkCapabilities> {
        match list_devices() {
            Ok(devices) => devices
                .iter()
                .find(|d| d.name == network.as_str())
                .map(DeviceEntry::capabilities),
            Err(e) => {
                warn!(%network, error = %e, "failed to read device capabilities");
                None
            }
        }
    }

    fn bind_process_to(&self, network: Option<&NetworkHandle>) -> bool {
        match self.apply_binding(network) {
            Ok(bound) => bound,
            Err(e) => {
                warn!(network = ?network, error = %e, "failed to change default route");
                false
            }
        }
    }

    fn request_network(
        &self,
        criteria: NetworkCriteria,
        events: UnboundedSender<NetworkEvent>,
    ) -> Result<RequestId, PlatformError> {
        let request = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        let cancelled = Arc::new(AtomicBool::new(false));
        lock(&self.requests).insert(request, cancelled.clone());

        thread::Builder::new()
            .name(format!("nmcli-{}", request))
            .spawn(move || watch_for_network(criteria, events, cancelled))
            .map_err(|e| {
                lock(&self.requests).remove(&request);
                PlatformError::Rejected(e.to_string())
            })?;

        debug!(%request, "nmcli network request registered");
        Ok(request)
    }

    fn unregister_request(&self, request: RequestId) {
        if let Some(cancelled) = lock(&self.requests).remove(&request) {
            cancelled.store(true, Ordering::Release);
        }
    }
}

fn watch_for_network(
    criteria: NetworkCriteria,
    events: UnboundedSender<NetworkEvent>,
    cancelled: Arc<AtomicBool>,
) {
    while !cancelled.load(Ordering::Acquire) {
        match list_devices() {
            Ok(devices) => {
                let found = devices
                    .iter()
                    .find(|d| d.is_connected() && criteria.matches(&d.capabilities()));
                if let Some(device) = found {
                    let _ = events.send(NetworkEvent::Available(NetworkHandle::new(
                        device.name.as_str(),
                    )));
                    return;
                }
            }
            Err(e) => warn!(error = %e, "device poll failed"),
        }
        if events.is_closed() {
            return;
        }
        thread::sleep(REQUEST_POLL_INTERVAL);
    }
}

impl ConnectionStateReader for NmcliPlatform {
    fn current_connection_state(&self) -> Result<ConnectionState, PlatformError> {
        let details = device_details(&self.interface)?;
        Ok(details.connection_state())
    }
}

impl LegacyConnector for NmcliPlatform {
    fn issue_connect(&self, request: &JoinRequest) -> Result<NetworkId, PlatformError> {
        if request.security == Security::Wep {
            return Err(PlatformError::Unsupported(
                "WEP is not supported by NetworkManager wifi connect".to_string(),
            ));
        }

        let known = self.wifi_profile_uuids()?;

        let mut args = vec!["device", "wifi", "connect", request.ssid.as_str()];
        if let Some(password) = request.password.as_deref() {
            args.extend(["password", password]);
        }
        if let Some(bssid) = request.bssid.as_deref() {
            args.extend(["bssid", bssid]);
        }
        if request.hidden {
            args.extend(["hidden", "yes"]);
        }
        args.extend(["ifname", self.interface.as_str()]);

        let stdout = run_nmcli(&args).map_err(connect_error)?;

        // NetworkManager may reuse a profile under any name, so follow the
        // UUID it activated rather than the SSID.
        let uuid = match parse_activated_uuid(&stdout) {
            Some(uuid) => uuid,
            None => device_details(&self.interface)?
                .connection_uuid
                .ok_or_else(|| {
                    WifiIotError::NmcliParse(format!(
                        "no active connection on {} after connect",
                        self.interface
                    ))
                })?,
        };
        if !known.contains(&uuid) {
            lock(&self.created).insert(uuid.clone());
        }
        debug!(ssid = %request.ssid, %uuid, "connect issued");
        Ok(NetworkId::new(uuid))
    }

    fn disconnect(&self) -> Result<bool, PlatformError> {
        run_nmcli(&["device", "disconnect", self.interface.as_str()])?;
        Ok(true)
    }
}

impl ProfileStore for NmcliPlatform {
    fn register_network(&self, request: &JoinRequest) -> Result<NetworkId, PlatformError> {
        let mut args = vec![
            "connection",
            "add",
            "type",
            "wifi",
            "ifname",
            self.interface.as_str(),
            "con-name",
            request.ssid.as_str(),
            "ssid",
            request.ssid.as_str(),
        ];
        match (request.security, request.password.as_deref()) {
            (Security::Wep, _) => {
                return Err(PlatformError::Unsupported(
                    "WEP profiles are not supported".to_string(),
                ));
            }
            (Security::Wpa, Some(password)) => {
                args.extend(["wifi-sec.key-mgmt", "wpa-psk", "wifi-sec.psk", password]);
            }
            (Security::Wpa, None) => {
                return Err(PlatformError::Rejected("WPA needs a password".to_string()));
            }
            (Security::None, _) => {}
        }
        if let Some(bssid) = request.bssid.as_deref() {
            args.extend(["802-11-wireless.bssid", bssid]);
        }
        if request.hidden {
            args.extend(["802-11-wireless.hidden", "yes"]);
        }

        let stdout = run_nmcli(&args)?;
        let uuid = parse_added_uuid(&stdout).ok_or_else(|| {
            WifiIotError::NmcliParse(format!("no UUID in '{}'", stdout.trim()))
        })?;
        Ok(NetworkId::new(uuid))
    }

    fn remove_networks(&self, ssid_prefix: &str) -> Result<usize, PlatformError> {
        let mut removed = 0;
        for profile in list_connections(false)? {
            if profile.kind != WIFI_CONNECTION_TYPE {
                continue;
            }
            let ssid = connection_setting(&profile.uuid, "802-11-wireless.ssid")?;
            if ssid.starts_with(ssid_prefix) {
                run_nmcli(&["connection", "delete", "uuid", profile.uuid.as_str()])?;
                lock(&self.created).remove(&profile.uuid);
                debug!(profile = %profile.name, %ssid, "deleted profile");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove_profile(&self, id: &NetworkId) -> Result<bool, PlatformError> {
        if !lock(&self.created).remove(id.as_str()) {
            debug!(network_id = %id, "profile predates this process, keeping it");
            return Ok(false);
        }
        run_nmcli(&["connection", "delete", "uuid", id.as_str()])?;
        Ok(true)
    }
}

impl WifiInfoReader for NmcliPlatform {
    fn wifi_info(&self) -> Result<Option<WifiInfo>, PlatformError> {
        let stdout = run_nmcli(&[
            "-t",
            "-f",
            "IN-USE,SSID,BSSID,SIGNAL,FREQ",
            "device",
            "wifi",
            "list",
            "ifname",
            self.interface.as_str(),
            "--rescan",
            "no",
        ])?;
        let Some(mut info) = parse_wifi_list(&stdout) else {
            return Ok(None);
        };
        info.ip = device_details(&self.interface)?
            .ip_address
            .map(|cidr| cidr.split('/').next().unwrap_or_default().to_string());
        Ok(Some(info))
    }
}
