//! Platform collaborators consumed by the core.
//!
//! The traits are synchronous and object safe so that a session can hold an
//! `Arc<dyn Platform>` chosen at runtime (nmcli on Linux, the simulator in
//! tests). Asynchronous network requests report back through an unbounded
//! channel instead of callbacks.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::PlatformError;
use crate::network::{
    ConnectionState, NetworkCapabilities, NetworkCriteria, NetworkHandle, NetworkId, WifiInfo,
};

/// Identifies one registered network request for later deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// Signals delivered for a registered network request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Available(NetworkHandle),
    Unavailable,
    Lost(NetworkHandle),
}

pub trait ConnectivityService: Send + Sync {
    /// Every network currently known to the platform, in enumeration order.
    fn list_networks(&self) -> Result<Vec<NetworkHandle>, PlatformError>;

    /// `None` when the platform has no snapshot for the handle.
    fn capabilities_of(&self, network: &NetworkHandle) -> Option<NetworkCapabilities>;

    /// Route process traffic through `network`, or restore default routing.
    fn bind_process_to(&self, network: Option<&NetworkHandle>) -> bool;

    /// Register an asynchronous request. Events for it are sent on `events`
    /// until it is deregistered.
    fn request_network(
        &self,
        criteria: NetworkCriteria,
        events: UnboundedSender<NetworkEvent>,
    ) -> Result<RequestId, PlatformError>;

    fn unregister_request(&self, request: RequestId);
}

pub trait ConnectionStateReader: Send + Sync {
    fn current_connection_state(&self) -> Result<ConnectionState, PlatformError>;
}

/// Security type of a legacy join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Security {
    Wpa,
    Wep,
    #[default]
    None,
}

impl Security {
    /// Parses the bridge's security string; absent means open.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(|s| s.to_uppercase()).as_deref() {
            None | Some("NONE") => Some(Security::None),
            Some("WPA") => Some(Security::Wpa),
            Some("WEP") => Some(Security::Wep),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Security::Wpa => write!(f, "WPA"),
            Security::Wep => write!(f, "WEP"),
            Security::None => write!(f, "NONE"),
        }
    }
}

/// Normalizes a BSSID to upper-case `AA:BB:CC:DD:EE:FF`, or `None` when it
/// is not six colon-separated hex octets.
pub fn parse_bssid(value: &str) -> Option<String> {
    let octets: Vec<&str> = value.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    valid.then(|| value.to_uppercase())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinRequest {
    pub ssid: String,
    pub password: Option<String>,
    pub security: Security,
    /// Pin the join to one access point.
    pub bssid: Option<String>,
    pub hidden: bool,
    /// Drop the profile created for this join once the session lets go of
    /// it (disconnect, failed join or shutdown).
    pub join_once: bool,
}

impl JoinRequest {
    pub fn new(ssid: impl Into<String>, password: Option<String>, security: Security) -> Self {
        Self {
            ssid: ssid.into(),
            password,
            security,
            ..Self::default()
        }
    }
}

pub trait LegacyConnector: Send + Sync {
    /// Issue the connect command and return the id the settle poller should
    /// wait for. May block.
    fn issue_connect(&self, request: &JoinRequest) -> Result<NetworkId, PlatformError>;

    fn disconnect(&self) -> Result<bool, PlatformError>;
}

/// Saved network profiles on the host.
pub trait ProfileStore: Send + Sync {
    /// Save a profile without connecting to it.
    fn register_network(&self, request: &JoinRequest) -> Result<NetworkId, PlatformError>;

    /// Delete every saved Wi-Fi profile whose SSID starts with `ssid_prefix`.
    /// Returns how many were deleted.
    fn remove_networks(&self, ssid_prefix: &str) -> Result<usize, PlatformError>;

    /// Delete one profile created by a join. Returns false when the profile
    /// is unknown or was not created by this platform.
    fn remove_profile(&self, id: &NetworkId) -> Result<bool, PlatformError>;
}

pub trait WifiInfoReader: Send + Sync {
    /// Details of the current Wi-Fi association, `None` when not associated.
    fn wifi_info(&self) -> Result<Option<WifiInfo>, PlatformError>;
}

/// Everything a connectivity session needs from the host.
pub trait Platform:
    ConnectivityService + ConnectionStateReader + LegacyConnector + ProfileStore + WifiInfoReader
{
}

impl<T> Platform for T where
    T: ConnectivityService + ConnectionStateReader + LegacyConnector + ProfileStore + WifiInfoReader
{
}
