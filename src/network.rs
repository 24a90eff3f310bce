//! Network data model shared by the classifier, the acquisition cascade and
//! the settle poller.
//!
//! Handles and identifiers are owned by the platform; this crate only stores
//! and compares them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a network path known to the platform.
///
/// On Linux this is the NetworkManager device name (e.g. "wlan0"); in the
/// simulator it is whatever the scenario names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkHandle(String);

impl NetworkHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Category of the link layer underneath a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Wifi,
    Cellular,
    Ethernet,
    Other,
    None,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Wifi => "wifi",
            TransportKind::Cellular => "cellular",
            TransportKind::Ethernet => "ethernet",
            TransportKind::Other => "other",
            TransportKind::None => "none",
        };
        f.write_str(name)
    }
}

/// Read-only capability snapshot of a network. May be stale by the time it
/// is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCapabilities {
    pub transport: TransportKind,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub connected: bool,
}

impl NetworkCapabilities {
    pub fn wifi(connected: bool) -> Self {
        Self {
            transport: TransportKind::Wifi,
            restricted: false,
            connected,
        }
    }

    pub fn cellular(connected: bool) -> Self {
        Self {
            transport: TransportKind::Cellular,
            restricted: false,
            connected,
        }
    }
}

/// Requirements of an asynchronous network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCriteria {
    pub transport: TransportKind,
    pub require_unrestricted: bool,
}

impl NetworkCriteria {
    /// Wi-Fi transport with the "not restricted" capability.
    pub fn unrestricted_wifi() -> Self {
        Self {
            transport: TransportKind::Wifi,
            require_unrestricted: true,
        }
    }

    pub fn matches(&self, caps: &NetworkCapabilities) -> bool {
        caps.transport == self.transport && !(self.require_unrestricted && caps.restricted)
    }
}

/// Identifier of a configured/joined network as reported by the legacy
/// connection-state reader. The platform's "no network" sentinel is modelled
/// as an absent `NetworkId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phase of the 802.11 association/authentication state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplicantState {
    Disconnected,
    Inactive,
    Scanning,
    Authenticating,
    Associating,
    Associated,
    FourWayHandshake,
    GroupHandshake,
    Completed,
    Unknown,
}

impl fmt::Display for SupplicantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplicantState::Disconnected => write!(f, "DISCONNECTED"),
            SupplicantState::Inactive => write!(f, "INACTIVE"),
            SupplicantState::Scanning => write!(f, "SCANNING"),
            SupplicantState::Authenticating => write!(f, "AUTHENTICATING"),
            SupplicantState::Associating => write!(f, "ASSOCIATING"),
            SupplicantState::Associated => write!(f, "ASSOCIATED"),
            SupplicantState::FourWayHandshake => write!(f, "4WAY_HANDSHAKE"),
            SupplicantState::GroupHandshake => write!(f, "GROUP_HANDSHAKE"),
            SupplicantState::Completed => write!(f, "COMPLETED"),
            SupplicantState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Snapshot returned by the legacy connection-state reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    #[serde(default)]
    pub network_id: Option<NetworkId>,
    pub supplicant: SupplicantState,
}

impl ConnectionState {
    pub fn disconnected() -> Self {
        Self {
            network_id: None,
            supplicant: SupplicantState::Disconnected,
        }
    }

    /// A valid network id together with the `Completed` supplicant state.
    pub fn is_terminal(&self) -> bool {
        self.network_id.is_some() && self.supplicant == SupplicantState::Completed
    }
}

/// Current Wi-Fi association as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiInfo {
    pub ssid: String,
    #[serde(default)]
    pub bssid: Option<String>,
    /// Received signal strength in dBm.
    #[serde(default)]
    pub rssi: Option<i32>,
    /// Channel frequency in MHz.
    #[serde(default)]
    pub frequency: Option<u32>,
    /// IPv4 address without prefix length.
    #[serde(default)]
    pub ip: Option<String>,
}

/// Outcome of one acquisition cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AcquisitionResult {
    Success(NetworkHandle),
    Unavailable,
    TimedOut,
    Failed(String),
}

impl AcquisitionResult {
    pub fn network(&self) -> Option<&NetworkHandle> {
        match self {
            AcquisitionResult::Success(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AcquisitionResult::Success(_))
    }
}

impl fmt::Display for AcquisitionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionResult::Success(handle) => write!(f, "success ({})", handle),
            AcquisitionResult::Unavailable => write!(f, "unavailable"),
            AcquisitionResult::TimedOut => write!(f, "timed out"),
            AcquisitionResult::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
