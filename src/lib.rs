//! Wi-Fi network acquisition for IoT device links
//!
//! This library finds a Wi-Fi network, binds the process's outbound traffic
//! to it, and waits for legacy joins to settle. It is meant for apps that
//! talk to a device over an access point without internet access, where the
//! system would otherwise route traffic over another network.
//!
//! # Modules
//!
//! - [`network`] - Handles, capability snapshots, connection states, results
//! - [`platform`] - Traits for the host networking stack
//! - [`classify`] - Picks the first network matching a transport requirement
//! - [`session`] - Remembered/bound network state, bind, join and disconnect
//! - [`cascade`] - The acquisition cascade (`ConnectivitySession::acquire`)
//! - [`settle`] - Polls the supplicant until a join completes
//! - [`nmcli`] - Linux platform backed by NetworkManager
//! - [`interface`] - WiFi interface discovery
//! - [`sim`] - Scriptable platform for tests and dry runs
//! - [`bridge`] - Named method-call dispatcher
//! - [`server`] - HTTP surface for the bridge
//! - [`config`] - Configuration file and saved networks
//! - [`error`] - Error types
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wifi_iot::{ConnectivitySession, NmcliPlatform, RememberedPolicy, cascade};
//!
//! # async fn run() {
//! let platform = Arc::new(NmcliPlatform::new("wlan1"));
//! let session = ConnectivitySession::new(platform, RememberedPolicy::Trust);
//!
//! let result = session.acquire(cascade::DEFAULT_TIMEOUT).await;
//! println!("Acquisition: {}", result);
//!
//! session.disable_forced_usage();
//! # }
//! ```

pub mod bridge;
pub mod cascade;
pub mod classify;

/// Configuration module for saved networks and cascade/settle tunables.
/// Handles reading/writing TOML config files.
pub mod config;

pub mod error;
pub mod interface;
pub mod network;
pub mod nmcli;
pub mod platform;
pub mod server;
pub mod session;
pub mod settle;
pub mod sim;

pub use classify::classify;
pub use config::{Config, RememberedPolicy};
pub use error::{PlatformError, WifiIotError};
pub use network::{
    AcquisitionResult, ConnectionState, NetworkCapabilities, NetworkHandle, NetworkId,
    SupplicantState, TransportKind, WifiInfo,
};
pub use cascade::Acquisition;
pub use nmcli::NmcliPlatform;
pub use platform::{JoinRequest, Platform, ProfileStore, Security, WifiInfoReader};
pub use session::ConnectivitySession;
pub use settle::{SettleOutcome, settle};
pub use sim::SimulatedPlatform;
