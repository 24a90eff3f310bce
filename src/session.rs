//! Connectivity session.
//!
//! Owns the remembered network and the currently bound network for one
//! platform, and serializes the operations that change them (acquire, join,
//! disconnect). Several sessions may coexist, e.g. one per test.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as OpLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify;
use crate::config::{RememberedPolicy, SettleSettings};
use crate::error::{PlatformError, WifiIotError};
use crate::network::{NetworkHandle, NetworkId, TransportKind, WifiInfo};
use crate::platform::{
    ConnectivityService, JoinRequest, LegacyConnector, Platform, ProfileStore, WifiInfoReader,
};
use crate::settle::{self, SettleOutcome};

pub struct ConnectivitySession {
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) policy: RememberedPolicy,
    remembered: Mutex<Option<NetworkHandle>>,
    bound: Mutex<Option<NetworkHandle>>,
    /// Profiles created by `join_once` joins, removed on release.
    join_once: Mutex<Vec<NetworkId>>,
    pub(crate) ops: OpLock<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectivitySession {
    pub fn new(platform: Arc<dyn Platform>, policy: RememberedPolicy) -> Self {
        Self {
            platform,
            policy,
            remembered: Mutex::new(None),
            bound: Mutex::new(None),
            join_once: Mutex::new(Vec::new()),
            ops: OpLock::new(()),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn policy(&self) -> RememberedPolicy {
        self.policy
    }

    pub fn remembered(&self) -> Option<NetworkHandle> {
        lock(&self.remembered).clone()
    }

    pub fn remember(&self, network: NetworkHandle) {
        debug!(%network, "remembering joined network");
        *lock(&self.remembered) = Some(network);
    }

    pub fn forget(&self) {
        if let Some(network) = lock(&self.remembered).take() {
            debug!(%network, "forgot remembered network");
        }
    }

    /// Network the process is currently bound to, if the last accepted bind
    /// named one.
    pub fn bound_network(&self) -> Option<NetworkHandle> {
        lock(&self.bound).clone()
    }

    /// Directs process traffic through `network`, or clears the direction
    /// with `None`. Returns whether the platform accepted the request.
    pub fn bind(&self, network: Option<&NetworkHandle>) -> bool {
        let mut bound = lock(&self.bound);
        let accepted = self.platform.bind_process_to(network);
        if accepted {
            *bound = network.cloned();
        }
        match network {
            Some(network) => debug!(%network, accepted, "bind process to network"),
            None => debug!(accepted, "clear process binding"),
        }
        accepted
    }

    /// Stops forcing traffic over Wi-Fi.
    pub fn disable_forced_usage(&self) -> bool {
        self.bind(None)
    }

    /// First connected Wi-Fi network in the live enumeration.
    pub fn find_connected_wifi(&self) -> Option<NetworkHandle> {
        classify::find_live(self.platform.as_ref(), TransportKind::Wifi, true)
    }

    /// True when any enumerated network uses Wi-Fi transport.
    pub fn is_wifi_connected(&self) -> bool {
        classify::find_live(self.platform.as_ref(), TransportKind::Wifi, false).is_some()
    }

    /// Current Wi-Fi association details. Read failures are logged and
    /// reported as no association.
    pub fn wifi_info(&self) -> Option<WifiInfo> {
        match self.platform.wifi_info() {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "failed to read Wi-Fi info");
                None
            }
        }
    }

    /// Issues a legacy connect and waits for the supplicant to settle. On a
    /// matching completed connection the connected Wi-Fi network becomes the
    /// remembered network.
    ///
    /// A `join_once` request's profile is removed right away when the join
    /// does not connect, otherwise on [`disconnect`](Self::disconnect) or
    /// [`release_join_once`](Self::release_join_once).
    pub async fn join(
        &self,
        request: JoinRequest,
        settings: SettleSettings,
        cancel: CancellationToken,
    ) -> Result<SettleOutcome, WifiIotError> {
        let _op = self.ops.lock().await;
        info!(
            ssid = %request.ssid,
            security = %request.security,
            bssid = ?request.bssid,
            hidden = request.hidden,
            join_once = request.join_once,
            "joining network"
        );

        let join_once = request.join_once;
        let platform = Arc::clone(&self.platform);
        let target = tokio::task::spawn_blocking(move || platform.issue_connect(&request))
            .await
            .map_err(|e| WifiIotError::Worker(e.to_string()))??;

        let outcome = settle::spawn_settle(
            Arc::clone(&self.platform),
            target.clone(),
            settings,
            cancel,
        )
        .await
        .map_err(|e| WifiIotError::Worker(e.to_string()))?;

        if outcome.connected() {
            match self.find_connected_wifi() {
                Some(network) => self.remember(network),
                None => warn!("join settled but no connected Wi-Fi network is enumerated"),
            }
            if join_once {
                lock(&self.join_once).push(target);
            }
        } else if join_once {
            self.remove_profiles(vec![target]).await;
        }
        info!(?outcome, "join finished");
        Ok(outcome)
    }

    /// Disconnects the current Wi-Fi network, forgets the remembered one and
    /// removes profiles of `join_once` joins.
    pub async fn disconnect(&self) -> Result<bool, WifiIotError> {
        let _op = self.ops.lock().await;

        let platform = Arc::clone(&self.platform);
        let disconnected: Result<bool, PlatformError> =
            tokio::task::spawn_blocking(move || platform.disconnect())
                .await
                .map_err(|e| WifiIotError::Worker(e.to_string()))?;
        let disconnected = disconnected?;

        self.forget();
        let profiles = std::mem::take(&mut *lock(&self.join_once));
        self.remove_profiles(profiles).await;
        info!(disconnected, "disconnect finished");
        Ok(disconnected)
    }

    /// Removes profiles left by `join_once` joins. Called on shutdown.
    pub async fn release_join_once(&self) {
        let _op = self.ops.lock().await;
        let profiles = std::mem::take(&mut *lock(&self.join_once));
        self.remove_profiles(profiles).await;
    }

    async fn remove_profiles(&self, profiles: Vec<NetworkId>) {
        if profiles.is_empty() {
            return;
        }
        let platform = Arc::clone(&self.platform);
        let removed = tokio::task::spawn_blocking(move || {
            profiles
                .iter()
                .map(|id| (id.clone(), platform.remove_profile(id)))
                .collect::<Vec<_>>()
        })
        .await;

        match removed {
            Ok(results) => {
                for (id, result) in results {
                    match result {
                        Ok(removed) => debug!(network_id = %id, removed, "join-once profile released"),
                        Err(e) => warn!(network_id = %id, error = %e, "failed to remove join-once profile"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "join-once cleanup worker failed"),
        }
    }

    /// Saves a profile with the platform without connecting.
    pub async fn register_network(&self, request: JoinRequest) -> Result<NetworkId, WifiIotError> {
        let platform = Arc::clone(&self.platform);
        let id = tokio::task::spawn_blocking(move || platform.register_network(&request))
            .await
            .map_err(|e| WifiIotError::Worker(e.to_string()))??;
        info!(network_id = %id, "network registered");
        Ok(id)
    }

    /// Deletes the platform's saved profiles whose SSID starts with `prefix`.
    pub async fn remove_networks(&self, prefix: &str) -> Result<usize, WifiIotError> {
        let platform = Arc::clone(&self.platform);
        let prefix = prefix.to_string();
        let removed = tokio::task::spawn_blocking(move || platform.remove_networks(&prefix))
            .await
            .map_err(|e| WifiIotError::Worker(e.to_string()))??;
        info!(removed, "saved profiles removed");
        Ok(removed)
    }
}
