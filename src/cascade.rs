//! Acquisition cascade: find a Wi-Fi network and bind process traffic to it.
//!
//! Strategies run strictly in order and each runs only when the previous one
//! produced nothing:
//!
//! 1. the remembered network (subject to [`RememberedPolicy`]),
//! 2. the first connected Wi-Fi network in the live enumeration,
//! 3. an asynchronous request for unrestricted Wi-Fi raced against a
//!    countdown, with one more classification pass if the request reports
//!    unavailable or the countdown expires first.
//!
//! In strategy 3 the countdown task and the event pump race through
//! [`Completion`]; whichever fires first decides the outcome and the loser is
//! aborted. Signals that arrive afterwards are dropped. The request is
//! deregistered exactly once, also when the caller drops the future.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::RememberedPolicy;
use crate::network::{AcquisitionResult, NetworkCriteria, NetworkHandle, TransportKind};
use crate::platform::{ConnectivityService, NetworkEvent, Platform, RequestId};
use crate::session::ConnectivitySession;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Single-fire completion shared by several signal sources.
pub(crate) struct Completion<T> {
    fired: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            fired: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        };
        (completion, rx)
    }

    /// Delivers `value` if nothing has been delivered yet. Returns whether
    /// this call won.
    pub(crate) fn try_fire(&self, value: T) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(value);
        }
        true
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// First terminal signal of a network request.
#[derive(Debug)]
enum Signal {
    Available(NetworkHandle),
    Unavailable,
    Timeout,
}

/// Acquisition outcome together with whether the platform accepted the bind
/// made for it. `bound` is false whenever `result` is not a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub result: AcquisitionResult,
    pub bound: bool,
}

impl Acquisition {
    fn unbound(result: AcquisitionResult) -> Self {
        Self {
            result,
            bound: false,
        }
    }
}

/// A registered network request and the tasks racing on it. Dropping it
/// aborts the tasks and deregisters the request, so a dropped `acquire`
/// future leaves nothing behind.
struct PendingRequest<'a> {
    platform: &'a dyn Platform,
    request: Option<RequestId>,
    tasks: Vec<AbortHandle>,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(request) = self.request.take() {
            self.platform.unregister_request(request);
            debug!(%request, "network request deregistered");
        }
    }
}

impl ConnectivitySession {
    /// Obtains a Wi-Fi network and binds process traffic to it.
    ///
    /// Always resolves to exactly one [`AcquisitionResult`]; platform errors
    /// during request registration surface as `Failed`.
    pub async fn acquire(&self, timeout: Duration) -> AcquisitionResult {
        self.acquire_detailed(timeout).await.result
    }

    /// Like [`acquire`](Self::acquire), but also reports whether the final
    /// bind was accepted.
    pub async fn acquire_detailed(&self, timeout: Duration) -> Acquisition {
        let _op = self.ops.lock().await;

        if let Some(network) = self.remembered_candidate() {
            return self.bind_acquired(network, "remembered");
        }

        if let Some(network) = self.find_connected_wifi() {
            return self.bind_acquired(network, "current Wi-Fi");
        }

        self.request_with_timeout(timeout).await
    }

    fn bind_acquired(&self, network: NetworkHandle, source: &'static str) -> Acquisition {
        let bound = self.bind(Some(&network));
        info!(%network, bound, source, "network acquired");
        Acquisition {
            result: AcquisitionResult::Success(network),
            bound,
        }
    }

    fn remembered_candidate(&self) -> Option<NetworkHandle> {
        let network = self.remembered()?;
        match self.policy {
            RememberedPolicy::Trust => Some(network),
            RememberedPolicy::Revalidate => {
                let still_wifi = self
                    .platform
                    .capabilities_of(&network)
                    .is_some_and(|caps| caps.transport == TransportKind::Wifi);
                if still_wifi {
                    Some(network)
                } else {
                    warn!(%network, "remembered network is stale, forgetting it");
                    self.forget();
                    None
                }
            }
        }
    }

    async fn request_with_timeout(&self, timeout: Duration) -> Acquisition {
        let (completion, outcome) = Completion::<Signal>::new();
        let completion = Arc::new(completion);
        let mut pending = PendingRequest {
            platform: self.platform.as_ref(),
            request: None,
            tasks: Vec::with_capacity(2),
        };

        let countdown = {
            let completion = completion.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                completion.try_fire(Signal::Timeout);
            })
        };
        pending.tasks.push(countdown.abort_handle());

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let request = match self
            .platform
            .request_network(NetworkCriteria::unrestricted_wifi(), events_tx)
        {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "failed to request network");
                return Acquisition::unbound(AcquisitionResult::Failed(e.to_string()));
            }
        };
        pending.request = Some(request);
        debug!(%request, timeout_ms = timeout.as_millis() as u64, "network request registered");

        let pump = {
            let completion = completion.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    let won = match event {
                        NetworkEvent::Available(network) => {
                            completion.try_fire(Signal::Available(network))
                        }
                        NetworkEvent::Unavailable => completion.try_fire(Signal::Unavailable),
                        NetworkEvent::Lost(network) => {
                            debug!(%network, "network lost before acquisition completed");
                            false
                        }
                    };
                    if won || completion.has_fired() {
                        break;
                    }
                }
            })
        };
        pending.tasks.push(pump.abort_handle());

        let signal = outcome.await.unwrap_or(Signal::Timeout);
        drop(pending);
        debug!(%request, ?signal, "network request finished");

        match signal {
            Signal::Available(network) => self.bind_acquired(network, "network request"),
            Signal::Unavailable => {
                warn!("network request unavailable, trying current Wi-Fi network");
                self.fallback_or(AcquisitionResult::Unavailable)
            }
            Signal::Timeout => {
                warn!("network request timed out, trying current Wi-Fi network");
                self.fallback_or(AcquisitionResult::TimedOut)
            }
        }
    }

    fn fallback_or(&self, otherwise: AcquisitionResult) -> Acquisition {
        match self.find_connected_wifi() {
            Some(network) => self.bind_acquired(network, "fallback"),
            None => Acquisition::unbound(otherwise),
        }
    }
}
