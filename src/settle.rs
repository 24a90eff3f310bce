//! Connection settle poller.
//!
//! After a legacy connect command the supplicant walks through scanning,
//! authentication and association before it reports `Completed`. The poller
//! samples the connection state at a fixed interval until it sees a
//! completed connection, runs out of attempts, or is cancelled. Transient
//! authentication failures are not distinguished from "no signal yet"; both
//! simply keep polling.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SettleSettings;
use crate::network::NetworkId;
use crate::platform::ConnectionStateReader;

/// How a settle loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Completed on the requested network.
    Connected { attempts: u32 },
    /// Completed, but on a different network.
    WrongNetwork { actual: NetworkId, attempts: u32 },
    /// No completed state within the attempt budget.
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl SettleOutcome {
    /// Legacy boolean view: only `Connected` counts.
    pub fn connected(&self) -> bool {
        matches!(self, SettleOutcome::Connected { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SettleOutcome::Connected { attempts }
            | SettleOutcome::WrongNetwork { attempts, .. }
            | SettleOutcome::Exhausted { attempts }
            | SettleOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

pub async fn settle<R>(
    reader: &R,
    target: &NetworkId,
    max_attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> SettleOutcome
where
    R: ConnectionStateReader + ?Sized,
{
    for attempt in 1..=max_attempts {
        match reader.current_connection_state() {
            Ok(state) => {
                debug!(
                    attempt,
                    network_id = ?state.network_id,
                    supplicant = %state.supplicant,
                    "polled connection state"
                );
                if state.is_terminal() {
                    return match state.network_id {
                        Some(actual) if actual == *target => {
                            SettleOutcome::Connected { attempts: attempt }
                        }
                        Some(actual) => SettleOutcome::WrongNetwork {
                            actual,
                            attempts: attempt,
                        },
                        None => SettleOutcome::Exhausted { attempts: attempt },
                    };
                }
            }
            Err(e) => warn!(attempt, error = %e, "failed to read connection state"),
        }

        if attempt == max_attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(attempt, "settle cancelled");
                return SettleOutcome::Cancelled { attempts: attempt };
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(max_attempts, %target, "settle exhausted");
    SettleOutcome::Exhausted {
        attempts: max_attempts,
    }
}

/// Runs [`settle`] on its own task so the caller is never blocked.
pub fn spawn_settle<R>(
    reader: Arc<R>,
    target: NetworkId,
    settings: SettleSettings,
    cancel: CancellationToken,
) -> JoinHandle<SettleOutcome>
where
    R: ConnectionStateReader + ?Sized + 'static,
{
    tokio::spawn(async move {
        settle(
            reader.as_ref(),
            &target,
            settings.max_attempts,
            settings.interval(),
            &cancel,
        )
        .await
    })
}
