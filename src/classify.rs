//! Network classifier: picks a network by transport from an enumeration.

use tracing::{debug, warn};

use crate::network::{NetworkCapabilities, NetworkHandle, TransportKind};
use crate::platform::ConnectivityService;

/// Returns the first handle, in input order, whose capability snapshot has
/// `transport` and, when `require_connected` is set, is connected.
///
/// `capabilities_of` returning `None` makes a handle non-matching.
pub fn classify<'a, I, F>(
    networks: I,
    transport: TransportKind,
    require_connected: bool,
    capabilities_of: F,
) -> Option<NetworkHandle>
where
    I: IntoIterator<Item = &'a NetworkHandle>,
    F: Fn(&NetworkHandle) -> Option<NetworkCapabilities>,
{
    networks
        .into_iter()
        .find(|network| match capabilities_of(*network) {
            Some(caps) => caps.transport == transport && (!require_connected || caps.connected),
            None => false,
        })
        .cloned()
}

/// Classifies the platform's live enumeration. An enumeration failure is
/// logged and treated as "no networks".
pub fn find_live<S>(
    service: &S,
    transport: TransportKind,
    require_connected: bool,
) -> Option<NetworkHandle>
where
    S: ConnectivityService + ?Sized,
{
    let networks = match service.list_networks() {
        Ok(networks) => networks,
        Err(e) => {
            warn!(error = %e, "network enumeration failed");
            return None;
        }
    };

    let found = classify(&networks, transport, require_connected, |network| {
        service.capabilities_of(network)
    });
    debug!(
        candidates = networks.len(),
        %transport,
        require_connected,
        found = ?found,
        "classified live networks"
    );
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshots(
        entries: &[(&str, Option<NetworkCapabilities>)],
    ) -> (Vec<NetworkHandle>, HashMap<NetworkHandle, NetworkCapabilities>) {
        let handles = entries.iter().map(|(id, _)| NetworkHandle::new(*id)).collect();
        let caps = entries
            .iter()
            .filter_map(|(id, caps)| caps.map(|c| (NetworkHandle::new(*id), c)))
            .collect();
        (handles, caps)
    }

    #[test]
    fn returns_first_connected_wifi_in_input_order() {
        let (handles, caps) = snapshots(&[
            ("h1", Some(NetworkCapabilities::cellular(true))),
            ("h2", Some(NetworkCapabilities::wifi(true))),
            ("h3", Some(NetworkCapabilities::wifi(true))),
        ]);

        let found = classify(&handles, TransportKind::Wifi, true, |h| caps.get(h).copied());
        assert_eq!(found, Some(NetworkHandle::new("h2")));
    }

    #[test]
    fn skips_disconnected_when_connection_required() {
        let (handles, caps) = snapshots(&[
            ("h1", Some(NetworkCapabilities::wifi(false))),
            ("h2", Some(NetworkCapabilities::wifi(true))),
        ]);

        let found = classify(&handles, TransportKind::Wifi, true, |h| caps.get(h).copied());
        assert_eq!(found, Some(NetworkHandle::new("h2")));

        let any = classify(&handles, TransportKind::Wifi, false, |h| caps.get(h).copied());
        assert_eq!(any, Some(NetworkHandle::new("h1")));
    }

    #[test]
    fn missing_snapshots_never_match() {
        let (handles, caps) = snapshots(&[("h1", None), ("h2", None)]);

        let found = classify(&handles, TransportKind::Wifi, false, |h| caps.get(h).copied());
        assert_eq!(found, None);
    }

    #[test]
    fn empty_input_yields_none() {
        let handles: Vec<NetworkHandle> = Vec::new();
        assert_eq!(classify(&handles, TransportKind::Wifi, true, |_| None), None);
    }
}
