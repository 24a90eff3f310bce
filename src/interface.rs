use anyhow::Result;

use crate::error::WifiIotError;
use crate::nmcli;
use crate::network::TransportKind;

#[derive(Debug, Clone)]
pub struct WifiInterface {
    pub name: String,
    pub state: String,
}

/// List all WiFi interfaces on the system
pub fn list_wifi_interfaces() -> Result<Vec<WifiInterface>> {
    let interfaces = nmcli::list_devices()?
        .into_iter()
        .filter(|d| d.transport() == TransportKind::Wifi)
        .map(|d| WifiInterface {
            name: d.name,
            state: d.state,
        })
        .collect();

    Ok(interfaces)
}

/// Find the first WiFi interface
pub fn first_wifi_interface() -> Result<WifiInterface> {
    let interfaces = list_wifi_interfaces()?;

    interfaces
        .into_iter()
        .next()
        .ok_or_else(|| WifiIotError::NoWifiInterfaceFound.into())
}

/// Get a specific interface by name, verifying it's a WiFi interface
pub fn get_interface(name: &str) -> Result<WifiInterface> {
    let interfaces = list_wifi_interfaces()?;

    interfaces
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| WifiIotError::InterfaceNotFound(name.to_string()).into())
}

/// Resolve interface: use provided name, then the configured default, then
/// the first WiFi interface found
pub fn resolve_interface(interface: Option<&str>, default: Option<&str>) -> Result<WifiInterface> {
    match interface.or(default) {
        Some(name) => get_interface(name),
        None => first_wifi_interface(),
    }
}
