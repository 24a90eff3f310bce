use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::Security;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub default_interface: Option<String>,
    #[serde(default)]
    pub remembered_policy: RememberedPolicy,
    #[serde(default)]
    pub cascade: CascadeSettings,
    #[serde(default)]
    pub settle: SettleSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub interface: Option<String>,
}

/// How the cascade treats a remembered network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RememberedPolicy {
    /// Bind the remembered network and report success without checking it.
    #[default]
    Trust,
    /// Only reuse the remembered network while it still reports Wi-Fi
    /// transport; otherwise forget it and continue the cascade.
    Revalidate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CascadeSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl CascadeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettleSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl SettleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Same interval, with enough attempts to cover `deadline` (at least one).
    pub fn within(self, deadline: Duration) -> Self {
        let interval_ms = self.interval_ms.max(1);
        let attempts = (deadline.as_millis() as u64).div_ceil(interval_ms).max(1);
        Self {
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            interval_ms: self.interval_ms,
        }
    }
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    20
}

fn default_interval_ms() -> u64 {
    500
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn find_network(&self, ssid: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.ssid == ssid)
    }

    pub fn add_network(&mut self, network: NetworkConfig) {
        // Remove existing entry with same SSID
        self.networks.retain(|n| n.ssid != network.ssid);
        self.networks.push(network);
    }

    /// Drops saved networks whose SSID starts with `prefix`. Returns how many
    /// were dropped.
    pub fn remove_networks(&mut self, prefix: &str) -> usize {
        let before = self.networks.len();
        self.networks.retain(|n| !n.ssid.starts_with(prefix));
        before - self.networks.len()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("wifi-iot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml")).unwrap();

        assert!(cfg.networks.is_empty());
        assert_eq!(cfg.remembered_policy, RememberedPolicy::Trust);
        assert_eq!(cfg.cascade.timeout_ms, 5000);
        assert_eq!(cfg.settle.max_attempts, 20);
        assert_eq!(cfg.settle.interval_ms, 500);
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "remembered_policy = \"revalidate\"\n[settle]\ninterval_ms = 250\n",
        )
        .unwrap();

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.remembered_policy, RememberedPolicy::Revalidate);
        assert_eq!(cfg.settle.interval_ms, 250);
        assert_eq!(cfg.settle.max_attempts, 20);
        assert_eq!(cfg.cascade.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn saved_networks_survive_reload_and_replace_by_ssid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.add_network(NetworkConfig {
            ssid: "RoboDog-AP".into(),
            password: "old".into(),
            security: Security::Wpa,
            interface: None,
        });
        cfg.add_network(NetworkConfig {
            ssid: "RoboDog-AP".into(),
            password: "new".into(),
            security: Security::Wpa,
            interface: Some("wlan1".into()),
        });
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.networks.len(), 1);
        let network = loaded.find_network("RoboDog-AP").unwrap();
        assert_eq!(network.password, "new");
        assert_eq!(network.security, Security::Wpa);
        assert_eq!(network.interface.as_deref(), Some("wlan1"));
    }

    #[test]
    fn settle_deadline_becomes_attempt_count() {
        let settle = SettleSettings::default();

        assert_eq!(settle.within(Duration::from_secs(10)).max_attempts, 20);
        assert_eq!(settle.within(Duration::from_millis(1200)).max_attempts, 3);
        assert_eq!(settle.within(Duration::ZERO).max_attempts, 1);
        assert_eq!(settle.within(Duration::from_secs(3)).interval_ms, 500);
    }

    #[test]
    fn remove_networks_matches_ssid_prefix() {
        let mut cfg = Config::default();
        for ssid in ["RoboDog-AP", "RoboDog-Lab", "Cafe"] {
            cfg.add_network(NetworkConfig {
                ssid: ssid.into(),
                password: "pw".into(),
                security: Security::Wpa,
                interface: None,
            });
        }

        assert_eq!(cfg.remove_networks("RoboDog"), 2);
        assert_eq!(cfg.remove_networks("RoboDog"), 0);
        assert!(cfg.find_network("Cafe").is_some());
    }
}
