//! Named method-call dispatcher.
//!
//! Translates calls such as `forceWifiUsage` into session operations and
//! encodes the answer as `{"ok": <value>}` or
//! `{"error": {"code", "message", "details"}}`.
//!
//! Saved networks (`registerWifiNetwork`, `removeWifiNetwork`,
//! `isRegisteredWifiNetwork`) live in the bridge's [`Config`], written back
//! to disk when a path was given with [`Bridge::persist_to`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Config, NetworkConfig};
use crate::error::{PlatformError, WifiIotError};
use crate::network::WifiInfo;
use crate::platform::{JoinRequest, Security, parse_bssid};
use crate::session::ConnectivitySession;

#[derive(Debug, Clone, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: &str, arguments: Value) -> Self {
        Self {
            method: method.to_string(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Ok(Value),
    Error(ReplyError),
}

impl Reply {
    fn error(code: &str, message: impl Into<String>, details: Option<String>) -> Self {
        Reply::Error(ReplyError {
            code: code.to_string(),
            message: message.into(),
            details,
        })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Reply::Ok(value) => Some(value),
            Reply::Error(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForceArgs {
    use_wifi: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Arguments of `connect` and `registerWifiNetwork`.
#[derive(Deserialize)]
struct NetworkArgs {
    ssid: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    security: Option<String>,
    #[serde(default)]
    bssid: Option<String>,
    #[serde(default)]
    is_hidden: Option<bool>,
    #[serde(default)]
    join_once: Option<bool>,
    #[serde(default)]
    timeout_in_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct SsidArgs {
    ssid: String,
}

fn parse_args<T: DeserializeOwned>(method: &str, arguments: &Value) -> Result<T, WifiIotError> {
    serde_json::from_value(arguments.clone()).map_err(|e| WifiIotError::InvalidArgument {
        name: method.to_string(),
        reason: e.to_string(),
    })
}

pub struct Bridge {
    session: Arc<ConnectivitySession>,
    config: Mutex<Config>,
    /// Where registry changes are written, if anywhere.
    config_path: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(session: Arc<ConnectivitySession>, config: Config) -> Self {
        Self {
            session,
            config: Mutex::new(config),
            config_path: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Saves the config to `path` whenever a call changes the saved networks.
    pub fn persist_to(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn session(&self) -> &Arc<ConnectivitySession> {
        &self.session
    }

    pub fn config(&self) -> Config {
        self.lock_config().clone()
    }

    fn lock_config(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save_config(&self, config: &Config) -> Result<(), WifiIotError> {
        match &self.config_path {
            Some(path) => config
                .save_to(path)
                .map_err(|e| WifiIotError::ConfigSave(format!("{:#}", e))),
            None => Ok(()),
        }
    }

    /// Cancels in-flight settle loops; they answer `false`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn call(&self, call: MethodCall) -> Reply {
        debug!(method = %call.method, "bridge call");
        let result = match call.method.as_str() {
            "forceWifiUsage" => self.force_wifi_usage(&call.arguments).await,
            "isConnected" => Ok(json!(self.session.is_wifi_connected())),
            "connect" => self.connect(&call.arguments).await,
            "disconnect" => self.session.disconnect().await.map(|d| json!(d)),
            "registerWifiNetwork" => self.register_wifi_network(&call.arguments).await,
            "removeWifiNetwork" => self.remove_wifi_network(&call.arguments).await,
            "isRegisteredWifiNetwork" => parse_args::<SsidArgs>(&call.method, &call.arguments)
                .map(|args| json!(self.lock_config().find_network(&args.ssid).is_some())),
            "getSSID" => Ok(self.wifi_field(|info| json!(info.ssid))),
            "getBSSID" => Ok(self.wifi_field(|info| json!(info.bssid))),
            "getIP" => Ok(self.wifi_field(|info| json!(info.ip))),
            "getCurrentSignalStrength" => Ok(self.wifi_field(|info| json!(info.rssi))),
            "getFrequency" => Ok(self.wifi_field(|info| json!(info.frequency))),
            other => {
                return Reply::error(
                    "notImplemented",
                    format!("method '{}' is not implemented", other),
                    None,
                );
            }
        };

        match result {
            Ok(value) => Reply::Ok(value),
            Err(e) => error_reply(e),
        }
    }

    /// `null` when there is no current association.
    fn wifi_field(&self, field: impl FnOnce(WifiInfo) -> Value) -> Value {
        self.session.wifi_info().map(field).unwrap_or(Value::Null)
    }

    async fn force_wifi_usage(&self, arguments: &Value) -> Result<Value, WifiIotError> {
        let args: ForceArgs = parse_args("forceWifiUsage", arguments)?;
        if !args.use_wifi {
            return Ok(json!(self.session.disable_forced_usage()));
        }

        let timeout = args
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.lock_config().cascade.timeout());
        let acquisition = self.session.acquire_detailed(timeout).await;
        debug!(result = %acquisition.result, bound = acquisition.bound, "forceWifiUsage finished");
        Ok(json!(acquisition.bound))
    }

    /// Builds a join request, filling credentials from the saved networks.
    fn join_request(&self, args: NetworkArgs) -> Result<(JoinRequest, Option<u64>), WifiIotError> {
        let saved = self.lock_config().find_network(&args.ssid).cloned();

        let security = match args.security.as_deref() {
            Some(value) => Security::parse(Some(value)).ok_or_else(|| WifiIotError::InvalidArgument {
                name: "security".to_string(),
                reason: format!("unknown security type '{}'", value),
            })?,
            None => saved.as_ref().map(|n| n.security).unwrap_or_default(),
        };
        let bssid = match args.bssid.as_deref() {
            Some(value) => Some(parse_bssid(value).ok_or_else(|| WifiIotError::InvalidArgument {
                name: "bssid".to_string(),
                reason: format!("invalid BSSID representation '{}'", value),
            })?),
            None => None,
        };
        let password = args.password.or_else(|| saved.map(|n| n.password));

        let request = JoinRequest {
            ssid: args.ssid,
            password,
            security,
            bssid,
            hidden: args.is_hidden.unwrap_or(false),
            join_once: args.join_once.unwrap_or(false),
        };
        Ok((request, args.timeout_in_seconds))
    }

    async fn connect(&self, arguments: &Value) -> Result<Value, WifiIotError> {
        let args: NetworkArgs = parse_args("connect", arguments)?;
        let (request, timeout_secs) = self.join_request(args)?;

        let mut settle = self.lock_config().settle;
        if let Some(secs) = timeout_secs {
            settle = settle.within(Duration::from_secs(secs));
        }
        let outcome = self
            .session
            .join(request, settle, self.shutdown.child_token())
            .await?;
        Ok(json!(outcome.connected()))
    }

    async fn register_wifi_network(&self, arguments: &Value) -> Result<Value, WifiIotError> {
        let args: NetworkArgs = parse_args("registerWifiNetwork", arguments)?;
        let (request, _) = self.join_request(args)?;
        let entry = NetworkConfig {
            ssid: request.ssid.clone(),
            password: request.password.clone().unwrap_or_default(),
            security: request.security,
            interface: None,
        };

        self.session.register_network(request).await?;

        let config = {
            let mut config = self.lock_config();
            config.add_network(entry);
            config.clone()
        };
        self.save_config(&config)?;
        Ok(Value::Null)
    }

    async fn remove_wifi_network(&self, arguments: &Value) -> Result<Value, WifiIotError> {
        let args: SsidArgs = parse_args("removeWifiNetwork", arguments)?;
        if args.ssid.is_empty() {
            return Err(WifiIotError::InvalidArgument {
                name: "ssid".to_string(),
                reason: "no SSID prefix given".to_string(),
            });
        }

        let from_platform = self.session.remove_networks(&args.ssid).await?;
        let (from_config, config) = {
            let mut config = self.lock_config();
            let removed = config.remove_networks(&args.ssid);
            (removed, config.clone())
        };
        if from_config > 0 {
            self.save_config(&config)?;
        }
        debug!(prefix = %args.ssid, from_platform, from_config, "removeWifiNetwork finished");
        Ok(json!(from_platform + from_config > 0))
    }
}

fn error_reply(err: WifiIotError) -> Reply {
    match err {
        WifiIotError::InvalidArgument { name, reason } => {
            Reply::error("INVALID_ARGUMENT", format!("invalid argument '{}'", name), Some(reason))
        }
        WifiIotError::Platform(PlatformError::Unsupported(msg)) => {
            Reply::error("UNSUPPORTED_SECURITY", msg, None)
        }
        WifiIotError::Platform(PlatformError::Rejected(msg)) => {
            Reply::error("CONNECTION_REJECTED", msg, None)
        }
        other => Reply::error("Exception", other.to_string(), None),
    }
}
