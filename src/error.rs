use thiserror::Error;

#[derive(Error, Debug)]
pub enum WifiIotError {
    #[error("No WiFi interface found")]
    NoWifiInterfaceFound,

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Failed to execute nmcli: {0}")]
    NmcliExecution(String),

    #[error("Failed to parse nmcli output: {0}")]
    NmcliParse(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSave(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Failures reported by a platform collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("network request rejected: {0}")]
    Rejected(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("platform call failed: {0}")]
    Call(String),
}

impl From<WifiIotError> for PlatformError {
    fn from(err: WifiIotError) -> Self {
        match err {
            WifiIotError::Platform(inner) => inner,
            other => PlatformError::Call(other.to_string()),
        }
    }
}
