//! Host-level error type.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::rpc::RpcError;
use crate::types::BrowserId;

/// Errors surfaced by [`crate::host::OutOfProcessHost`] and its browsers
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Browser executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Failed to launch {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser process did not initialize within {0:?}")]
    StartupTimeout(Duration),

    #[error("Browser process exited before initialization: {0}")]
    ProcessExited(String),

    #[error("Browser process initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Connection to the browser process was lost")]
    ConnectionLost,

    #[error("Host has been shut down")]
    HostDisposed,

    #[error("Browser {0} has been closed")]
    BrowserDisposed(BrowserId),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HostError {
    /// Returns true for errors caused by closed browsers or a shut down host.
    pub fn is_disposed(&self) -> bool {
        matches!(self, HostError::HostDisposed | HostError::BrowserDisposed(_))
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
