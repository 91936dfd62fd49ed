use std::time::Duration;

/// Errors raised by the RPC channel
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC connection closed")]
    ConnectionClosed,

    #[error("RPC request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Returns true if the error means the peer is gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, RpcError::ConnectionClosed)
    }
}
