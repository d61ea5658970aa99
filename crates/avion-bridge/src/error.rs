//! Error types for bridge link operations

use thiserror::Error;

/// Errors surfaced by the bridge connection layer
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A write was attempted while the link is not fully up
    #[error("bridge link not ready")]
    NotReady,

    /// The transport rejected a scan request
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The transport rejected a connect request
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// A characteristic write failed
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Generic transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    /// Whether the reconnect loop recovers from this error
    pub fn is_recoverable(&self) -> bool {
        // Everything short of a caller bug recycles through Disconnected
        !matches!(self, BridgeError::NotReady)
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
