//! Error types for mesh session operations

use thiserror::Error;

/// Errors surfaced by the mesh session layer
#[derive(Error, Debug)]
pub enum MeshError {
    /// Traffic attempted while the session is not operational
    #[error("mesh session not ready")]
    NotReady,

    /// A single-flight operation was requested while one is in progress
    #[error("{0} already in flight")]
    Busy(&'static str),

    /// Crypto initialization needs a passphrase
    #[error("no passphrase configured")]
    EmptyPassphrase,

    /// The codec rejected the passphrase
    #[error("crypto initialization failed: {0}")]
    CryptoInit(String),

    /// An outgoing command could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// An inbound notification could not be unwrapped
    #[error("decode failed: {0}")]
    Decode(String),

    /// The association sub-protocol refused to start
    #[error("association start failed: {0}")]
    AssociationStart(String),
}

impl MeshError {
    /// Short machine-readable code for management responses
    pub fn code(&self) -> &'static str {
        match self {
            MeshError::NotReady => "not_ready",
            MeshError::Busy(_) => "busy",
            MeshError::EmptyPassphrase => "no_passphrase",
            MeshError::CryptoInit(_) => "crypto_init_failed",
            MeshError::Encode(_) => "encode_failed",
            MeshError::Decode(_) => "decode_failed",
            MeshError::AssociationStart(_) => "start_failed",
        }
    }
}

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
