//! Error types for hub-side operations

use thiserror::Error;

/// Errors surfaced by registry persistence and bulk import
#[derive(Error, Debug)]
pub enum HubError {
    /// Storage I/O failed
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot could not be (de)serialized
    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A bulk import payload was structurally invalid
    #[error("import rejected: {0}")]
    Import(String),
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;
