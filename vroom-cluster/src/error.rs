//! Error types for the signal router

use thiserror::Error;

/// Router error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for router operations
pub type Result<T> = std::result::Result<T, Error>;
