//! Error types for traceline

use thiserror::Error;

/// Main error type for the traceline library
#[derive(Error, Debug)]
pub enum Error {
    /// Durable storage error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/collection endpoint error
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload encryption error
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Result type alias for traceline
pub type Result<T> = std::result::Result<T, Error>;
