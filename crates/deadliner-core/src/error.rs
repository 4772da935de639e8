//! Error types for deadliner-core

use thiserror::Error;

/// Result type alias using deadliner-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in deadliner-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network error (timeout/DNS/TLS), surfaced after bounded retries
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication rejected by the remote server (401/403), never retried
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Unexpected remote response
    #[error("Remote error: HTTP {status}: {body}")]
    Remote { status: u16, body: String },
}
