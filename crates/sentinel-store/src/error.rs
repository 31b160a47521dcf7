//! Error types for sentinel-store.

use std::path::PathBuf;

/// Result type for sentinel-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sentinel-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Timestamp outside the range the database can represent.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Stored status text is not a known status.
    #[error("Invalid status in database: {0}")]
    InvalidStatus(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload read back from the database no longer decodes.
    #[error("Stored reading is corrupt: {0}")]
    Decode(#[from] sentinel_types::ParseError),

    /// Another thread panicked while holding the connection.
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

impl From<Error> for sentinel_core::Error {
    fn from(err: Error) -> Self {
        sentinel_core::Error::storage(err)
    }
}
