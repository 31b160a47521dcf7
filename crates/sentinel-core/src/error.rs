//! Error types for sentinel-core.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::Publish`] | Keep record buffered, retry next tick | Remote endpoint unreachable or refused |
//! | [`Error::Timeout`] | Keep record buffered, retry next tick | Hung transport call |
//! | [`Error::Storage`] | Propagate, stop the caller | Continuing risks silent data loss |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//!
//! Transport failures never leave the sync agent: they end the current tick
//! early and the unacknowledged records are delivered on a later tick.
//! Malformed readings are not errors at this level; the ingestion gateway
//! drops them (see [`sentinel_types::ParseError`]).

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the sync agent, the ingestion gateway and the
/// collaborators they are wired to.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport did not confirm receipt of a message.
    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    /// An operation did not complete within its deadline.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Durable storage (edge buffer, state or history store) failed.
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a publish error for the given topic.
    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Wrap a storage backend error.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Storage(source.into())
    }
}

/// Result type alias using sentinel-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
