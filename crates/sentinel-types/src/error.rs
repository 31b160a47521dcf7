//! Error types for decoding sensor readings.

use thiserror::Error;

/// Errors that can occur when decoding a reading from its wire form.
///
/// This error type is transport-agnostic. It covers malformed JSON as well
/// as structurally valid payloads that violate the reading contract.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is not valid JSON or does not have the expected shape.
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent or null.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// A numeric field carries a non-numeric value.
    #[error("Field '{field}' must be numeric, got {value}")]
    NonNumeric { field: &'static str, value: String },

    /// The sensor identifier is present but empty.
    #[error("Field 'sensor_id' cannot be empty")]
    EmptySensorId,

    /// The timestamp is not an ISO-8601 date-time.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The timestamp parses but lies outside the storable range.
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(String),
}

/// Result type alias using sentinel-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
