//! Platform-agnostic types for greenhouse sensor readings.
//!
//! This crate provides the data model shared by the edge buffer, the sync
//! agent and the cloud ingestion gateway.
//!
//! # Features
//!
//! - [`Reading`]: the sensor reading and its JSON wire form
//! - [`BufferedRecord`]: a pending reading in the edge buffer
//! - [`GreenhouseState`] and [`StateUpdate`]: live per-sensor state with merge semantics
//! - [`HistoryRecord`]: immutable reading plus derived metrics
//! - [`ParseError`]: decode failures
//!
//! # Example
//!
//! ```
//! use sentinel_types::{Reading, Status};
//!
//! let reading = Reading::from_json(br#"{
//!     "sensor_id": "GH-001",
//!     "timestamp": "2024-05-01T12:00:00Z",
//!     "temperature_c": 22.0,
//!     "humidity_rh": 60.0
//! }"#)?;
//! assert_eq!(reading.temperature_c, 22.0);
//! # Ok::<(), sentinel_types::ParseError>(())
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    BufferedRecord, GreenhouseState, HistoryRecord, RawReading, Reading, ReadingBuilder,
    StateUpdate, Status, is_storable, parse_timestamp,
};
