//! Offline-first store-and-forward pipeline for greenhouse sensors.
//!
//! This crate holds the parts of the pipeline that do not depend on a
//! particular database or network stack: the edge-side sync agent, the
//! cloud-side ingestion gateway, and the pure metric and alert logic they
//! share.
//!
//! # Features
//!
//! - **Derived metrics**: vapor pressure deficit and dew point ([`metrics`])
//! - **Threshold alerts**: configurable per-metric bounds ([`thresholds`])
//! - **Sync agent**: drains a durable buffer with at-least-once delivery ([`sync`])
//! - **Ingestion gateway**: state merge-upsert plus append-only history ([`gateway`])
//! - **Test fakes**: in-memory transport, buffer and stores ([`mock`])
//!
//! # Pipeline
//!
//! ```text
//! reading -> PendingBuffer::enqueue -> SyncAgent::tick -> Transport::publish
//!         -> IngestionGateway::process -> StateStore + HistoryStore
//! ```
//!
//! Storage and transport are reached only through the traits in [`traits`],
//! implemented by `sentinel-store` (SQLite) and `sentinel-service` (HTTP).

pub mod error;
pub mod gateway;
pub mod metrics;
pub mod mock;
pub mod retry;
pub mod sync;
pub mod thresholds;
pub mod traits;

// Re-export the data model
pub use sentinel_types::{
    BufferedRecord, GreenhouseState, HistoryRecord, ParseError, RawReading, Reading, StateUpdate,
    Status,
};

pub use error::{Error, Result};
pub use gateway::{GatewayOptions, IngestOutcome, IngestionGateway};
pub use metrics::{DerivedMetrics, dew_point, vapor_pressure_deficit};
pub use mock::{
    MemoryBuffer, MemoryHistoryStore, MemoryStateStore, MockTransport, Published, StaticProbe,
};
pub use retry::{Backoff, is_retryable};
pub use sync::{SyncAgent, SyncConfig, SyncStats, SyncStatsSnapshot, TickOutcome};
pub use thresholds::{Alert, Bound, ThresholdConfig, Thresholds};
pub use traits::{ConnectivityProbe, HistoryStore, PendingBuffer, StateStore, Transport};
