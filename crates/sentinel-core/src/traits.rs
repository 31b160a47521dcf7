//! Seams between the pipeline and its collaborators.
//!
//! The sync agent and the ingestion gateway only talk to storage, the
//! network and the connectivity check through these traits. Production
//! implementations live in `sentinel-store` and `sentinel-service`; the
//! in-memory fakes in [`crate::mock`] back the tests.

use async_trait::async_trait;

use sentinel_types::{BufferedRecord, GreenhouseState, HistoryRecord, Reading, StateUpdate};

use crate::error::Result;

/// Durable, ordered queue of readings awaiting delivery.
///
/// Implementations must serialize all operations against each other and
/// must not return from [`enqueue`](Self::enqueue) before the record is on
/// stable storage. These calls are synchronous; async callers are expected
/// to accept the short blocking section.
pub trait PendingBuffer: Send + Sync {
    /// Append a reading and return its buffer id.
    fn enqueue(&self, reading: &Reading) -> Result<i64>;

    /// Up to `limit` pending records, oldest first. Does not remove anything.
    fn peek_batch(&self, limit: usize) -> Result<Vec<BufferedRecord>>;

    /// Remove exactly the given ids. Unknown ids are ignored.
    ///
    /// Returns how many records were actually removed.
    fn acknowledge(&self, ids: &[i64]) -> Result<usize>;

    /// Exact number of pending records.
    fn count(&self) -> Result<u64>;
}

/// Delivers a payload to the remote side.
///
/// `Ok(())` means the remote side has durably received the message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Decides whether a sync attempt is worth making.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Keyed live-state documents with partial-field merge.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Merge `update` into the stored document, creating it if missing.
    async fn upsert_state(&self, update: StateUpdate) -> Result<()>;

    /// Current document for a sensor.
    async fn get_state(&self, sensor_id: &str) -> Result<Option<GreenhouseState>>;
}

/// Append-only history of readings.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record.
    ///
    /// Returns `false` if a record with the same `(sensor_id, timestamp)`
    /// already exists; the stored record is left unchanged.
    async fn append(&self, record: &HistoryRecord) -> Result<bool>;
}
