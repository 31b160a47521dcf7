//! In-memory implementations of the pipeline seams for testing.
//!
//! These fakes implement the traits in [`crate::traits`] so the sync agent
//! and the ingestion gateway can be exercised without SQLite or a network.
//!
//! # Features
//!
//! - **Failure injection**: make the transport or a store fail permanently,
//!   for the next `n` calls, or after `n` successful calls
//! - **Latency simulation**: delay publishes to exercise timeouts
//! - **Inspection**: every fake records what it was asked to do

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use sentinel_types::{BufferedRecord, GreenhouseState, HistoryRecord, Reading, StateUpdate};

use crate::error::{Error, Result};
use crate::traits::{ConnectivityProbe, HistoryStore, PendingBuffer, StateStore, Transport};

/// A message accepted by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Published {
    /// The payload as UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A transport that records publishes in memory.
///
/// # Example
///
/// ```
/// use sentinel_core::{MockTransport, Transport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     transport.publish("sensor-readings", b"{}").await.unwrap();
///
///     transport.set_should_fail(true);
///     assert!(transport.publish("sensor-readings", b"{}").await.is_err());
///     assert_eq!(transport.published().await.len(), 1);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    published: RwLock<Vec<Published>>,
    attempts: AtomicU32,
    should_fail: AtomicBool,
    /// Number of publishes to fail before succeeding.
    remaining_failures: AtomicU32,
    /// Fail every publish once this many have succeeded.
    fail_after: Mutex<Option<usize>>,
    /// Simulated publish latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    /// Report failures as storage errors instead of publish errors.
    fail_with_storage: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail (or succeed again).
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` publishes, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Accept `count` more messages, then fail every publish.
    pub fn set_fail_after(&self, count: usize) {
        if let Ok(mut fail_after) = self.fail_after.lock() {
            *fail_after = Some(count);
        }
    }

    /// Report failures as non-retryable storage errors, as an in-process
    /// transport writing straight to a store would.
    pub fn set_fail_with_storage(&self, storage: bool) {
        self.fail_with_storage.store(storage, Ordering::Relaxed);
    }

    /// Set simulated publish latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Messages accepted so far, in order.
    pub async fn published(&self) -> Vec<Published> {
        self.published.read().await.clone()
    }

    /// Total publish calls, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn check_should_fail(&self, topic: &str) -> Result<()> {
        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::publish(topic, "mock transient failure"));
        }

        let exhausted = self
            .fail_after
            .lock()
            .map(|mut fail_after| match fail_after.as_mut() {
                Some(0) => true,
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            })
            .unwrap_or(true);

        if exhausted || self.should_fail.load(Ordering::Relaxed) {
            if self.fail_with_storage.load(Ordering::Relaxed) {
                Err(Error::storage("mock storage failure"))
            } else {
                Err(Error::publish(topic, "mock failure"))
            }
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.check_should_fail(topic)?;
        self.published.write().await.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// A connectivity probe with a fixed, switchable answer.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct BufferInner {
    last_id: i64,
    records: VecDeque<BufferedRecord>,
}

/// A non-durable [`PendingBuffer`].
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    inner: Mutex<BufferInner>,
    should_fail: AtomicBool,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every buffer operation fail with a storage error.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Ids of all pending records, oldest first.
    pub fn pending_ids(&self) -> Vec<i64> {
        self.inner
            .lock()
            .map(|inner| inner.records.iter().map(|r| r.id).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BufferInner>> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::storage("mock buffer failure"));
        }
        self.inner
            .lock()
            .map_err(|_| Error::storage("buffer lock poisoned"))
    }
}

impl PendingBuffer for MemoryBuffer {
    fn enqueue(&self, reading: &Reading) -> Result<i64> {
        let payload = reading.to_json().map_err(Error::storage)?;
        let mut inner = self.lock()?;
        inner.last_id += 1;
        let id = inner.last_id;
        inner.records.push_back(BufferedRecord {
            id,
            payload,
            enqueued_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    fn peek_batch(&self, limit: usize) -> Result<Vec<BufferedRecord>> {
        let inner = self.lock()?;
        Ok(inner.records.iter().take(limit).cloned().collect())
    }

    fn acknowledge(&self, ids: &[i64]) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.records.len();
        inner.records.retain(|r| !ids.contains(&r.id));
        Ok(before - inner.records.len())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.lock()?.records.len() as u64)
    }
}

/// An in-memory [`StateStore`] with merge semantics.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, GreenhouseState>>,
    should_fail: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// All stored documents, sorted by sensor id.
    pub async fn all(&self) -> Vec<GreenhouseState> {
        let mut states: Vec<_> = self.states.read().await.values().cloned().collect();
        states.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        states
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn upsert_state(&self, update: StateUpdate) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::storage("mock state store failure"));
        }
        let mut states = self.states.write().await;
        let existing = states.remove(&update.sensor_id);
        let merged = update.merge_into(existing);
        states.insert(merged.sensor_id.clone(), merged);
        Ok(())
    }

    async fn get_state(&self, sensor_id: &str) -> Result<Option<GreenhouseState>> {
        Ok(self.states.read().await.get(sensor_id).cloned())
    }
}

/// An in-memory append-only [`HistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in append order.
    pub async fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        let duplicate = records
            .iter()
            .any(|r| r.sensor_id == record.sensor_id && r.timestamp == record.timestamp);
        if duplicate {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }
}
