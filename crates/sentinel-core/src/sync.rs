//! Store-and-forward sync agent.
//!
//! The agent drains a [`PendingBuffer`] to a [`Transport`] on a fixed
//! interval. Delivery is at-least-once: a record leaves the buffer only
//! after the transport has confirmed it, and a failed publish leaves the
//! record (and everything behind it) for the next tick.
//!
//! Delivery errors are split by [`is_retryable`]. Transport failures and
//! timeouts end the tick with [`TickOutcome::Interrupted`]; anything else
//! (a storage failure behind an in-process transport, say) is returned as
//! `Err` after the delivered prefix has been acknowledged.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sentinel_core::{MemoryBuffer, MockTransport, PendingBuffer, StaticProbe};
//! use sentinel_core::sync::{SyncAgent, SyncConfig, TickOutcome};
//! use sentinel_types::Reading;
//! use time::macros::datetime;
//!
//! #[tokio::main]
//! async fn main() -> sentinel_core::Result<()> {
//!     let buffer = Arc::new(MemoryBuffer::new());
//!     let reading = Reading::builder("GH-001", datetime!(2024-05-01 12:00:00 UTC))
//!         .temperature(22.0)
//!         .humidity(60.0)
//!         .build();
//!     buffer.enqueue(&reading)?;
//!
//!     let agent = SyncAgent::new(
//!         buffer.clone(),
//!         Arc::new(MockTransport::new()),
//!         Arc::new(StaticProbe::new(true)),
//!         SyncConfig::default(),
//!     );
//!
//!     let outcome = agent.tick().await?;
//!     assert_eq!(outcome, TickOutcome::Drained { delivered: 1, remaining: 0 });
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentinel_types::BufferedRecord;

use crate::error::{Error, Result};
use crate::retry::{Backoff, is_retryable};
use crate::traits::{ConnectivityProbe, PendingBuffer, Transport};

/// Default topic readings are published to.
pub const DEFAULT_TOPIC: &str = "sensor-readings";

/// Consecutive failing ticks logged at `warn` before escalating to `error`.
const WARN_THRESHOLD: u64 = 3;

/// Sync agent configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between ticks when the previous tick did not fail.
    pub interval: Duration,
    /// Maximum records attempted per tick.
    pub max_batch_size: usize,
    /// Upper bound for a single publish call.
    pub publish_timeout: Duration,
    /// Topic passed to the transport.
    pub topic: String,
    /// Delay policy after failing ticks. Never shorter than `interval`.
    pub backoff: Backoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_batch_size: 20,
            publish_timeout: Duration::from_secs(10),
            topic: DEFAULT_TOPIC.to_string(),
            backoff: Backoff::default(),
        }
    }
}

impl SyncConfig {
    /// Check that the configuration can drive an agent.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("sync interval must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be at least 1".into()));
        }
        if self.publish_timeout.is_zero() {
            return Err(Error::InvalidConfig("publish_timeout must be positive".into()));
        }
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidConfig("topic cannot be empty".into()));
        }
        Ok(())
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The connectivity probe reported no link; the buffer was not touched.
    Offline,
    /// Online, but nothing was pending.
    Idle,
    /// Every record in the batch was delivered and acknowledged.
    Drained { delivered: usize, remaining: u64 },
    /// A publish failed. Only the records before it were acknowledged.
    Interrupted {
        delivered: usize,
        failed_id: i64,
        remaining: u64,
    },
}

impl TickOutcome {
    /// Whether the tick ended on a delivery failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, TickOutcome::Interrupted { .. })
    }
}

/// Running counters for a sync agent.
#[derive(Debug, Default)]
pub struct SyncStats {
    ticks: AtomicU64,
    offline_ticks: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    /// Unix timestamp of the last tick that delivered something (0 = never).
    last_success: AtomicI64,
}

impl SyncStats {
    /// Failing ticks since the last successful one.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        let ts = self.last_success.load(Ordering::Relaxed);
        SyncStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            offline_ticks: self.offline_ticks.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            last_success_at: if ts == 0 {
                None
            } else {
                OffsetDateTime::from_unix_timestamp(ts).ok()
            },
        }
    }

    /// Record a failing tick and return the new consecutive-failure count.
    fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
        self.last_success
            .store(OffsetDateTime::now_utc().unix_timestamp(), Ordering::Relaxed);
    }
}

/// Serializable view of [`SyncStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatsSnapshot {
    pub ticks: u64,
    pub offline_ticks: u64,
    pub delivered: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
}

/// Drains a pending buffer to a transport.
pub struct SyncAgent {
    buffer: Arc<dyn PendingBuffer>,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ConnectivityProbe>,
    config: SyncConfig,
    stats: SyncStats,
}

impl std::fmt::Debug for SyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAgent")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SyncAgent {
    pub fn new(
        buffer: Arc<dyn PendingBuffer>,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn ConnectivityProbe>,
        config: SyncConfig,
    ) -> Self {
        Self {
            buffer,
            transport,
            probe,
            config,
            stats: SyncStats::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Run one sync cycle.
    ///
    /// Retryable publish failures end the tick early and are reported
    /// through [`TickOutcome::Interrupted`]. Buffer failures and
    /// non-retryable delivery errors are returned as `Err`; records the
    /// transport confirmed before the error are acknowledged first.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if !self.probe.is_online().await {
            self.stats.offline_ticks.fetch_add(1, Ordering::Relaxed);
            let pending = self.buffer.count()?;
            info!("Offline, {} reading(s) held in buffer", pending);
            return Ok(TickOutcome::Offline);
        }

        let batch = self.buffer.peek_batch(self.config.max_batch_size)?;
        if batch.is_empty() {
            debug!("Online, nothing to sync");
            self.stats.consecutive_failures.store(0, Ordering::Relaxed);
            return Ok(TickOutcome::Idle);
        }

        debug!("Syncing batch of {} record(s)", batch.len());

        let mut delivered = Vec::with_capacity(batch.len());
        let mut failed = None;
        for record in &batch {
            match self.deliver(record).await {
                Ok(()) => delivered.push(record.id),
                Err(e) => {
                    failed = Some((record.id, e));
                    break;
                }
            }
        }

        // Acknowledge the confirmed prefix even when a later record failed.
        if !delivered.is_empty() {
            let removed = self.buffer.acknowledge(&delivered)?;
            if removed != delivered.len() {
                warn!(
                    "Acknowledged {} record(s) but only {} were still pending",
                    delivered.len(),
                    removed
                );
            }
            self.stats.record_delivered(delivered.len());
        }

        let remaining = self.buffer.count()?;

        match failed {
            None => {
                self.stats.consecutive_failures.store(0, Ordering::Relaxed);
                info!(
                    "Synced {} record(s), {} remaining",
                    delivered.len(),
                    remaining
                );
                Ok(TickOutcome::Drained {
                    delivered: delivered.len(),
                    remaining,
                })
            }
            Some((failed_id, e)) if !is_retryable(&e) => {
                error!(
                    "Delivery of record {} failed with a non-retryable error: {}",
                    failed_id, e
                );
                Err(e)
            }
            Some((failed_id, e)) => {
                let failures = self.stats.record_failure();
                if failures <= WARN_THRESHOLD {
                    warn!(
                        "Failed to publish record {}: {} ({} delivered this tick, attempt {})",
                        failed_id,
                        e,
                        delivered.len(),
                        failures
                    );
                } else {
                    error!(
                        "Failed to publish record {} after {} consecutive ticks: {}",
                        failed_id, failures, e
                    );
                }
                Ok(TickOutcome::Interrupted {
                    delivered: delivered.len(),
                    failed_id,
                    remaining,
                })
            }
        }
    }

    /// Tick until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between ticks, so an in-flight tick always
    /// finishes (each publish is bounded by `publish_timeout`). Ticks that
    /// return `Err` are retried after backoff like transport failures; the
    /// loop itself never exits on its own.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting sync agent (interval: {:?}, batch: {}, topic: {})",
            self.config.interval, self.config.max_batch_size, self.config.topic
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.tick().await {
                let failures = self.stats.record_failure();
                error!("Sync tick aborted (attempt {}): {}", failures, e);
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let stats = self.stats.snapshot();
        info!(
            "Sync agent stopped after {} tick(s), {} record(s) delivered",
            stats.ticks, stats.delivered
        );
    }

    /// Delay before the next tick given the current failure streak.
    pub fn next_delay(&self) -> Duration {
        match self.stats.consecutive_failures() {
            0 => self.config.interval,
            n => {
                let attempt = u32::try_from(n - 1).unwrap_or(u32::MAX);
                self.config
                    .backoff
                    .delay_for_attempt(attempt)
                    .max(self.config.interval)
            }
        }
    }

    async fn deliver(&self, record: &BufferedRecord) -> Result<()> {
        let timeout = self.config.publish_timeout;
        let publish = self
            .transport
            .publish(&self.config.topic, record.payload.as_bytes());

        match tokio::time::timeout(timeout, publish).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("publish record {}", record.id),
                duration: timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryBuffer, MockTransport, StaticProbe};
    use sentinel_types::Reading;
    use time::macros::datetime;

    fn reading(n: i64) -> Reading {
        Reading::builder(
            format!("GH-{:03}", n),
            datetime!(2024-05-01 12:00:00 UTC) + time::Duration::minutes(n),
        )
        .temperature(20.0 + n as f64)
        .humidity(60.0)
        .build()
    }

    struct Harness {
        buffer: Arc<MemoryBuffer>,
        transport: Arc<MockTransport>,
        probe: Arc<StaticProbe>,
        agent: SyncAgent,
    }

    fn harness(records: i64, config: SyncConfig) -> Harness {
        let buffer = Arc::new(MemoryBuffer::new());
        for n in 0..records {
            buffer.enqueue(&reading(n)).unwrap();
        }
        let transport = Arc::new(MockTransport::new());
        let probe = Arc::new(StaticProbe::new(true));
        let agent = SyncAgent::new(buffer.clone(), transport.clone(), probe.clone(), config);
        Harness {
            buffer,
            transport,
            probe,
            agent,
        }
    }

    fn batch_of(size: usize) -> SyncConfig {
        SyncConfig {
            max_batch_size: size,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_offline_tick_leaves_buffer_untouched() {
        let h = harness(3, SyncConfig::default());
        h.probe.set_online(false);

        assert_eq!(h.agent.tick().await.unwrap(), TickOutcome::Offline);
        assert_eq!(h.buffer.count().unwrap(), 3);
        assert_eq!(h.transport.attempts(), 0);
        assert_eq!(h.agent.stats().snapshot().offline_ticks, 1);
    }

    #[tokio::test]
    async fn test_failing_transport_keeps_count() {
        let h = harness(3, SyncConfig::default());
        h.transport.set_should_fail(true);

        let before = h.buffer.count().unwrap();
        let outcome = h.agent.tick().await.unwrap();
        let after = h.buffer.count().unwrap();

        assert_eq!(before, after);
        assert!(outcome.is_failure());
        // Stops at the first failure instead of trying the rest of the batch.
        assert_eq!(h.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_batch_removes_oldest_first() {
        let h = harness(3, batch_of(2));
        let ids = h.buffer.pending_ids();

        let outcome = h.agent.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Drained {
                delivered: 2,
                remaining: 1
            }
        );
        assert_eq!(h.buffer.pending_ids(), vec![ids[2]]);

        let published = h.transport.published().await;
        assert_eq!(published.len(), 2);
        assert!(published[0].text().contains("GH-000"));
        assert!(published[1].text().contains("GH-001"));
        assert!(published.iter().all(|p| p.topic == DEFAULT_TOPIC));
    }

    #[tokio::test]
    async fn test_partial_failure_acknowledges_prefix_only() {
        let h = harness(4, SyncConfig::default());
        let ids = h.buffer.pending_ids();
        h.transport.set_fail_after(2);

        let outcome = h.agent.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Interrupted {
                delivered: 2,
                failed_id: ids[2],
                remaining: 2
            }
        );
        assert_eq!(h.buffer.pending_ids(), vec![ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn test_failed_records_retried_next_tick_in_order() {
        let h = harness(2, SyncConfig::default());
        h.transport.set_transient_failures(1);

        assert!(h.agent.tick().await.unwrap().is_failure());
        assert_eq!(h.agent.stats().consecutive_failures(), 1);

        let outcome = h.agent.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Drained {
                delivered: 2,
                remaining: 0
            }
        );
        assert_eq!(h.agent.stats().consecutive_failures(), 0);

        let published = h.transport.published().await;
        assert!(published[0].text().contains("GH-000"));
        assert!(published[1].text().contains("GH-001"));
    }

    #[tokio::test]
    async fn test_empty_buffer_is_idle() {
        let h = harness(0, SyncConfig::default());
        assert_eq!(h.agent.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_counts_as_failure() {
        let config = SyncConfig {
            publish_timeout: Duration::from_millis(50),
            ..SyncConfig::default()
        };
        let h = harness(1, config);
        h.transport.set_latency(Duration::from_secs(5));

        let outcome = h.agent.tick().await.unwrap();
        assert!(outcome.is_failure());
        assert_eq!(h.buffer.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_buffer_failure_propagates() {
        let h = harness(1, SyncConfig::default());
        h.buffer.set_should_fail(true);
        assert!(matches!(h.agent.tick().await, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_after_prefix_ack() {
        let h = harness(3, SyncConfig::default());
        let ids = h.buffer.pending_ids();
        h.transport.set_fail_after(1);
        h.transport.set_fail_with_storage(true);

        assert!(matches!(h.agent.tick().await, Err(Error::Storage(_))));
        // The confirmed record is gone, the failed one and its successor stay.
        assert_eq!(h.buffer.pending_ids(), vec![ids[1], ids[2]]);
        assert_eq!(h.agent.stats().snapshot().delivered, 1);
        // Not counted here: `run` records the failure for an `Err` tick.
        assert_eq!(h.agent.stats().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_after_non_retryable_error() {
        let config = SyncConfig {
            interval: Duration::from_secs(5),
            backoff: Backoff::constant(Duration::from_secs(60)),
            ..SyncConfig::default()
        };
        let h = harness(1, config);
        h.transport.set_should_fail(true);
        h.transport.set_fail_with_storage(true);
        let agent = Arc::new(h.agent);
        let shutdown = CancellationToken::new();

        let task = {
            let agent = agent.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { agent.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(agent.stats().consecutive_failures(), 1);
        assert_eq!(h.transport.attempts(), 1);
        assert_eq!(h.buffer.count().unwrap(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_next_delay_backs_off_and_never_undercuts_interval() {
        let config = SyncConfig {
            interval: Duration::from_secs(5),
            backoff: Backoff::default()
                .initial_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(40))
                .jitter(false),
            ..SyncConfig::default()
        };
        let h = harness(0, config);

        assert_eq!(h.agent.next_delay(), Duration::from_secs(5));
        h.agent.stats.record_failure();
        assert_eq!(h.agent.next_delay(), Duration::from_secs(5));
        for _ in 0..3 {
            h.agent.stats.record_failure();
        }
        assert_eq!(h.agent.next_delay(), Duration::from_secs(8));
        for _ in 0..10 {
            h.agent.stats.record_failure();
        }
        assert_eq!(h.agent.next_delay(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_and_stops_on_cancel() {
        let h = harness(5, batch_of(2));
        let agent = Arc::new(h.agent);
        let shutdown = CancellationToken::new();

        let task = {
            let agent = agent.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { agent.run(shutdown).await })
        };

        // Three ticks at 5 s intervals drain 2 + 2 + 1 records.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.buffer.count().unwrap(), 0);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(agent.stats().snapshot().delivered, 5);
        assert!(agent.stats().snapshot().last_success_at.is_some());
    }

    #[test]
    fn test_config_validation() {
        assert!(SyncConfig::default().validate().is_ok());
        assert!(batch_of(0).validate().is_err());
        let config = SyncConfig {
            topic: " ".to_string(),
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
