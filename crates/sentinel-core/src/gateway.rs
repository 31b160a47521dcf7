//! Cloud-side ingestion of delivered readings.
//!
//! For each reading the gateway computes derived metrics, evaluates
//! thresholds, merges the result into the live state document for the
//! sensor and appends an immutable history record.
//!
//! Malformed payloads are dropped with an `error!` log and reported as
//! `Ok(None)`: a delivered payload that does not decode will never decode,
//! so it is not handed back to the caller as a failure to retry. Storage
//! failures are returned as errors.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use sentinel_types::{HistoryRecord, RawReading, Reading, StateUpdate, Status};

use crate::error::Result;
use crate::metrics::DerivedMetrics;
use crate::thresholds::{Alert, Thresholds};
use crate::traits::{HistoryStore, StateStore};

/// Gateway behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Skip the state upsert when the stored document was produced by a
    /// reading captured after this one. History is appended regardless.
    pub reject_stale_updates: bool,
}

/// Result of ingesting one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub sensor_id: String,
    pub derived: DerivedMetrics,
    pub alerts: Vec<Alert>,
    pub status: Status,
    /// False when the stale-update guard skipped the state write.
    pub state_updated: bool,
    /// False when history already had a record for this sensor and timestamp.
    pub history_appended: bool,
}

/// Turns delivered readings into state and history writes.
pub struct IngestionGateway {
    thresholds: Thresholds,
    state: Arc<dyn StateStore>,
    history: Arc<dyn HistoryStore>,
    options: GatewayOptions,
}

impl std::fmt::Debug for IngestionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionGateway")
            .field("thresholds", &self.thresholds)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl IngestionGateway {
    pub fn new(
        thresholds: Thresholds,
        state: Arc<dyn StateStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            thresholds,
            state,
            history,
            options: GatewayOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Decode and ingest a JSON payload.
    ///
    /// Returns `Ok(None)` if the payload was dropped as malformed.
    pub async fn ingest_json(&self, payload: &[u8]) -> Result<Option<IngestOutcome>> {
        match Reading::from_json(payload) {
            Ok(reading) => self.process(&reading).await.map(Some),
            Err(e) => {
                error!("Dropping malformed reading: {}", e);
                Ok(None)
            }
        }
    }

    /// Validate and ingest an already-parsed payload.
    ///
    /// Returns `Ok(None)` if the reading was dropped as invalid.
    pub async fn ingest(&self, raw: RawReading) -> Result<Option<IngestOutcome>> {
        let sensor_id = raw.sensor_id.clone();
        match Reading::try_from(raw) {
            Ok(reading) => self.process(&reading).await.map(Some),
            Err(e) => {
                error!(
                    "Dropping invalid reading from {}: {}",
                    sensor_id.as_deref().unwrap_or("<unknown>"),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Ingest a validated reading.
    pub async fn process(&self, reading: &Reading) -> Result<IngestOutcome> {
        let derived = DerivedMetrics::compute(reading);
        let alerts = self.thresholds.evaluate(reading, &derived);
        let status = Status::from_alerts(&alerts);
        let alert_texts: Vec<String> = alerts.iter().map(ToString::to_string).collect();

        let state_updated = if self.options.reject_stale_updates && self.is_stale(reading).await? {
            debug!(
                "Skipping state update for {}: reading at {} is older than stored state",
                reading.sensor_id, reading.timestamp
            );
            false
        } else {
            let update = StateUpdate {
                sensor_id: reading.sensor_id.clone(),
                last_update: OffsetDateTime::now_utc(),
                last_reading_at: Some(reading.timestamp),
                current_temp: Some(reading.temperature_c),
                current_humidity: Some(reading.humidity_rh),
                current_vpd: derived.vpd_kpa,
                current_co2: reading.co2_ppm,
                status: Some(status),
                active_alerts: Some(alert_texts.clone()),
            };
            self.state.upsert_state(update).await?;
            true
        };

        let record = HistoryRecord::from_reading(reading, derived.vpd_kpa, derived.dew_point_c);
        let history_appended = self.history.append(&record).await?;
        if !history_appended {
            debug!(
                "History already holds {} at {}, keeping stored record",
                reading.sensor_id, reading.timestamp
            );
        }

        if alerts.is_empty() {
            info!(
                "Processed {}: T={}C RH={}% VPD={:?}",
                reading.sensor_id, reading.temperature_c, reading.humidity_rh, derived.vpd_kpa
            );
        } else {
            warn!(
                "{} raised {} alert(s): {}",
                reading.sensor_id,
                alerts.len(),
                alert_texts.join("; ")
            );
        }

        Ok(IngestOutcome {
            sensor_id: reading.sensor_id.clone(),
            derived,
            alerts,
            status,
            state_updated,
            history_appended,
        })
    }

    async fn is_stale(&self, reading: &Reading) -> Result<bool> {
        let stored = self.state.get_state(&reading.sensor_id).await?;
        Ok(stored
            .and_then(|s| s.last_reading_at)
            .is_some_and(|at| at > reading.timestamp))
    }
}
