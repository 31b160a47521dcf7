//! Cloud-side state and history store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use sentinel_core::{HistoryStore, StateStore};
use sentinel_types::{GreenhouseState, HistoryRecord, StateUpdate, Status};

use crate::error::{Error, Result};
use crate::queries::HistoryQuery;
use crate::{from_nanos, schema, to_nanos};

const STATE_COLUMNS: &str = "sensor_id, last_update, last_reading_at, current_temp, \
     current_humidity, current_vpd, current_co2, status, active_alerts";

const HISTORY_COLUMNS: &str = "sensor_id, timestamp, temperature_c, humidity_rh, soil_moisture, \
     co2_ppm, par_umol, soil_ec, battery_level, vpd_kpa, dew_point_c";

/// SQLite-based store for live greenhouse state and reading history.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {}", path.display());
        let conn = crate::connect(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }
}

// State operations
impl Store {
    /// Merge a partial update into the sensor's state document.
    ///
    /// Read, merge and write happen in one transaction, so concurrent
    /// updates for the same sensor cannot lose each other's fields.
    pub fn upsert_state(&self, update: StateUpdate) -> Result<GreenhouseState> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing = select_state(&tx, &update.sensor_id)?;
        let state = update.merge_into(existing);

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO greenhouse_state ({STATE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            rusqlite::params![
                state.sensor_id,
                to_nanos(state.last_update)?,
                state.last_reading_at.map(to_nanos).transpose()?,
                state.current_temp,
                state.current_humidity,
                state.current_vpd,
                state.current_co2,
                state.status.as_str(),
                serde_json::to_string(&state.active_alerts)?,
            ],
        )?;
        tx.commit()?;

        debug!("Upserted state for {} ({})", state.sensor_id, state.status);
        Ok(state)
    }

    /// Get the state document for a sensor.
    pub fn get_state(&self, sensor_id: &str) -> Result<Option<GreenhouseState>> {
        let conn = self.lock()?;
        select_state(&conn, sensor_id)
    }

    /// List all state documents, ordered by sensor id.
    pub fn list_states(&self) -> Result<Vec<GreenhouseState>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATE_COLUMNS} FROM greenhouse_state ORDER BY sensor_id"
        ))?;
        let rows = stmt
            .query_map([], StateRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(StateRow::into_state).collect()
    }
}

// History operations
impl Store {
    /// Append a history record.
    ///
    /// Returns `false` (and leaves the stored row untouched) if a record for
    /// the same sensor and timestamp already exists.
    pub fn append_history(&self, record: &HistoryRecord) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO history ({HISTORY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                record.sensor_id,
                to_nanos(record.timestamp)?,
                record.temperature_c,
                record.humidity_rh,
                record.soil_moisture,
                record.co2_ppm,
                record.par_umol,
                record.soil_ec,
                record.battery_level,
                record.vpd_kpa,
                record.dew_point_c,
            ],
        )?;

        Ok(inserted == 1)
    }

    /// Query history records with filters.
    pub fn query_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let (where_clause, params) = query.build_where()?;
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM history {where_clause}{}",
            query.build_tail()
        );
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(1)?,
                    HistoryRecord {
                        sensor_id: row.get(0)?,
                        timestamp: time::OffsetDateTime::UNIX_EPOCH,
                        temperature_c: row.get(2)?,
                        humidity_rh: row.get(3)?,
                        soil_moisture: row.get(4)?,
                        co2_ppm: row.get(5)?,
                        par_umol: row.get(6)?,
                        soil_ec: row.get(7)?,
                        battery_level: row.get(8)?,
                        vpd_kpa: row.get(9)?,
                        dew_point_c: row.get(10)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(timestamp, mut record)| {
                record.timestamp = from_nanos(timestamp)?;
                Ok(record)
            })
            .collect()
    }

    /// Count history records, optionally for one sensor.
    pub fn count_history(&self, sensor_id: Option<&str>) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = match sensor_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM history WHERE sensor_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

#[async_trait]
impl StateStore for Store {
    async fn upsert_state(&self, update: StateUpdate) -> sentinel_core::Result<()> {
        Store::upsert_state(self, update)?;
        Ok(())
    }

    async fn get_state(&self, sensor_id: &str) -> sentinel_core::Result<Option<GreenhouseState>> {
        Ok(Store::get_state(self, sensor_id)?)
    }
}

#[async_trait]
impl HistoryStore for Store {
    async fn append(&self, record: &HistoryRecord) -> sentinel_core::Result<bool> {
        Ok(self.append_history(record)?)
    }
}

/// Raw column values of a `greenhouse_state` row.
struct StateRow {
    sensor_id: String,
    last_update: i64,
    last_reading_at: Option<i64>,
    current_temp: Option<f64>,
    current_humidity: Option<f64>,
    current_vpd: Option<f64>,
    current_co2: Option<f64>,
    status: String,
    active_alerts: String,
}

impl StateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sensor_id: row.get(0)?,
            last_update: row.get(1)?,
            last_reading_at: row.get(2)?,
            current_temp: row.get(3)?,
            current_humidity: row.get(4)?,
            current_vpd: row.get(5)?,
            current_co2: row.get(6)?,
            status: row.get(7)?,
            active_alerts: row.get(8)?,
        })
    }

    fn into_state(self) -> Result<GreenhouseState> {
        Ok(GreenhouseState {
            sensor_id: self.sensor_id,
            last_update: from_nanos(self.last_update)?,
            last_reading_at: self.last_reading_at.map(from_nanos).transpose()?,
            current_temp: self.current_temp,
            current_humidity: self.current_humidity,
            current_vpd: self.current_vpd,
            current_co2: self.current_co2,
            status: parse_status(&self.status)?,
            active_alerts: serde_json::from_str(&self.active_alerts)?,
        })
    }
}

fn select_state(conn: &Connection, sensor_id: &str) -> Result<Option<GreenhouseState>> {
    let row = conn
        .query_row(
            &format!("SELECT {STATE_COLUMNS} FROM greenhouse_state WHERE sensor_id = ?"),
            [sensor_id],
            StateRow::from_row,
        )
        .optional()?;
    row.map(StateRow::into_state).transpose()
}

fn parse_status(s: &str) -> Result<Status> {
    match s {
        "OK" => Ok(Status::Ok),
        "ALERT" => Ok(Status::Alert),
        other => Err(Error::InvalidStatus(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    fn update(sensor_id: &str, temp: f64, co2: Option<f64>) -> StateUpdate {
        let mut update = StateUpdate::new(sensor_id, OffsetDateTime::now_utc());
        update.current_temp = Some(temp);
        update.current_humidity = Some(55.0);
        update.current_co2 = co2;
        update.status = Some(Status::Ok);
        update.active_alerts = Some(vec![]);
        update
    }

    fn history(sensor_id: &str, timestamp: OffsetDateTime, temp: f64) -> HistoryRecord {
        HistoryRecord {
            sensor_id: sensor_id.to_string(),
            timestamp,
            temperature_c: temp,
            humidity_rh: 60.0,
            soil_moisture: None,
            co2_ppm: Some(420.0),
            par_umol: None,
            soil_ec: None,
            battery_level: Some(90.0),
            vpd_kpa: Some(0.935),
            dew_point_c: Some(12.0),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_states().unwrap().is_empty());
        assert_eq!(store.count_history(None).unwrap(), 0);
    }

    #[test]
    fn test_upsert_creates_and_reads_back() {
        let store = Store::open_in_memory().unwrap();
        let mut first = update("GH-001", 22.0, Some(480.0));
        first.last_reading_at = Some(datetime!(2024-05-01 12:00:00.5 UTC));
        first.status = Some(Status::Alert);
        first.active_alerts = Some(vec!["Low Humidity Alert: 35.0%".to_string()]);
        store.upsert_state(first).unwrap();

        let state = store.get_state("GH-001").unwrap().unwrap();
        assert_eq!(state.current_temp, Some(22.0));
        assert_eq!(state.current_co2, Some(480.0));
        assert_eq!(state.current_vpd, None);
        assert_eq!(state.status, Status::Alert);
        assert_eq!(state.active_alerts, vec!["Low Humidity Alert: 35.0%"]);
        assert_eq!(state.last_reading_at, Some(datetime!(2024-05-01 12:00:00.5 UTC)));
        assert!(store.get_state("GH-404").unwrap().is_none());
    }

    #[test]
    fn test_upsert_merges_absent_fields() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_state(update("GH-001", 22.0, Some(480.0))).unwrap();
        let merged = store.upsert_state(update("GH-001", 24.0, None)).unwrap();

        assert_eq!(merged.current_temp, Some(24.0));
        assert_eq!(merged.current_co2, Some(480.0));
        assert_eq!(store.get_state("GH-001").unwrap().unwrap(), merged);
    }

    #[test]
    fn test_list_states_sorted() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_state(update("GH-002", 20.0, None)).unwrap();
        store.upsert_state(update("GH-001", 21.0, None)).unwrap();

        let ids: Vec<String> = store
            .list_states()
            .unwrap()
            .into_iter()
            .map(|s| s.sensor_id)
            .collect();
        assert_eq!(ids, vec!["GH-001", "GH-002"]);
    }

    #[test]
    fn test_history_deduplication() {
        let store = Store::open_in_memory().unwrap();
        let ts = datetime!(2024-05-01 12:00:00 UTC);

        assert!(store.append_history(&history("GH-001", ts, 20.0)).unwrap());
        // Same key, different values: the stored record is kept.
        assert!(!store.append_history(&history("GH-001", ts, 99.0)).unwrap());
        // Same timestamp on another sensor is a different key.
        assert!(store.append_history(&history("GH-002", ts, 20.0)).unwrap());

        assert_eq!(store.count_history(Some("GH-001")).unwrap(), 1);
        assert_eq!(store.count_history(None).unwrap(), 2);

        let records = store.query_history(&HistoryQuery::new().sensor("GH-001")).unwrap();
        assert_eq!(records[0].temperature_c, 20.0);
    }

    #[test]
    fn test_sub_second_timestamps_are_distinct() {
        let store = Store::open_in_memory().unwrap();
        let ts = datetime!(2024-05-01 12:00:00 UTC);
        assert!(store.append_history(&history("GH-001", ts, 20.0)).unwrap());
        assert!(
            store
                .append_history(&history("GH-001", ts + Duration::milliseconds(250), 20.5))
                .unwrap()
        );
        assert_eq!(store.count_history(None).unwrap(), 2);
    }

    #[test]
    fn test_query_history_filters_and_order() {
        let store = Store::open_in_memory().unwrap();
        let base = datetime!(2024-05-01 12:00:00 UTC);
        // Appended out of order.
        for minutes in [20, 0, 10, 30] {
            store
                .append_history(&history("GH-001", base + Duration::minutes(minutes), minutes as f64))
                .unwrap();
        }
        store.append_history(&history("GH-002", base, 1.0)).unwrap();

        let newest = store
            .query_history(&HistoryQuery::new().sensor("GH-001").limit(2))
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].timestamp, base + Duration::minutes(30));
        assert_eq!(newest[1].timestamp, base + Duration::minutes(20));

        let window = store
            .query_history(
                &HistoryQuery::new()
                    .sensor("GH-001")
                    .since(base + Duration::minutes(10))
                    .until(base + Duration::minutes(20))
                    .oldest_first(),
            )
            .unwrap();
        let temps: Vec<f64> = window.iter().map(|r| r.temperature_c).collect();
        assert_eq!(temps, vec![10.0, 20.0]);

        let page = store
            .query_history(&HistoryQuery::new().sensor("GH-001").oldest_first().offset(3))
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].co2_ppm, Some(420.0));
        assert_eq!(page[0].soil_moisture, None);
    }

    #[tokio::test]
    async fn test_trait_impls() {
        let store = Store::open_in_memory().unwrap();
        StateStore::upsert_state(&store, update("GH-001", 22.0, None))
            .await
            .unwrap();
        let state = StateStore::get_state(&store, "GH-001").await.unwrap();
        assert_eq!(state.unwrap().current_temp, Some(22.0));

        let record = history("GH-001", datetime!(2024-05-01 12:00:00 UTC), 22.0);
        assert!(HistoryStore::append(&store, &record).await.unwrap());
        assert!(!HistoryStore::append(&store, &record).await.unwrap());
    }
}
