//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// Timestamps are stored as integer nanoseconds since the Unix epoch so
/// that sub-second readings keep distinct history keys and sort correctly.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Edge buffer: readings awaiting delivery.
        -- AUTOINCREMENT keeps ids strictly increasing even after the
        -- newest rows are deleted.
        CREATE TABLE IF NOT EXISTS pending_readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL
        );

        -- Live state, one row per sensor
        CREATE TABLE IF NOT EXISTS greenhouse_state (
            sensor_id TEXT PRIMARY KEY,
            last_update INTEGER NOT NULL,
            last_reading_at INTEGER,
            current_temp REAL,
            current_humidity REAL,
            current_vpd REAL,
            current_co2 REAL,
            status TEXT NOT NULL,
            active_alerts TEXT NOT NULL
        );

        -- Append-only history
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            temperature_c REAL NOT NULL,
            humidity_rh REAL NOT NULL,
            soil_moisture REAL,
            co2_ppm REAL,
            par_umol REAL,
            soil_ec REAL,
            battery_level REAL,
            vpd_kpa REAL,
            dew_point_c REAL,
            UNIQUE(sensor_id, timestamp)
        );
        CREATE INDEX IF NOT EXISTS idx_history_sensor_time
            ON history(sensor_id, timestamp);
        "#,
    )?;

    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    // No migrations exist yet; v1 is the first released schema.
    let _ = old_version;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
