//! Durable edge buffer.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::{debug, info};

use sentinel_core::PendingBuffer;
use sentinel_types::{BufferedRecord, Reading};

use crate::error::{Error, Result};
use crate::{from_nanos, schema, to_nanos};

/// SQLite-backed queue of readings awaiting delivery.
///
/// Every operation runs under one connection lock, so enqueues from a
/// producer and drains from the sync agent never interleave. The database
/// runs with `synchronous = FULL`: an enqueue has reached stable storage by
/// the time it returns.
///
/// # Example
///
/// ```
/// use sentinel_store::Buffer;
/// use sentinel_types::Reading;
/// use time::macros::datetime;
///
/// let buffer = Buffer::open_in_memory()?;
/// let reading = Reading::builder("GH-001", datetime!(2024-05-01 12:00:00 UTC))
///     .temperature(22.0)
///     .humidity(60.0)
///     .build();
///
/// let id = buffer.enqueue(&reading)?;
/// let batch = buffer.peek_batch(10)?;
/// assert_eq!(batch[0].id, id);
///
/// buffer.acknowledge(&[id])?;
/// assert_eq!(buffer.count()?, 0);
/// # Ok::<(), sentinel_store::Error>(())
/// ```
pub struct Buffer {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").finish_non_exhaustive()
    }
}

impl Buffer {
    /// Open or create a buffer database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening edge buffer at {}", path.display());
        let conn = crate::connect(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default buffer location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_buffer_path())
    }

    /// Open an in-memory buffer (for testing).
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

    /// Append a reading. Returns its id once the row is committed.
    pub fn enqueue(&self, reading: &Reading) -> Result<i64> {
        let payload = reading.to_json()?;
        let enqueued_at = to_nanos(OffsetDateTime::now_utc())?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_readings (payload, enqueued_at) VALUES (?1, ?2)",
            rusqlite::params![payload, enqueued_at],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Buffered reading {} from {}", id, reading.sensor_id);
        Ok(id)
    }

    /// Up to `limit` pending records, oldest first. Nothing is removed.
    pub fn peek_batch(&self, limit: usize) -> Result<Vec<BufferedRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, payload, enqueued_at FROM pending_readings ORDER BY id ASC LIMIT ?",
        )?;

        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, payload, enqueued_at)| {
                Ok(BufferedRecord {
                    id,
                    payload,
                    enqueued_at: from_nanos(enqueued_at)?,
                })
            })
            .collect()
    }

    /// Remove exactly the given ids in one transaction.
    ///
    /// Ids that are not pending are ignored. Returns the number removed.
    pub fn acknowledge(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_readings WHERE id = ?")?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;

        debug!("Acknowledged {} of {} id(s)", removed, ids.len());
        Ok(removed)
    }

    /// Exact number of pending records.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_readings", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl PendingBuffer for Buffer {
    fn enqueue(&self, reading: &Reading) -> sentinel_core::Result<i64> {
        Ok(Buffer::enqueue(self, reading)?)
    }

    fn peek_batch(&self, limit: usize) -> sentinel_core::Result<Vec<BufferedRecord>> {
        Ok(Buffer::peek_batch(self, limit)?)
    }

    fn acknowledge(&self, ids: &[i64]) -> sentinel_core::Result<usize> {
        Ok(Buffer::acknowledge(self, ids)?)
    }

    fn count(&self) -> sentinel_core::Result<u64> {
        Ok(Buffer::count(self)?)
    }
}
