//! Local data persistence for the greenhouse sensor pipeline.
//!
//! This crate provides SQLite-based storage for both ends of the pipeline:
//!
//! - [`Buffer`]: the durable edge buffer drained by the sync agent
//! - [`Store`]: cloud-side live state (merge-upsert) and append-only history
//!
//! Both implement the storage traits from `sentinel-core`, so they can be
//! handed to a `SyncAgent` or an `IngestionGateway` directly.
//!
//! # Example
//!
//! ```no_run
//! use sentinel_store::{HistoryQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! let query = HistoryQuery::new()
//!     .sensor("GH-001")
//!     .limit(10);
//! let history = store.query_history(&query)?;
//! # Ok::<(), sentinel_store::Error>(())
//! ```

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use time::OffsetDateTime;

mod buffer;
mod error;
mod queries;
mod schema;
mod store;

pub use buffer::Buffer;
pub use error::{Error, Result};
pub use queries::HistoryQuery;
pub use store::Store;

/// Default edge buffer path following platform conventions.
///
/// - Linux: `~/.local/share/agro-sentinel/buffer.db`
/// - macOS: `~/Library/Application Support/agro-sentinel/buffer.db`
/// - Windows: `C:\Users\<user>\AppData\Local\agro-sentinel\buffer.db`
pub fn default_buffer_path() -> PathBuf {
    data_dir().join("buffer.db")
}

/// Default cloud database path, next to the buffer.
pub fn default_db_path() -> PathBuf {
    data_dir().join("sentinel.db")
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agro-sentinel")
}

/// Open a file-backed connection with the pragmas both databases rely on.
fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // FULL: a committed enqueue survives power loss, not just a crash.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;

    schema::initialize(&conn)?;
    Ok(conn)
}

pub(crate) fn to_nanos(ts: OffsetDateTime) -> Result<i64> {
    i64::try_from(ts.unix_timestamp_nanos()).map_err(|_| Error::InvalidTimestamp(ts.to_string()))
}

pub(crate) fn from_nanos(nanos: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(nanos.into())
        .map_err(|_| Error::InvalidTimestamp(nanos.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_nanos_round_trip_keeps_fraction() {
        let ts = datetime!(2024-05-01 12:00:00.123456789 UTC);
        assert_eq!(from_nanos(to_nanos(ts).unwrap()).unwrap(), ts);
    }

    #[test]
    fn test_nanos_out_of_range() {
        let far = datetime!(2300-01-01 00:00:00 UTC);
        assert!(matches!(to_nanos(far), Err(Error::InvalidTimestamp(_))));
    }

    #[test]
    fn test_default_paths_share_directory() {
        assert_eq!(default_buffer_path().parent(), default_db_path().parent());
        assert!(default_db_path().ends_with("agro-sentinel/sentinel.db"));
    }
}
