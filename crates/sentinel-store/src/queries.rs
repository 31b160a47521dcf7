//! Query builder for history records.
//!
//! # Example
//!
//! ```
//! use sentinel_store::{HistoryQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = HistoryQuery::new()
//!     .sensor("GH-001")
//!     .since(yesterday)
//!     .limit(50);
//!
//! let history = store.query_history(&query)?;
//! assert!(history.is_empty());
//! # Ok::<(), sentinel_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::error::Result;
use crate::to_nanos;

/// Fluent query builder for history records.
///
/// Use this to construct queries for [`Store::query_history`](crate::Store::query_history).
/// All filter methods are optional and can be chained in any order.
///
/// By default, queries return results ordered by `timestamp` descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct HistoryQuery {
    /// Filter by sensor ID (optional).
    pub sensor_id: Option<String>,
    /// Include only records at or after this time (optional).
    pub since: Option<OffsetDateTime>,
    /// Include only records at or before this time (optional).
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results to return (optional).
    pub limit: Option<u32>,
    /// Number of results to skip for pagination (optional).
    pub offset: Option<u32>,
    /// If true, order by timestamp descending (newest first). Default: true.
    pub newest_first: bool,
}

impl HistoryQuery {
    /// Create a new query with default settings.
    ///
    /// Default behavior:
    /// - No sensor filter (all sensors)
    /// - No time range filter
    /// - No limit (all matching records)
    /// - Ordered by newest first
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by sensor ID.
    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    /// Filter to records at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to records at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    ///
    /// Use with `limit()` for pagination. For example, to get page 3
    /// with 100 items per page: `.limit(100).offset(200)`.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first (ascending by `timestamp`).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> Result<(String, Vec<Box<dyn rusqlite::ToSql>>)> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref sensor_id) = self.sensor_id {
            conditions.push("sensor_id = ?");
            params.push(Box::new(sensor_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(to_nanos(since)?));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(to_nanos(until)?));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        Ok((where_clause, params))
    }

    /// Build the ORDER BY / LIMIT / OFFSET tail.
    pub(crate) fn build_tail(&self) -> String {
        let order = if self.newest_first { "DESC" } else { "ASC" };
        let mut sql = format!(" ORDER BY timestamp {order}, id {order}");

        // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}
