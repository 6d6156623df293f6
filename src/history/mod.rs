//! Historical reading store.
//!
//! Readings are kept in one time-ordered table per source. Rows are only
//! ever appended (or, for the indoor table, replaced by a row with the same
//! device and timestamp); this crate never updates or prunes history.
//!
//! Two clocks are in play and must not be unified: the particulate table
//! stores and compares local wall-clock time, the indoor table stores and
//! compares UTC. Rows already on disk depend on that split.
//!
//! Every store takes "now" from a `Clock` on the host, never from the
//! database, so all of them stamp and compare rows on the same basis.
//!
//! Submodules:
//! - `memory`: in-process store driven by a simulated clock.
//! - `sqlite_store`: the database file, the default store.
//! - `postgres_store`: a shared Postgres server, as an alternative.

pub mod memory;
pub mod postgres_store;
pub mod sqlite_store;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use thiserror::Error;

pub use memory::{MemoryHistory, SimulatedClock};
pub use postgres_store::PostgresHistory;
pub use sqlite_store::SqliteHistory;

/// Threshold used by every hour-over-hour lookup.
pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

// ---------------------------------------------------------------------------
// Table descriptions
// ---------------------------------------------------------------------------

/// Which wall clock a table's `datetime` column is written and compared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockBasis {
    /// The host's local time zone.
    Local,
    Utc,
}

impl ClockBasis {
    /// `instant` as a wall-clock reading in this basis.
    pub fn wall_clock(self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ClockBasis::Local => instant.with_timezone(&Local).naive_local(),
            ClockBasis::Utc => instant.naive_utc(),
        }
    }
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Where a store's "now" comes from.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn now_in(&self, basis: ClockBasis) -> NaiveDateTime {
        basis.wall_clock(self.now())
    }
}

/// The host clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Every append inserts a new row.
    Append,
    /// A row with the same key and timestamp replaces the existing one.
    ReplaceOnConflict,
}

/// Shape of one history table. Column names here are the only identifiers
/// ever interpolated into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub key_column: &'static str,
    pub label_columns: &'static [&'static str],
    pub value_columns: &'static [&'static str],
    pub clock: ClockBasis,
    pub write_mode: WriteMode,
}

impl TableSpec {
    pub fn has_value_column(&self, column: &str) -> bool {
        self.value_columns.contains(&column)
    }

    pub(crate) fn check_value_column(&self, column: &str) -> Result<(), HistoryError> {
        if self.has_value_column(column) {
            Ok(())
        } else {
            Err(HistoryError::UnknownField {
                table: self.name,
                field: column.to_string(),
            })
        }
    }
}

/// PurpleAir AQI history: one row per channel per run, keyed by channel tag.
pub static PURPLE_AIR_TABLE: TableSpec = TableSpec {
    name: "purple_air",
    key_column: "id",
    label_columns: &[],
    value_columns: &["aqi"],
    clock: ClockBasis::Local,
    write_mode: WriteMode::Append,
};

/// Awair history: one row per device snapshot, keyed by device identity.
pub static AWAIR_TABLE: TableSpec = TableSpec {
    name: "awair",
    key_column: "uuid",
    label_columns: &["location", "physical_location"],
    value_columns: &["temp", "co2", "humid", "voc", "dust"],
    clock: ClockBasis::Utc,
    write_mode: WriteMode::ReplaceOnConflict,
};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One persisted reading.
///
/// `timestamp` is in the table's clock basis; `None` on append means "the
/// store's current time". A `None` value is an empty column (e.g. dust on a
/// device without a particulate sensor).
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub timestamp: Option<NaiveDateTime>,
    pub key: String,
    pub labels: BTreeMap<String, String>,
    pub values: BTreeMap<String, Option<f64>>,
}

impl HistoryRow {
    pub fn new(key: impl Into<String>) -> HistoryRow {
        HistoryRow {
            timestamp: None,
            key: key.into(),
            labels: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn at(mut self, timestamp: NaiveDateTime) -> HistoryRow {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn label(mut self, column: &str, value: impl Into<String>) -> HistoryRow {
        self.labels.insert(column.to_string(), value.into());
        self
    }

    pub fn value(mut self, column: &str, value: Option<f64>) -> HistoryRow {
        self.values.insert(column.to_string(), value);
        self
    }

    /// Non-empty value of `column`, if any.
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
    #[error("database file error: {0}")]
    File(#[from] rusqlite::Error),
    #[error("unreadable timestamp '{0}' in history")]
    BadTimestamp(String),
    #[error("table '{table}' has no value column '{field}'")]
    UnknownField { table: &'static str, field: String },
    #[error("required tables missing: {0}")]
    MissingTables(String),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait HistoryStore {
    /// Write `rows` to `table` as one unit: either all are stored or none.
    fn append(&mut self, table: &TableSpec, rows: &[HistoryRow]) -> Result<(), HistoryError>;

    /// Latest row for `key` whose age is strictly greater than `older_than`.
    fn most_recent_row_before(
        &mut self,
        table: &TableSpec,
        key: &str,
        older_than: Duration,
    ) -> Result<Option<HistoryRow>, HistoryError>;

    /// Average of the non-empty `field` values for `key` whose age is
    /// strictly less than `within`.
    fn window_average(
        &mut self,
        table: &TableSpec,
        key: &str,
        field: &str,
        within: Duration,
    ) -> Result<Option<f64>, HistoryError>;

    /// `field` of the latest row older than `older_than`.
    ///
    /// Only that one row is consulted: if it has no value for `field` the
    /// result is `None`, even when an older row does.
    fn most_recent_before(
        &mut self,
        table: &TableSpec,
        key: &str,
        field: &str,
        older_than: Duration,
    ) -> Result<Option<f64>, HistoryError> {
        table.check_value_column(field)?;
        Ok(self
            .most_recent_row_before(table, key, older_than)?
            .and_then(|row| row.get(field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_specs_match_persisted_schema() {
        assert_eq!(PURPLE_AIR_TABLE.key_column, "id");
        assert_eq!(PURPLE_AIR_TABLE.clock, ClockBasis::Local);
        assert_eq!(PURPLE_AIR_TABLE.write_mode, WriteMode::Append);
        assert_eq!(AWAIR_TABLE.key_column, "uuid");
        assert_eq!(AWAIR_TABLE.clock, ClockBasis::Utc);
        assert_eq!(AWAIR_TABLE.write_mode, WriteMode::ReplaceOnConflict);
    }

    #[test]
    fn test_unknown_value_column_rejected() {
        assert!(AWAIR_TABLE.check_value_column("dust").is_ok());
        let err = AWAIR_TABLE
            .check_value_column("dust; drop table awair")
            .expect_err("injected column name must be rejected");
        assert!(matches!(err, HistoryError::UnknownField { table: "awair", .. }));
    }

    #[test]
    fn test_wall_clock_per_basis() {
        use chrono::TimeZone;
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        assert_eq!(ClockBasis::Utc.wall_clock(instant), instant.naive_utc());
        assert_eq!(
            ClockBasis::Local.wall_clock(instant),
            instant.with_timezone(&Local).naive_local()
        );
    }

    #[test]
    fn test_row_get_treats_empty_as_absent() {
        let row = HistoryRow::new("awair_1")
            .value("dust", None)
            .value("temp", Some(70.1));
        assert_eq!(row.get("dust"), None);
        assert_eq!(row.get("temp"), Some(70.1));
        assert_eq!(row.get("voc"), None);
    }
}
