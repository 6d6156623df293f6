/// Database-file history store
///
/// Reads and writes the same file layout earlier deployments of this
/// service produced, so an existing history file keeps working:
/// `purple_air` timestamps are local wall-clock text (`YYYY-MM-DD HH:MM:SS`),
/// `awair` timestamps are the vendor's UTC ISO-8601 strings, and value
/// columns may hold numbers, numeric text, or `''` for a missing reading.
///
/// Ages are compared in whole seconds. "Now" comes from the store's clock
/// and is passed into every statement.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    Clock, ClockBasis, HistoryError, HistoryRow, HistoryStore, SystemClock, TableSpec, WriteMode,
    AWAIR_TABLE, PURPLE_AIR_TABLE,
};

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Seconds since the epoch of a stored timestamp, read as written.
const STORED_SECS: &str = "CAST(strftime('%s', datetime) AS INTEGER)";

pub struct SqliteHistory<C: Clock = SystemClock> {
    conn: Connection,
    pub clock: C,
}

impl SqliteHistory {
    /// Open the history file at `path`, creating it and any missing tables.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        SqliteHistory::with_connection(Connection::open(path)?, SystemClock)
    }
}

impl<C: Clock> SqliteHistory<C> {
    pub fn with_connection(conn: Connection, clock: C) -> Result<Self, HistoryError> {
        for table in [&PURPLE_AIR_TABLE, &AWAIR_TABLE] {
            conn.execute_batch(&create_table_sql(table))?;
        }
        Ok(SqliteHistory { conn, clock })
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory(clock: C) -> Result<Self, HistoryError> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn now_secs(&self, table: &TableSpec) -> i64 {
        self.clock.now_in(table.clock).and_utc().timestamp()
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

fn format_timestamp(basis: ClockBasis, timestamp: NaiveDateTime) -> String {
    match basis {
        ClockBasis::Local => timestamp.format(LOCAL_FORMAT).to_string(),
        ClockBasis::Utc => timestamp.format(UTC_FORMAT).to_string(),
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, HistoryError> {
    NaiveDateTime::parse_from_str(text, LOCAL_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.fZ"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| DateTime::parse_from_rfc3339(text).map(|t| t.naive_utc()))
        .map_err(|_| HistoryError::BadTimestamp(text.to_string()))
}

fn whole_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// SQL construction
// ---------------------------------------------------------------------------

pub(crate) fn create_table_sql(table: &TableSpec) -> String {
    let mut columns = vec![
        "datetime TEXT NOT NULL".to_string(),
        format!("{} TEXT NOT NULL", table.key_column),
    ];
    columns.extend(table.label_columns.iter().map(|c| format!("{} TEXT", c)));
    columns.extend(table.value_columns.iter().map(|c| format!("{} REAL", c)));
    if table.write_mode == WriteMode::ReplaceOnConflict {
        columns.push(format!("PRIMARY KEY ({}, datetime)", table.key_column));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {name} ({columns});
         CREATE INDEX IF NOT EXISTS {name}_{key}_datetime ON {name} ({key}, datetime);",
        name = table.name,
        key = table.key_column,
        columns = columns.join(", ")
    )
}

pub(crate) fn insert_sql(table: &TableSpec) -> String {
    let mut columns = vec!["datetime", table.key_column];
    columns.extend(table.label_columns.iter().copied());
    columns.extend(table.value_columns.iter().copied());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn delete_same_timestamp_sql(table: &TableSpec) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1 AND datetime = ?2",
        table.name, table.key_column
    )
}

fn select_columns(table: &TableSpec) -> String {
    let mut columns = vec!["datetime", table.key_column];
    columns.extend(table.label_columns.iter().copied());
    columns.extend(table.value_columns.iter().copied());
    columns.join(", ")
}

/// `?1` key, `?2` now in epoch seconds, `?3` threshold in seconds.
pub(crate) fn most_recent_sql(table: &TableSpec) -> String {
    format!(
        "SELECT {} FROM {}
         WHERE {} = ?1
           AND ?2 - {STORED_SECS} > ?3
         ORDER BY {STORED_SECS} DESC, rowid DESC
         LIMIT 1",
        select_columns(table),
        table.name,
        table.key_column
    )
}

pub(crate) fn window_average_sql(table: &TableSpec, field: &str) -> String {
    format!(
        "SELECT AVG({field}) FROM {}
         WHERE {} = ?1
           AND ?2 - {STORED_SECS} < ?3
           AND {field} IS NOT NULL
           AND {field} != ''",
        table.name, table.key_column
    )
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Column values as stored, before timestamp and number parsing.
struct RawRow {
    datetime: String,
    key: String,
    labels: Vec<Option<String>>,
    values: Vec<Value>,
}

fn read_raw(table: &TableSpec, row: &Row<'_>) -> rusqlite::Result<RawRow> {
    let labels_start = 2;
    let values_start = labels_start + table.label_columns.len();
    Ok(RawRow {
        datetime: row.get(0)?,
        key: row.get(1)?,
        labels: (0..table.label_columns.len())
            .map(|i| row.get(labels_start + i))
            .collect::<rusqlite::Result<_>>()?,
        values: (0..table.value_columns.len())
            .map(|i| row.get(values_start + i))
            .collect::<rusqlite::Result<_>>()?,
    })
}

/// Numbers and numeric text are values; NULL, `''` and anything else are empty.
fn stored_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Real(f) => Some(*f),
        Value::Text(t) => t.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    }
}

fn into_history_row(table: &TableSpec, raw: RawRow) -> Result<HistoryRow, HistoryError> {
    let mut row = HistoryRow::new(raw.key).at(parse_timestamp(&raw.datetime)?);
    for (column, label) in table.label_columns.iter().zip(raw.labels) {
        if let Some(label) = label {
            row = row.label(column, label);
        }
    }
    for (column, value) in table.value_columns.iter().zip(&raw.values) {
        row = row.value(column, stored_number(value));
    }
    Ok(row)
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

impl<C: Clock> HistoryStore for SqliteHistory<C> {
    fn append(&mut self, table: &TableSpec, rows: &[HistoryRow]) -> Result<(), HistoryError> {
        for row in rows {
            for column in row.values.keys() {
                table.check_value_column(column)?;
            }
        }

        let now = self.clock.now_in(table.clock);
        let transaction = self.conn.transaction()?;
        {
            let mut insert = transaction.prepare(&insert_sql(table))?;
            let mut replace = match table.write_mode {
                WriteMode::ReplaceOnConflict => Some(transaction.prepare(&delete_same_timestamp_sql(table))?),
                WriteMode::Append => None,
            };

            for row in rows {
                let stamp = format_timestamp(table.clock, row.timestamp.unwrap_or(now));
                if let Some(delete) = replace.as_mut() {
                    delete.execute(params![row.key, stamp])?;
                }

                let mut values = vec![Value::Text(stamp), Value::Text(row.key.clone())];
                values.extend(
                    table
                        .label_columns
                        .iter()
                        .map(|c| row.labels.get(*c).cloned().map_or(Value::Null, Value::Text)),
                );
                values.extend(
                    table
                        .value_columns
                        .iter()
                        .map(|c| row.get(c).map_or(Value::Null, Value::Real)),
                );
                insert.execute(params_from_iter(values))?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    fn most_recent_row_before(
        &mut self,
        table: &TableSpec,
        key: &str,
        older_than: Duration,
    ) -> Result<Option<HistoryRow>, HistoryError> {
        let now = self.now_secs(table);
        let raw = self
            .conn
            .query_row(
                &most_recent_sql(table),
                params![key, now, whole_secs(older_than)],
                |row| read_raw(table, row),
            )
            .optional()?;
        raw.map(|r| into_history_row(table, r)).transpose()
    }

    fn window_average(
        &mut self,
        table: &TableSpec,
        key: &str,
        field: &str,
        within: Duration,
    ) -> Result<Option<f64>, HistoryError> {
        table.check_value_column(field)?;
        let now = self.now_secs(table);
        let average = self.conn.query_row(
            &window_average_sql(table, field),
            params![key, now, whole_secs(within)],
            |row| row.get::<_, Option<f64>>(0),
        )?;
        Ok(average)
    }
}
