//! In-process history store.
//!
//! Mirrors the database stores' semantics, including the per-table clock
//! basis, against a `SimulatedClock` so windowed lookups are deterministic
//! in tests: append a row, advance the clock past the threshold, read it
//! back.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{Clock, HistoryError, HistoryRow, HistoryStore, TableSpec, WriteMode};

/// Settable "now" shared by the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedClock {
    now: DateTime<Utc>,
}

impl SimulatedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        SimulatedClock { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn set(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    table: &'static str,
    timestamp: NaiveDateTime,
    row: HistoryRow,
}

#[derive(Debug, Clone)]
pub struct MemoryHistory {
    pub clock: SimulatedClock,
    rows: Vec<StoredRow>,
}

impl MemoryHistory {
    pub fn new(clock: SimulatedClock) -> Self {
        MemoryHistory { clock, rows: Vec::new() }
    }

    /// Number of rows stored in `table`.
    pub fn len(&self, table: &TableSpec) -> usize {
        self.rows.iter().filter(|r| r.table == table.name).count()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn age(&self, table: &TableSpec, timestamp: NaiveDateTime) -> chrono::Duration {
        self.clock.now_in(table.clock) - timestamp
    }

    fn rows_for<'a>(&'a self, table: &'a TableSpec, key: &'a str) -> impl Iterator<Item = &'a StoredRow> + 'a {
        self.rows
            .iter()
            .filter(move |r| r.table == table.name && r.row.key == key)
    }
}

fn threshold(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

impl HistoryStore for MemoryHistory {
    fn append(&mut self, table: &TableSpec, rows: &[HistoryRow]) -> Result<(), HistoryError> {
        // Validate the whole batch before storing any of it.
        for row in rows {
            for column in row.values.keys() {
                table.check_value_column(column)?;
            }
        }

        for row in rows {
            let timestamp = row.timestamp.unwrap_or_else(|| self.clock.now_in(table.clock));
            if table.write_mode == WriteMode::ReplaceOnConflict {
                self.rows.retain(|r| {
                    !(r.table == table.name && r.row.key == row.key && r.timestamp == timestamp)
                });
            }
            let mut stored = row.clone();
            stored.timestamp = Some(timestamp);
            self.rows.push(StoredRow { table: table.name, timestamp, row: stored });
        }
        Ok(())
    }

    fn most_recent_row_before(
        &mut self,
        table: &TableSpec,
        key: &str,
        older_than: Duration,
    ) -> Result<Option<HistoryRow>, HistoryError> {
        let limit = threshold(older_than);
        let mut latest: Option<&StoredRow> = None;
        for stored in self.rows_for(table, key) {
            if self.age(table, stored.timestamp) <= limit {
                continue;
            }
            // Later insertions win ties on timestamp.
            if latest.is_none_or(|l| stored.timestamp >= l.timestamp) {
                latest = Some(stored);
            }
        }
        Ok(latest.map(|s| s.row.clone()))
    }

    fn window_average(
        &mut self,
        table: &TableSpec,
        key: &str,
        field: &str,
        within: Duration,
    ) -> Result<Option<f64>, HistoryError> {
        table.check_value_column(field)?;
        let limit = threshold(within);
        let values: Vec<f64> = self
            .rows_for(table, key)
            .filter(|s| self.age(table, s.timestamp) < limit)
            .filter_map(|s| s.row.get(field))
            .collect();

        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }
}
