/// Postgres-backed history store
///
/// For deployments that share one history server between hosts. Rows are
/// stamped and compared with the host's clock in each table's basis, never
/// the server session's time zone. Reference DDL for both tables lives in
/// `sql/001_history_schema.sql`.

use std::time::Duration;

use chrono::NaiveDateTime;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};

use super::{Clock, HistoryError, HistoryRow, HistoryStore, SystemClock, TableSpec, WriteMode};

pub struct PostgresHistory<C: Clock = SystemClock> {
    client: Client,
    pub clock: C,
}

impl PostgresHistory {
    pub fn connect(database_url: &str) -> Result<Self, HistoryError> {
        let client = Client::connect(database_url, NoTls)?;
        Ok(PostgresHistory { client, clock: SystemClock })
    }

    /// Connect and check that every table in `tables` exists.
    pub fn connect_and_verify(database_url: &str, tables: &[&TableSpec]) -> Result<Self, HistoryError> {
        let mut history = Self::connect(database_url)?;
        history.verify_tables(tables)?;
        Ok(history)
    }
}

impl<C: Clock> PostgresHistory<C> {
    pub fn verify_tables(&mut self, tables: &[&TableSpec]) -> Result<(), HistoryError> {
        let mut missing = Vec::new();
        for table in tables {
            let row = self.client.query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM information_schema.tables
                     WHERE table_name = $1
                 )",
                &[&table.name],
            )?;
            let exists: bool = row.get(0);
            if !exists {
                missing.push(table.name);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HistoryError::MissingTables(missing.join(", ")))
        }
    }
}

// ---------------------------------------------------------------------------
// SQL construction
// ---------------------------------------------------------------------------

/// `INSERT` for one row; `$1` is the timestamp, `$2` the key, then labels
/// and values in table order.
pub(crate) fn insert_sql(table: &TableSpec) -> String {
    let mut columns = vec!["datetime", table.key_column];
    let mut placeholders = vec!["$1::timestamp".to_string(), "$2::text".to_string()];
    for column in table.label_columns.iter().copied() {
        columns.push(column);
        placeholders.push(format!("${}::text", placeholders.len() + 1));
    }
    for column in table.value_columns.iter().copied() {
        columns.push(column);
        placeholders.push(format!("${}::float8", placeholders.len() + 1));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders.join(", ")
    );

    if table.write_mode == WriteMode::ReplaceOnConflict {
        let updates: Vec<String> = table
            .label_columns
            .iter()
            .chain(table.value_columns)
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        sql.push_str(&format!(
            " ON CONFLICT ({}, datetime) DO UPDATE SET {}",
            table.key_column,
            updates.join(", ")
        ));
    }
    sql
}

fn select_columns(table: &TableSpec) -> String {
    let mut columns = vec!["datetime".to_string(), format!("{}::text", table.key_column)];
    columns.extend(table.label_columns.iter().map(|c| format!("{}::text", c)));
    columns.extend(table.value_columns.iter().map(|c| format!("{}::float8", c)));
    columns.join(", ")
}

/// `$1` key, `$2` threshold in seconds, `$3` now in the table's basis.
pub(crate) fn most_recent_sql(table: &TableSpec) -> String {
    format!(
        "SELECT {} FROM {}
         WHERE {} = $1
           AND datetime < $3::timestamp - make_interval(secs => $2::float8)
         ORDER BY datetime DESC
         LIMIT 1",
        select_columns(table),
        table.name,
        table.key_column
    )
}

pub(crate) fn window_average_sql(table: &TableSpec, field: &str) -> String {
    format!(
        "SELECT AVG({field})::float8 FROM {}
         WHERE {} = $1
           AND datetime > $3::timestamp - make_interval(secs => $2::float8)
           AND {field} IS NOT NULL",
        table.name, table.key_column
    )
}

fn row_to_history(table: &TableSpec, row: &Row) -> HistoryRow {
    let timestamp: NaiveDateTime = row.get(0);
    let mut history = HistoryRow::new(row.get::<_, String>(1)).at(timestamp);
    let mut index = 2;
    for column in table.label_columns {
        let label: Option<String> = row.get(index);
        if let Some(label) = label {
            history = history.label(column, label);
        }
        index += 1;
    }
    for column in table.value_columns {
        let value: Option<f64> = row.get(index);
        history = history.value(column, value);
        index += 1;
    }
    history
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

impl<C: Clock> HistoryStore for PostgresHistory<C> {
    fn append(&mut self, table: &TableSpec, rows: &[HistoryRow]) -> Result<(), HistoryError> {
        for row in rows {
            for column in row.values.keys() {
                table.check_value_column(column)?;
            }
        }

        let now = self.clock.now_in(table.clock);
        let sql = insert_sql(table);
        let mut transaction = self.client.transaction()?;
        let statement = transaction.prepare(&sql)?;

        for row in rows {
            let timestamp = row.timestamp.unwrap_or(now);
            let labels: Vec<Option<String>> = table
                .label_columns
                .iter()
                .map(|c| row.labels.get(*c).cloned())
                .collect();
            let values: Vec<Option<f64>> = table.value_columns.iter().map(|c| row.get(c)).collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = vec![&timestamp, &row.key];
            params.extend(labels.iter().map(|l| l as &(dyn ToSql + Sync)));
            params.extend(values.iter().map(|v| v as &(dyn ToSql + Sync)));

            transaction.execute(&statement, &params)?;
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
        let secs = older_than.as_secs_f64();
        let now = self.clock.now_in(table.clock);
        let row = self
            .client
            .query_opt(most_recent_sql(table).as_str(), &[&key, &secs, &now])?;
        Ok(row.map(|r| row_to_history(table, &r)))
    }

    fn window_average(
        &mut self,
        table: &TableSpec,
        key: &str,
        field: &str,
        within: Duration,
    ) -> Result<Option<f64>, HistoryError> {
        table.check_value_column(field)?;
        let secs = within.as_secs_f64();
        let now = self.clock.now_in(table.clock);
        let row = self
            .client
            .query_one(window_average_sql(table, field).as_str(), &[&key, &secs, &now])?;
        Ok(row.get(0))
    }
}
