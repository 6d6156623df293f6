/// Integration tests for the Postgres history store
///
/// These tests verify:
/// 1. Both history tables exist
/// 2. Rows round-trip through append and the windowed lookups
/// 3. The indoor table replaces rows with the same device and timestamp
/// 4. Local-time rows are stamped and compared with the host clock
///
/// Prerequisites:
/// - PostgreSQL with sql/001_history_schema.sql applied
/// - DATABASE_URL set in .env
///
/// Run with: cargo test --test history_postgres_integration -- --ignored --test-threads=1

use std::env;

use aqmon_service::history::{
    Clock, ClockBasis, HistoryRow, HistoryStore, PostgresHistory, SystemClock, AWAIR_TABLE, ONE_HOUR,
    PURPLE_AIR_TABLE,
};
use chrono::Utc;
use postgres::{Client, NoTls};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn database_url() -> String {
    dotenv::dotenv().ok();
    env::var("DATABASE_URL").expect("DATABASE_URL must be set")
}

fn setup_store() -> PostgresHistory {
    PostgresHistory::connect_and_verify(&database_url(), &[&PURPLE_AIR_TABLE, &AWAIR_TABLE]).unwrap_or_else(|e| {
        eprintln!("\n{}\n", "=".repeat(80));
        eprintln!("INTEGRATION TEST SETUP ERROR: {}", e);
        eprintln!("Apply the schema first:\n  psql \"$DATABASE_URL\" -f sql/001_history_schema.sql\n");
        panic!("history tables missing");
    })
}

fn cleanup(key_column: &str, table: &str, key: &str) {
    let mut client = Client::connect(&database_url(), NoTls).expect("connect for cleanup");
    client
        .execute(&format!("DELETE FROM {} WHERE {} = $1", table, key_column), &[&key])
        .expect("cleanup");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_tables_exist() {
    let _store = setup_store();
}

#[test]
#[ignore]
fn test_awair_rows_round_trip_and_replace() {
    let key = "test-device_1";
    cleanup("uuid", "awair", key);
    let mut store = setup_store();

    let two_hours_ago = (Utc::now() - chrono::Duration::hours(2)).naive_utc();
    let row = |temp: f64| {
        HistoryRow::new(key)
            .at(two_hours_ago)
            .label("location", "Test Room")
            .label("physical_location", "Test Home")
            .value("temp", Some(temp))
            .value("co2", Some(500.0))
            .value("humid", Some(40.0))
            .value("voc", Some(100.0))
            .value("dust", None)
    };

    store.append(&AWAIR_TABLE, &[row(70.0)]).expect("first append");
    store.append(&AWAIR_TABLE, &[row(71.5)]).expect("replacing append");

    let stored = store
        .most_recent_row_before(&AWAIR_TABLE, key, ONE_HOUR)
        .expect("lookup")
        .expect("row older than an hour");
    assert_eq!(stored.get("temp"), Some(71.5), "second append replaces the first");
    assert_eq!(stored.get("dust"), None);
    assert_eq!(stored.labels["location"], "Test Room");

    let recent = store
        .window_average(&AWAIR_TABLE, key, "temp", ONE_HOUR)
        .expect("window average");
    assert_eq!(recent, None, "a two-hour-old row is outside the window");

    cleanup("uuid", "awair", key);
}

#[test]
#[ignore]
fn test_awair_window_average_skips_null_dust() {
    let key = "test-device_2";
    cleanup("uuid", "awair", key);
    let mut store = setup_store();

    let now = Utc::now();
    let rows: Vec<HistoryRow> = [(10, Some(40.0)), (20, Some(60.0)), (30, None)]
        .into_iter()
        .map(|(minutes, dust)| {
            HistoryRow::new(key)
                .at((now - chrono::Duration::minutes(minutes)).naive_utc())
                .label("location", "Test Room")
                .label("physical_location", "Test Home")
                .value("temp", Some(70.0))
                .value("dust", dust)
        })
        .collect();
    store.append(&AWAIR_TABLE, &rows).expect("append");

    let average = store
        .window_average(&AWAIR_TABLE, key, "dust", ONE_HOUR)
        .expect("window average");
    assert_eq!(average, Some(50.0));

    cleanup("uuid", "awair", key);
}

#[test]
#[ignore]
fn test_purple_air_rows_use_host_local_time() {
    let key = "vtest";
    cleanup("id", "purple_air", key);
    let mut store = setup_store();

    let local_now = SystemClock.now_in(ClockBasis::Local);
    store
        .append(
            &PURPLE_AIR_TABLE,
            &[
                HistoryRow::new(key)
                    .at(local_now - chrono::Duration::minutes(90))
                    .value("aqi", Some(42.0)),
                HistoryRow::new(key).value("aqi", Some(55.0)),
            ],
        )
        .expect("append");

    let baseline = store
        .most_recent_row_before(&PURPLE_AIR_TABLE, key, ONE_HOUR)
        .expect("lookup")
        .expect("the 90-minute-old row qualifies");
    assert_eq!(baseline.get("aqi"), Some(42.0));
    assert_eq!(
        baseline.timestamp.map(|t| t.and_utc().timestamp()),
        Some((local_now - chrono::Duration::minutes(90)).and_utc().timestamp()),
        "stored in host local time regardless of the server time zone"
    );

    cleanup("id", "purple_air", key);
}
