//! One fetch-compute-store-publish cycle, shared by every sensor source.
//!
//! A source plugs in through `SensorSource`: it knows how to fetch its raw
//! payload, turn it into readings, key and persist them, and derive the
//! messages to publish. `run_cycle` drives those steps in a fixed order:
//!
//! 1. fetch and normalize,
//! 2. derive every publication (history is only read here),
//! 3. append all history rows in one batch, unless persistence is off,
//! 4. publish, unless publishing is off.
//!
//! Any error before step 3 leaves the store and broker untouched.
//!
//! Submodules:
//! - `purpleair`: particulate stations.
//! - `awair`: indoor monitors.

pub mod awair;
pub mod purpleair;

use chrono::{DateTime, Utc};

use crate::history::{HistoryRow, HistoryStore, TableSpec};
use crate::logging::{self, DataSource};
use crate::model::PipelineError;
use crate::publish::{Publication, Publisher};

pub use awair::AwairSource;
pub use purpleair::PurpleAirSource;

/// A vendor data source.
pub trait SensorSource {
    /// Decoded vendor response(s) for one run.
    type Payload;
    /// Canonical reading produced by the normalizer.
    type Reading;

    /// Short name used for lock files and log lines, e.g. `purpleair`.
    fn name(&self) -> &'static str;

    fn data_source(&self) -> DataSource;

    /// History table this source writes.
    fn table(&self) -> &'static TableSpec;

    fn fetch(&self) -> Result<Self::Payload, PipelineError>;

    fn normalize(&self, payload: Self::Payload, now: DateTime<Utc>) -> Result<Vec<Self::Reading>, PipelineError>;

    /// Stable sensor identity used to key history.
    fn identity_key(&self, reading: &Self::Reading) -> String;

    fn history_rows(&self, reading: &Self::Reading) -> Vec<HistoryRow>;

    /// Messages for one reading. Reads history but must not write it.
    fn derive(
        &self,
        reading: &Self::Reading,
        history: &mut dyn HistoryStore,
    ) -> Result<Vec<Publication>, PipelineError>;
}

/// `--nosave` / `--nomqtt` switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOptions {
    pub persist: bool,
    pub publish: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        CycleOptions { persist: true, publish: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub readings: usize,
    pub rows_written: usize,
    pub published: usize,
}

/// Run one cycle for `source` at time `now`.
pub fn run_cycle<S: SensorSource>(
    source: &S,
    history: &mut dyn HistoryStore,
    publisher: &mut dyn Publisher,
    options: CycleOptions,
    now: DateTime<Utc>,
) -> Result<CycleSummary, PipelineError> {
    let data_source = source.data_source();

    let payload = source.fetch()?;
    let readings = source.normalize(payload, now)?;

    let mut rows = Vec::new();
    let mut publications = Vec::new();
    for reading in &readings {
        let key = source.identity_key(reading);
        let messages = source.derive(reading, history)?;
        logging::debug(
            data_source,
            Some(&key),
            &format!("derived {} message(s)", messages.len()),
        );
        publications.extend(messages);
        rows.extend(source.history_rows(reading));
    }

    let mut summary = CycleSummary {
        readings: readings.len(),
        ..CycleSummary::default()
    };

    if options.persist && !rows.is_empty() {
        history.append(source.table(), &rows)?;
        summary.rows_written = rows.len();
    }

    if options.publish && !publications.is_empty() {
        publisher.publish_all(&publications)?;
        summary.published = publications.len();
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{MemoryHistory, SimulatedClock, PURPLE_AIR_TABLE};
    use crate::publish::RecordingPublisher;
    use chrono::TimeZone;

    /// Minimal source: each reading is a number, stored and published as-is.
    struct Numbers {
        values: Vec<f64>,
        fail_derive_at: Option<usize>,
    }

    impl SensorSource for Numbers {
        type Payload = Vec<f64>;
        type Reading = (usize, f64);

        fn name(&self) -> &'static str {
            "numbers"
        }

        fn data_source(&self) -> DataSource {
            DataSource::System
        }

        fn table(&self) -> &'static TableSpec {
            &PURPLE_AIR_TABLE
        }

        fn fetch(&self) -> Result<Vec<f64>, PipelineError> {
            Ok(self.values.clone())
        }

        fn normalize(&self, payload: Vec<f64>, _now: DateTime<Utc>) -> Result<Vec<(usize, f64)>, PipelineError> {
            Ok(payload.into_iter().enumerate().collect())
        }

        fn identity_key(&self, reading: &(usize, f64)) -> String {
            format!("n{}", reading.0)
        }

        fn history_rows(&self, reading: &(usize, f64)) -> Vec<HistoryRow> {
            vec![HistoryRow::new(self.identity_key(reading)).value("aqi", Some(reading.1))]
        }

        fn derive(
            &self,
            reading: &(usize, f64),
            _history: &mut dyn HistoryStore,
        ) -> Result<Vec<Publication>, PipelineError> {
            if self.fail_derive_at == Some(reading.0) {
                return Err(PipelineError::MalformedPayload("bad reading".to_string()));
            }
            Ok(vec![Publication {
                topic: format!("numbers/{}", reading.0),
                payload: reading.1.to_string(),
                retain: true,
            }])
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_cycle_persists_and_publishes() {
        let source = Numbers { values: vec![1.0, 2.0], fail_derive_at: None };
        let mut history = MemoryHistory::new(SimulatedClock::new(fixed_now()));
        let mut publisher = RecordingPublisher::new();

        let summary = run_cycle(&source, &mut history, &mut publisher, CycleOptions::default(), fixed_now())
            .expect("cycle");

        assert_eq!(summary, CycleSummary { readings: 2, rows_written: 2, published: 2 });
        assert_eq!(history.len(&PURPLE_AIR_TABLE), 2);
        assert_eq!(publisher.topics(), vec!["numbers/0", "numbers/1"]);
    }

    #[test]
    fn test_failure_in_any_reading_writes_nothing() {
        let source = Numbers { values: vec![1.0, 2.0, 3.0], fail_derive_at: Some(2) };
        let mut history = MemoryHistory::new(SimulatedClock::new(fixed_now()));
        let mut publisher = RecordingPublisher::new();

        let result = run_cycle(&source, &mut history, &mut publisher, CycleOptions::default(), fixed_now());

        assert!(matches!(result, Err(PipelineError::MalformedPayload(_))));
        assert!(history.is_empty());
        assert!(publisher.published.is_empty());
    }

    #[test]
    fn test_switches_disable_store_and_publish() {
        let source = Numbers { values: vec![1.0], fail_derive_at: None };
        let mut history = MemoryHistory::new(SimulatedClock::new(fixed_now()));
        let mut publisher = RecordingPublisher::new();

        let options = CycleOptions { persist: false, publish: false };
        let summary = run_cycle(&source, &mut history, &mut publisher, options, fixed_now()).expect("cycle");

        assert_eq!(summary, CycleSummary { readings: 1, rows_written: 0, published: 0 });
        assert!(history.is_empty());
        assert!(publisher.published.is_empty());
    }
}
