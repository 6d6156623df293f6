/// PurpleAir source
///
/// Polls one or more stations, averages each station's sensors, picks one
/// station by the staleness rule and publishes its short-term AQI plus the
/// change over the last hour.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SensorSource;
use crate::analysis::averaging::average_station;
use crate::analysis::delta::particulate_delta;
use crate::analysis::staleness::{select_station, staleness_secs};
use crate::aqi::AqiCategory;
use crate::channels::{channel_name, TREND_CHANNEL};
use crate::history::{HistoryRow, HistoryStore, TableSpec, PURPLE_AIR_TABLE};
use crate::ingest::purpleair::{fetch_station, normalize_station, PurpleAirResponse};
use crate::ingest::Transport;
use crate::logging::{self, DataSource};
use crate::model::{AggregatedReading, PipelineError};
use crate::publish::{topic, Publication};

const TOPIC_PREFIX: &str = "purpleair";

/// `purpleair/sensor` payload.
#[derive(Debug, Serialize)]
struct SensorMessage {
    st_aqi: u32,
    st_aqi_desc: &'static str,
}

/// `purpleair/last_hour` payload.
#[derive(Debug, Serialize)]
struct LastHourMessage {
    st_aqi: i64,
}

pub struct PurpleAirSource<'a> {
    transport: &'a dyn Transport,
    /// In preference order.
    station_ids: Vec<u64>,
}

impl<'a> PurpleAirSource<'a> {
    pub fn new(transport: &'a dyn Transport, station_ids: Vec<u64>) -> Self {
        PurpleAirSource { transport, station_ids }
    }
}

impl SensorSource for PurpleAirSource<'_> {
    type Payload = Vec<(u64, PurpleAirResponse)>;
    type Reading = AggregatedReading;

    fn name(&self) -> &'static str {
        "purpleair"
    }

    fn data_source(&self) -> DataSource {
        DataSource::PurpleAir
    }

    fn table(&self) -> &'static TableSpec {
        &PURPLE_AIR_TABLE
    }

    fn fetch(&self) -> Result<Self::Payload, PipelineError> {
        self.station_ids
            .iter()
            .map(|&id| Ok((id, fetch_station(self.transport, id)?)))
            .collect()
    }

    /// Average every station, then keep the selected one.
    fn normalize(&self, payload: Self::Payload, now: DateTime<Utc>) -> Result<Vec<AggregatedReading>, PipelineError> {
        let mut candidates = Vec::with_capacity(payload.len());
        for (station_id, response) in &payload {
            let records = normalize_station(*station_id, response)?;
            let reading = average_station(*station_id, &records)?;
            logging::debug(
                DataSource::PurpleAir,
                Some(&station_id.to_string()),
                &format!(
                    "{} record(s), {}s since update",
                    reading.record_count,
                    staleness_secs(reading.last_seen, now)
                ),
            );
            candidates.push(reading);
        }

        let selected = select_station(candidates, now);
        if let Some(reading) = &selected {
            logging::info(
                DataSource::PurpleAir,
                Some(&reading.station_id.to_string()),
                &format!(
                    "selected station, {} AQI {}",
                    channel_name(TREND_CHANNEL),
                    reading.aqi.get(TREND_CHANNEL)
                ),
            );
        }
        Ok(selected.into_iter().collect())
    }

    fn identity_key(&self, reading: &AggregatedReading) -> String {
        reading.station_id.to_string()
    }

    /// One row per channel, keyed by channel tag and stamped by the store.
    fn history_rows(&self, reading: &AggregatedReading) -> Vec<HistoryRow> {
        reading
            .aqi
            .iter()
            .map(|(tag, aqi)| HistoryRow::new(tag.key()).value("aqi", Some(f64::from(aqi))))
            .collect()
    }

    fn derive(
        &self,
        reading: &AggregatedReading,
        history: &mut dyn HistoryStore,
    ) -> Result<Vec<Publication>, PipelineError> {
        let aqi = reading.aqi.get(TREND_CHANNEL);
        let sensor = SensorMessage {
            st_aqi: aqi,
            st_aqi_desc: AqiCategory::from_aqi(aqi).description(),
        };
        let mut messages = vec![Publication::retained_json(topic(&[TOPIC_PREFIX, "sensor"]), &sensor)?];

        if let Some(delta) = particulate_delta(reading, history)? {
            let last_hour = LastHourMessage { st_aqi: delta };
            messages.push(Publication::retained_json(
                topic(&[TOPIC_PREFIX, "last_hour"]),
                &last_hour,
            )?);
        }
        Ok(messages)
    }
}
