/// Awair source
///
/// Reads every device on the account, stores one row per device snapshot
/// and publishes each device's readings with its smoothed AQI and
/// hour-over-hour changes.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use super::SensorSource;
use crate::analysis::delta::{indoor_deltas, smoothed_indoor_aqi};
use crate::history::{HistoryRow, HistoryStore, TableSpec, AWAIR_TABLE};
use crate::ingest::awair::{fetch_air_data, fetch_devices, normalize_device, AirDataResponse, AwairDevice};
use crate::ingest::Transport;
use crate::logging::{self, DataSource};
use crate::model::{IndoorDeviceReading, IndoorField, PipelineError};
use crate::publish::{topic, Publication};

const TOPIC_PREFIX: &str = "awair";
const TOPIC_CHANNEL: &str = "sensor";

/// Per-device payload. Readings are fixed-precision strings; deltas are
/// strings for one-decimal fields and integers otherwise.
#[derive(Debug, Serialize)]
struct DeviceMessage<'a> {
    datetime: String,
    location: &'a str,
    physical_location: &'a str,
    uuid: String,
    temp: String,
    co2: String,
    humid: String,
    voc: String,
    dust: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    aqi: Option<u32>,
    #[serde(flatten)]
    last_hour: BTreeMap<String, Value>,
}

pub struct AwairSource<'a> {
    transport: &'a dyn Transport,
    auth_token: String,
    /// Home physical location, if configured.
    location: Option<String>,
    only_location: bool,
}

impl<'a> AwairSource<'a> {
    pub fn new(transport: &'a dyn Transport, auth_token: impl Into<String>) -> Self {
        AwairSource {
            transport,
            auth_token: auth_token.into(),
            location: None,
            only_location: false,
        }
    }

    pub fn with_location(mut self, location: Option<String>, only_location: bool) -> Self {
        self.location = location;
        self.only_location = only_location;
        self
    }

    /// Devices at the home location get the short topic.
    pub fn device_topic(&self, reading: &IndoorDeviceReading) -> String {
        match &self.location {
            Some(home) if *home == reading.physical_location => {
                topic(&[TOPIC_PREFIX, reading.location.as_str(), TOPIC_CHANNEL])
            }
            _ => topic(&[
                TOPIC_PREFIX,
                reading.physical_location.as_str(),
                reading.location.as_str(),
                TOPIC_CHANNEL,
            ]),
        }
    }
}

fn last_hour_value(field: IndoorField, delta: f64) -> Value {
    if field.precision() == 0 {
        Value::from(delta.round() as i64)
    } else {
        Value::from(field.format(delta))
    }
}

impl SensorSource for AwairSource<'_> {
    type Payload = Vec<(AwairDevice, AirDataResponse)>;
    type Reading = IndoorDeviceReading;

    fn name(&self) -> &'static str {
        "awair"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Awair
    }

    fn table(&self) -> &'static TableSpec {
        &AWAIR_TABLE
    }

    fn fetch(&self) -> Result<Self::Payload, PipelineError> {
        let only = if self.only_location { self.location.as_deref() } else { None };
        let devices = fetch_devices(self.transport, &self.auth_token, only)?;
        logging::debug(DataSource::Awair, None, &format!("{} device(s) listed", devices.len()));

        devices
            .into_iter()
            .map(|device| {
                let data = fetch_air_data(self.transport, &self.auth_token, &device)?;
                Ok((device, data))
            })
            .collect()
    }

    fn normalize(&self, payload: Self::Payload, _now: DateTime<Utc>) -> Result<Vec<IndoorDeviceReading>, PipelineError> {
        let mut readings = Vec::with_capacity(payload.len());
        for (device, data) in &payload {
            match normalize_device(device, data)? {
                Some(reading) => readings.push(reading),
                None => logging::info(
                    DataSource::Awair,
                    Some(&device.id().to_string()),
                    "no recent air data, skipped",
                ),
            }
        }
        Ok(readings)
    }

    fn identity_key(&self, reading: &IndoorDeviceReading) -> String {
        reading.uuid()
    }

    fn history_rows(&self, reading: &IndoorDeviceReading) -> Vec<HistoryRow> {
        let row = IndoorField::ALL.into_iter().fold(
            HistoryRow::new(reading.uuid())
                .at(reading.timestamp.naive_utc())
                .label("location", reading.location.as_str())
                .label("physical_location", reading.physical_location.as_str()),
            |row, field| row.value(field.column(), reading.value(field)),
        );
        vec![row]
    }

    fn derive(
        &self,
        reading: &IndoorDeviceReading,
        history: &mut dyn HistoryStore,
    ) -> Result<Vec<Publication>, PipelineError> {
        let aqi = smoothed_indoor_aqi(reading, history)?;

        let mut last_hour = BTreeMap::new();
        if let Some(record) = indoor_deltas(reading, history)? {
            for (field, delta) in record.deltas {
                last_hour.insert(format!("last_hour_{}", field.column()), last_hour_value(field, delta));
            }
        }

        let text = |field: IndoorField| reading.value(field).map(|v| field.format(v)).unwrap_or_default();
        let message = DeviceMessage {
            datetime: reading.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            location: &reading.location,
            physical_location: &reading.physical_location,
            uuid: reading.uuid(),
            temp: text(IndoorField::Temp),
            co2: text(IndoorField::Co2),
            humid: text(IndoorField::Humid),
            voc: text(IndoorField::Voc),
            dust: text(IndoorField::Dust),
            aqi,
            last_hour,
        };

        Ok(vec![Publication::retained_json(self.device_topic(reading), &message)?])
    }
}
