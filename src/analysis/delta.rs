//! Hour-over-hour deltas and the smoothed indoor AQI.
//!
//! Every lookup here reads history written by earlier runs. The current
//! run's readings are persisted only after these values are computed, so a
//! reading never serves as its own baseline.
//!
//! A missing baseline is routine (first run, new device, gap in history):
//! the affected value is left out and a debug line is logged.

use crate::aqi::{compute_aqi, Pollutant};
use crate::channels::TREND_CHANNEL;
use crate::history::{HistoryError, HistoryStore, AWAIR_TABLE, ONE_HOUR, PURPLE_AIR_TABLE};
use crate::logging::{self, DataSource};
use crate::model::{AggregatedReading, DeltaRecord, IndoorDeviceReading, IndoorField, PipelineError};

/// Change in the short-term channel AQI against the latest stored value
/// older than one hour.
pub fn particulate_delta(
    reading: &AggregatedReading,
    history: &mut dyn HistoryStore,
) -> Result<Option<i64>, HistoryError> {
    let key = TREND_CHANNEL.key();
    let baseline = history.most_recent_before(&PURPLE_AIR_TABLE, key, "aqi", ONE_HOUR)?;

    match baseline {
        Some(previous) => {
            let current = i64::from(reading.aqi.get(TREND_CHANNEL));
            Ok(Some(current - previous.round() as i64))
        }
        None => {
            logging::log_missing_baseline(DataSource::PurpleAir, key, "aqi");
            Ok(None)
        }
    }
}

/// Per-field change against the device's latest row older than one hour.
///
/// Returns `None` when the device has no such row. Within a row, fields
/// missing from the current reading or empty in the row are skipped.
pub fn indoor_deltas(
    reading: &IndoorDeviceReading,
    history: &mut dyn HistoryStore,
) -> Result<Option<DeltaRecord>, HistoryError> {
    let uuid = reading.uuid();
    let Some(row) = history.most_recent_row_before(&AWAIR_TABLE, &uuid, ONE_HOUR)? else {
        logging::log_missing_baseline(DataSource::Awair, &uuid, "row");
        return Ok(None);
    };

    let mut record = DeltaRecord {
        sensor_key: uuid,
        ..DeltaRecord::default()
    };
    for field in IndoorField::ALL {
        let (Some(current), Some(previous)) = (reading.value(field), row.get(field.column())) else {
            continue;
        };
        record.deltas.insert(field, field.quantize(current - previous));
    }
    Ok(Some(record))
}

/// PM2.5 AQI of the device's dust readings over the last hour.
///
/// Devices without a dust sensor are not looked up at all. `None` when the
/// window holds no dust values.
pub fn smoothed_indoor_aqi(
    reading: &IndoorDeviceReading,
    history: &mut dyn HistoryStore,
) -> Result<Option<u32>, PipelineError> {
    if reading.dust.is_none() {
        return Ok(None);
    }

    let uuid = reading.uuid();
    let field = IndoorField::Dust.column();
    match history.window_average(&AWAIR_TABLE, &uuid, field, ONE_HOUR)? {
        Some(average) => Ok(Some(compute_aqi(Pollutant::Pm25, average)?)),
        None => {
            logging::log_missing_baseline(DataSource::Awair, &uuid, field);
            Ok(None)
        }
    }
}
