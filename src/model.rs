//! Core data types for the air quality monitoring service.
//!
//! Canonical readings produced by the normalizers, the delta record
//! produced by the delta engine, and the pipeline error taxonomy.
//! No I/O lives here.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::aqi::AqiError;
use crate::config::ConfigError;
use crate::history::HistoryError;
use crate::publish::PublishError;

// ---------------------------------------------------------------------------
// Particulate channels
// ---------------------------------------------------------------------------

/// One time-averaging window reported by a PurpleAir station.
///
/// The set is fixed by the vendor's `Stats` object; see
/// `channels::CHANNEL_REGISTRY` for the window metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelTag {
    Realtime,
    ShortTerm,
    ThirtyMinute,
    OneHour,
    SixHour,
    OneDay,
    OneWeek,
}

impl ChannelTag {
    /// All channels in vendor order (`v` through `v6`).
    pub const ALL: [ChannelTag; 7] = [
        ChannelTag::Realtime,
        ChannelTag::ShortTerm,
        ChannelTag::ThirtyMinute,
        ChannelTag::OneHour,
        ChannelTag::SixHour,
        ChannelTag::OneDay,
        ChannelTag::OneWeek,
    ];

    /// The vendor key, also used as the history key for the channel.
    pub fn key(self) -> &'static str {
        match self {
            ChannelTag::Realtime => "v",
            ChannelTag::ShortTerm => "v1",
            ChannelTag::ThirtyMinute => "v2",
            ChannelTag::OneHour => "v3",
            ChannelTag::SixHour => "v4",
            ChannelTag::OneDay => "v5",
            ChannelTag::OneWeek => "v6",
        }
    }

    pub fn from_key(key: &str) -> Option<ChannelTag> {
        ChannelTag::ALL.into_iter().find(|tag| tag.key() == key)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A value for every channel tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValues<T>([T; 7]);

impl<T: Copy + Default> ChannelValues<T> {
    pub fn from_fn(f: impl FnMut(ChannelTag) -> T) -> Self {
        ChannelValues(ChannelTag::ALL.map(f))
    }

    /// Builds the values channel by channel, stopping at the first error.
    pub fn try_from_fn<E>(mut f: impl FnMut(ChannelTag) -> Result<T, E>) -> Result<Self, E> {
        let mut values = [T::default(); 7];
        for tag in ChannelTag::ALL {
            values[tag.index()] = f(tag)?;
        }
        Ok(ChannelValues(values))
    }

    pub fn get(&self, tag: ChannelTag) -> T {
        self.0[tag.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelTag, T)> + '_ {
        ChannelTag::ALL.into_iter().map(move |tag| (tag, self.get(tag)))
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One physical PurpleAir sensor's multi-channel PM2.5 snapshot.
///
/// Corresponds to one entry of the `results` array whose `ID` matched the
/// requested station, with its JSON-encoded `Stats` field decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub station_id: u64,
    pub channels: ChannelValues<f64>, // µg/m³
    pub last_seen: DateTime<Utc>,
}

/// Per-channel averages of all records sharing one station id, with the
/// AQI of each average.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedReading {
    pub station_id: u64,
    pub average: ChannelValues<f64>,
    pub aqi: ChannelValues<u32>,
    pub record_count: usize,
    /// Last-seen time of the first matching record.
    pub last_seen: DateTime<Utc>,
}

/// Composite Awair device identity, rendered as `<deviceType>_<deviceId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub device_type: String,
    pub device_id: u64,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.device_type, self.device_id)
    }
}

/// Numeric fields reported by an indoor monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndoorField {
    Temp,
    Co2,
    Humid,
    Voc,
    Dust,
}

impl IndoorField {
    pub const ALL: [IndoorField; 5] = [
        IndoorField::Temp,
        IndoorField::Co2,
        IndoorField::Humid,
        IndoorField::Voc,
        IndoorField::Dust,
    ];

    /// Column name in the `awair` history table and key in payloads.
    pub fn column(self) -> &'static str {
        match self {
            IndoorField::Temp => "temp",
            IndoorField::Co2 => "co2",
            IndoorField::Humid => "humid",
            IndoorField::Voc => "voc",
            IndoorField::Dust => "dust",
        }
    }

    /// Decimal places kept for this field.
    pub fn precision(self) -> usize {
        match self {
            IndoorField::Temp | IndoorField::Dust => 1,
            IndoorField::Co2 | IndoorField::Humid | IndoorField::Voc => 0,
        }
    }

    /// Rounds `value` to this field's precision, agreeing with `format`.
    pub fn quantize(self, value: f64) -> f64 {
        self.format(value).parse().unwrap_or(value)
    }

    /// Fixed-precision text form, e.g. `72.3` for temperature, `45` for humidity.
    pub fn format(self, value: f64) -> String {
        format!("{:.*}", self.precision(), value)
    }
}

/// One Awair device's latest snapshot, normalized.
///
/// `dust` is `None` when the device has no particulate sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct IndoorDeviceReading {
    pub location: String,
    pub physical_location: String,
    pub device: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub temp: f64,  // °F
    pub humid: f64, // %RH
    pub co2: f64,   // ppm
    pub voc: f64,   // ppb
    pub dust: Option<f64>,
}

impl IndoorDeviceReading {
    pub fn value(&self, field: IndoorField) -> Option<f64> {
        match field {
            IndoorField::Temp => Some(self.temp),
            IndoorField::Co2 => Some(self.co2),
            IndoorField::Humid => Some(self.humid),
            IndoorField::Voc => Some(self.voc),
            IndoorField::Dust => self.dust,
        }
    }

    /// History key for this device.
    pub fn uuid(&self) -> String {
        self.device.to_string()
    }
}

/// Hour-over-hour deltas for one sensor, keyed by field.
///
/// Only fields with both a current value and a non-empty baseline appear.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaRecord {
    pub sensor_key: String,
    pub deltas: BTreeMap<IndoorField, f64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a pipeline run.
///
/// A missing historical baseline is not represented here: the affected
/// delta or AQI field is simply omitted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The vendor API could not be reached or answered with a non-2xx status.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    /// The response body could not be decoded or lacks a required field.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// No record in the response carried the requested station id.
    #[error("no records matched station {0}")]
    NoMatchingStation(u64),
    #[error(transparent)]
    OutOfRangeConcentration(#[from] AqiError),
    #[error("history store: {0}")]
    History(#[from] HistoryError),
    #[error("publish: {0}")]
    Publish(#[from] PublishError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("instance lock: {0}")]
    Lock(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_keys_round_trip_through_from_key() {
        for tag in ChannelTag::ALL {
            assert_eq!(ChannelTag::from_key(tag.key()), Some(tag));
        }
        assert_eq!(ChannelTag::from_key("v7"), None);
    }

    #[test]
    fn test_try_from_fn_stops_at_first_error() {
        let mut visited = Vec::new();
        let result: Result<ChannelValues<u32>, &str> = ChannelValues::try_from_fn(|tag| {
            visited.push(tag);
            if tag == ChannelTag::ThirtyMinute { Err("bad") } else { Ok(1) }
        });
        assert_eq!(result, Err("bad"));
        assert_eq!(visited.len(), 3, "should stop at v2");
    }

    #[test]
    fn test_device_id_renders_type_and_id() {
        let id = DeviceId { device_type: "awair-element".to_string(), device_id: 4321 };
        assert_eq!(id.to_string(), "awair-element_4321");
    }

    #[test]
    fn test_indoor_field_precision_and_format() {
        assert_eq!(IndoorField::Temp.format(72.34), "72.3");
        assert_eq!(IndoorField::Dust.format(3.0), "3.0");
        assert_eq!(IndoorField::Humid.format(44.6), "45");
        assert_eq!(IndoorField::Co2.quantize(612.4), 612.0);
        assert_eq!(IndoorField::Temp.quantize(71.26), 71.3);
    }

    #[test]
    fn test_missing_dust_is_none_not_zero() {
        let reading = IndoorDeviceReading {
            location: "Office".to_string(),
            physical_location: "Home".to_string(),
            device: DeviceId { device_type: "awair".to_string(), device_id: 1 },
            timestamp: Utc::now(),
            temp: 70.0,
            humid: 40.0,
            co2: 500.0,
            voc: 100.0,
            dust: None,
        };
        assert_eq!(reading.value(IndoorField::Dust), None);
        assert_eq!(reading.value(IndoorField::Temp), Some(70.0));
    }
}
