//! Multi-sensor averaging for PurpleAir stations.
//!
//! A station is usually two laser counters reported as separate entries
//! with the same id. Each channel is averaged across every entry for the
//! station, and the AQI is computed from that average.

use crate::aqi::{compute_aqi, Pollutant};
use crate::model::{AggregatedReading, ChannelValues, PipelineError, StationRecord};

/// Average every channel across the records for `station_id`.
///
/// Records with another id are ignored. Zero matching records fails with
/// `NoMatchingStation`; an averaged channel above the PM2.5 table fails
/// with `OutOfRangeConcentration`.
pub fn average_station(
    station_id: u64,
    records: &[StationRecord],
) -> Result<AggregatedReading, PipelineError> {
    let matching: Vec<&StationRecord> = records
        .iter()
        .filter(|r| r.station_id == station_id)
        .collect();

    let first = matching
        .first()
        .ok_or(PipelineError::NoMatchingStation(station_id))?;
    let count = matching.len();

    let average = ChannelValues::from_fn(|tag| {
        let total: f64 = matching.iter().map(|r| r.channels.get(tag)).sum();
        total / count as f64
    });
    let aqi = ChannelValues::try_from_fn(|tag| compute_aqi(Pollutant::Pm25, average.get(tag)))?;

    Ok(AggregatedReading {
        station_id,
        average,
        aqi,
        record_count: count,
        last_seen: first.last_seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelTag;
    use chrono::{TimeZone, Utc};

    fn record(station_id: u64, pm25: f64) -> StationRecord {
        StationRecord {
            station_id,
            channels: ChannelValues::from_fn(|_| pm25),
            last_seen: Utc.with_ymd_and_hms(2024, 5, 1, 12, 58, 0).unwrap(),
        }
    }

    #[test]
    fn test_station_123_averages_to_50_and_aqi_137() {
        let records = [record(123, 40.0), record(123, 60.0), record(999, 500.0)];
        let reading = average_station(123, &records).expect("two matching records");

        assert_eq!(reading.record_count, 2);
        assert_eq!(reading.average.get(ChannelTag::ShortTerm), 50.0);
        assert_eq!(reading.aqi.get(ChannelTag::ShortTerm), 137);
    }

    #[test]
    fn test_divides_by_exact_match_count() {
        let records = [record(7, 10.0), record(7, 20.0), record(7, 30.0)];
        let reading = average_station(7, &records).expect("valid");
        assert_eq!(reading.record_count, 3);
        assert_eq!(reading.average.get(ChannelTag::Realtime), 20.0);
    }

    #[test]
    fn test_channels_are_averaged_independently() {
        let mut a = record(7, 10.0);
        a.channels = ChannelValues::from_fn(|tag| if tag == ChannelTag::OneWeek { 30.0 } else { 10.0 });
        let b = record(7, 10.0);
        let reading = average_station(7, &[a, b]).expect("valid");
        assert_eq!(reading.average.get(ChannelTag::OneWeek), 20.0);
        assert_eq!(reading.average.get(ChannelTag::OneHour), 10.0);
    }

    #[test]
    fn test_zero_matches_is_no_matching_station() {
        let records = [record(999, 10.0)];
        let result = average_station(123, &records);
        assert!(
            matches!(result, Err(PipelineError::NoMatchingStation(123))),
            "got {:?}",
            result
        );
        assert!(matches!(average_station(123, &[]), Err(PipelineError::NoMatchingStation(123))));
    }

    #[test]
    fn test_out_of_range_channel_fails_the_station() {
        let records = [record(5, 700.0)];
        let result = average_station(5, &records);
        assert!(matches!(result, Err(PipelineError::OutOfRangeConcentration(_))));
    }

    #[test]
    fn test_last_seen_comes_from_first_match() {
        let mut later = record(5, 10.0);
        later.last_seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 59, 30).unwrap();
        let records = [record(9, 1.0), later.clone(), record(5, 10.0)];
        let reading = average_station(5, &records).expect("valid");
        assert_eq!(reading.last_seen, later.last_seen);
    }
}
