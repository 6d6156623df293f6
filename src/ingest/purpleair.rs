/// PurpleAir particulate network client
///
/// The public JSON endpoint returns every sensor attached to the requested
/// station, and sometimes unrelated child sensors nested under it. Each
/// entry carries its PM2.5 averages in `Stats`, a JSON document encoded as
/// a string.
///
/// Endpoint: https://www.purpleair.com/json?show=<station id>

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{decode, deserialize_lenient_id, Transport};
use crate::model::{ChannelTag, ChannelValues, PipelineError, StationRecord};

const PURPLEAIR_BASE_URL: &str = "https://www.purpleair.com";

// ============================================================================
// PurpleAir API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PurpleAirResponse {
    pub results: Vec<PurpleAirResult>,
}

/// One sensor entry. `Stats` and `LastSeen` are only required on entries
/// that match the requested station; an `ID` that is missing or not a
/// number decodes as `None` and never matches.
#[derive(Debug, Deserialize)]
pub struct PurpleAirResult {
    #[serde(rename = "ID", default, deserialize_with = "deserialize_lenient_id")]
    pub id: Option<u64>,
    #[serde(rename = "Stats", default)]
    pub stats: Option<String>,
    #[serde(rename = "LastSeen", default)]
    pub last_seen: Option<i64>, // unix seconds
}

/// Decoded `Stats` document, PM2.5 in µg/m³.
#[derive(Debug, Deserialize)]
pub struct ChannelStats {
    pub v: f64,  // realtime
    pub v1: f64, // short-term
    pub v2: f64, // 30 minute average
    pub v3: f64, // 1 hour average
    pub v4: f64, // 6 hour average
    pub v5: f64, // 24 hour average
    pub v6: f64, // 1 week average
}

impl ChannelStats {
    fn channel(&self, tag: ChannelTag) -> f64 {
        match tag {
            ChannelTag::Realtime => self.v,
            ChannelTag::ShortTerm => self.v1,
            ChannelTag::ThirtyMinute => self.v2,
            ChannelTag::OneHour => self.v3,
            ChannelTag::SixHour => self.v4,
            ChannelTag::OneDay => self.v5,
            ChannelTag::OneWeek => self.v6,
        }
    }
}

// ============================================================================
// API Client Functions
// ============================================================================

pub fn build_station_url(station_id: u64) -> String {
    format!("{}/json?show={}", PURPLEAIR_BASE_URL, station_id)
}

pub fn parse_station_response(body: &str) -> Result<PurpleAirResponse, PipelineError> {
    decode(body, "PurpleAir station response")
}

/// Fetch the raw response for one station.
pub fn fetch_station(transport: &dyn Transport, station_id: u64) -> Result<PurpleAirResponse, PipelineError> {
    let body = transport.get_text(&build_station_url(station_id), None)?;
    parse_station_response(&body)
}

// ============================================================================
// Normalization
// ============================================================================

/// Select the entries whose `ID` equals `station_id` exactly and decode
/// their channel statistics.
///
/// Child entries with any other id are dropped without being inspected.
/// An empty result is not an error here; the averager rejects it.
pub fn normalize_station(
    station_id: u64,
    response: &PurpleAirResponse,
) -> Result<Vec<StationRecord>, PipelineError> {
    response
        .results
        .iter()
        .filter(|result| result.id == Some(station_id))
        .map(|result| parse_record(station_id, result))
        .collect()
}

fn parse_record(station_id: u64, result: &PurpleAirResult) -> Result<StationRecord, PipelineError> {
    let stats_text = result.stats.as_deref().ok_or_else(|| {
        PipelineError::MalformedPayload(format!("station {} has no Stats", station_id))
    })?;
    let stats: ChannelStats = decode(stats_text, &format!("station {} Stats", station_id))?;

    let last_seen_secs = result.last_seen.ok_or_else(|| {
        PipelineError::MalformedPayload(format!("station {} has no LastSeen", station_id))
    })?;
    let last_seen = DateTime::<Utc>::from_timestamp(last_seen_secs, 0).ok_or_else(|| {
        PipelineError::MalformedPayload(format!(
            "station {} LastSeen {} out of range",
            station_id, last_seen_secs
        ))
    })?;

    Ok(StationRecord {
        station_id,
        channels: ChannelValues::from_fn(|tag| stats.channel(tag)),
        last_seen,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_json(v1: f64) -> String {
        format!(
            r#"{{"v":{v1},"v1":{v1},"v2":{v1},"v3":{v1},"v4":{v1},"v5":{v1},"v6":{v1},"pm":{v1},"lastModified":1588888888000,"timeSinceModified":120000}}"#
        )
    }

    fn entry(id: &str, v1: f64) -> String {
        format!(
            r#"{{"ID": {id}, "Label": "Backyard", "Stats": {stats}, "LastSeen": 1714568400}}"#,
            stats = serde_json::to_string(&stats_json(v1)).unwrap()
        )
    }

    fn response(entries: &[String]) -> PurpleAirResponse {
        let body = format!(r#"{{"mapVersion": "0.20", "results": [{}]}}"#, entries.join(","));
        parse_station_response(&body).expect("test body should parse")
    }

    #[test]
    fn test_station_url() {
        assert_eq!(build_station_url(12345), "https://www.purpleair.com/json?show=12345");
    }

    #[test]
    fn test_only_exact_id_matches_are_kept() {
        let resp = response(&[entry("5", 10.0), entry("5", 20.0), entry("12", 30.0)]);
        let records = normalize_station(5, &resp).expect("matching entries are valid");
        assert_eq!(records.len(), 2, "ids [5, 5, 12] with target 5 must yield 2 records");
        assert!(records.iter().all(|r| r.station_id == 5));
    }

    #[test]
    fn test_string_ids_are_compared_numerically() {
        let resp = response(&[entry("\"5\"", 10.0), entry("55", 20.0)]);
        let records = normalize_station(5, &resp).expect("valid");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_stats_string_is_decoded_into_channels() {
        let resp = response(&[entry("7", 42.5)]);
        let records = normalize_station(7, &resp).expect("valid");
        let record = &records[0];
        assert_eq!(record.channels.get(ChannelTag::ShortTerm), 42.5);
        assert_eq!(record.channels.get(ChannelTag::OneWeek), 42.5);
        assert_eq!(record.last_seen.timestamp(), 1_714_568_400);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let resp = response(&[entry("12", 30.0)]);
        let records = normalize_station(5, &resp).expect("no match is not malformed");
        assert!(records.is_empty());
    }

    #[test]
    fn test_matching_entry_without_stats_is_malformed() {
        let resp = response(&[r#"{"ID": 5, "LastSeen": 1714568400}"#.to_string()]);
        let result = normalize_station(5, &resp);
        assert!(matches!(result, Err(PipelineError::MalformedPayload(_))));
    }

    #[test]
    fn test_malformed_child_entry_is_ignored() {
        let resp = response(&[entry("5", 10.0), r#"{"ID": 12}"#.to_string()]);
        let records = normalize_station(5, &resp).expect("child entries are never inspected");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_child_entries_with_unusable_ids_are_ignored() {
        let resp = response(&[
            entry("5", 10.0),
            r#"{"ID": null}"#.to_string(),
            r#"{"ID": "abc", "Stats": "not json"}"#.to_string(),
            r#"{"Label": "no id at all"}"#.to_string(),
        ]);
        let records = normalize_station(5, &resp).expect("unusable ids never match");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].station_id, 5);
    }

    #[test]
    fn test_raw_body_with_null_child_id_yields_one_record() {
        let stats = serde_json::to_string(&stats_json(12.0)).unwrap();
        let body = format!(
            r#"{{"results":[{{"ID":5,"Stats":{},"LastSeen":1}},{{"ID":null}}]}}"#,
            stats
        );
        let resp = parse_station_response(&body).expect("null child id is not malformed");
        let records = normalize_station(5, &resp).expect("valid");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_stats_missing_channel_is_malformed() {
        let stats = serde_json::to_string(r#"{"v":1.0,"v1":2.0}"#).unwrap();
        let resp = response(&[format!(r#"{{"ID": 5, "Stats": {}, "LastSeen": 1}}"#, stats)]);
        let result = normalize_station(5, &resp);
        assert!(matches!(result, Err(PipelineError::MalformedPayload(_))));
    }

    #[test]
    fn test_missing_results_key_is_malformed() {
        let result = parse_station_response(r#"{"code": 404}"#);
        assert!(matches!(result, Err(PipelineError::MalformedPayload(_))));
    }
}
