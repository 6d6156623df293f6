/// Station staleness and multi-station selection.
///
/// A PurpleAir station's `LastSeen` stops advancing when it drops off the
/// network. When several stations are polled in one run the first-listed
/// one is preferred; it is only passed over once it has gone stale.
///
/// # Clock injection
/// Every function takes `now` rather than calling `Utc::now()`, so tests
/// are deterministic without touching the system clock.

use chrono::{DateTime, Utc};

use crate::model::AggregatedReading;

/// Age in seconds at which the preferred station is considered stale.
pub const STALE_AFTER_SECS: i64 = 300;

/// Seconds between `last_seen` and `now`. Negative if `last_seen` is in
/// the future.
pub fn staleness_secs(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - last_seen).num_seconds()
}

/// `true` once the reading is at least `STALE_AFTER_SECS` old.
pub fn is_stale_at(reading: &AggregatedReading, now: DateTime<Utc>) -> bool {
    staleness_secs(reading.last_seen, now) >= STALE_AFTER_SECS
}

/// Pick the reading to publish from `candidates`, in listed order.
///
/// The first candidate wins unless it is stale; then the freshest wins,
/// ties going to the earlier-listed station.
pub fn select_station(
    mut candidates: Vec<AggregatedReading>,
    now: DateTime<Utc>,
) -> Option<AggregatedReading> {
    let first = candidates.first()?;
    if is_stale_at(first, now) {
        candidates.sort_by_key(|c| staleness_secs(c.last_seen, now));
    }
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelValues;
    use chrono::{Duration, TimeZone};

    /// 2024-05-01 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn reading(station_id: u64, age_secs: i64) -> AggregatedReading {
        AggregatedReading {
            station_id,
            average: ChannelValues::from_fn(|_| 10.0),
            aqi: ChannelValues::from_fn(|_| 42),
            record_count: 2,
            last_seen: fixed_now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_stale_first_station_yields_to_fresher() {
        let selected = select_station(vec![reading(1, 400), reading(2, 50)], fixed_now())
            .expect("two candidates");
        assert_eq!(selected.station_id, 2);
    }

    #[test]
    fn test_fresh_first_station_wins_regardless_of_others() {
        let selected = select_station(vec![reading(1, 299), reading(2, 5)], fixed_now())
            .expect("two candidates");
        assert_eq!(selected.station_id, 1, "A under 300 s old must be kept");
    }

    #[test]
    fn test_exactly_300_seconds_is_stale() {
        assert!(is_stale_at(&reading(1, 300), fixed_now()));
        assert!(!is_stale_at(&reading(1, 299), fixed_now()));
        let selected = select_station(vec![reading(1, 300), reading(2, 100)], fixed_now())
            .expect("two candidates");
        assert_eq!(selected.station_id, 2);
    }

    #[test]
    fn test_ties_keep_listed_order() {
        let selected = select_station(
            vec![reading(1, 900), reading(2, 600), reading(3, 600)],
            fixed_now(),
        )
        .expect("three candidates");
        assert_eq!(selected.station_id, 2);
    }

    #[test]
    fn test_all_stale_picks_least_stale() {
        let selected = select_station(vec![reading(1, 900), reading(2, 3600)], fixed_now())
            .expect("two candidates");
        assert_eq!(selected.station_id, 1);
    }

    #[test]
    fn test_single_stale_station_is_still_selected() {
        let selected = select_station(vec![reading(7, 86_400)], fixed_now()).expect("one candidate");
        assert_eq!(selected.station_id, 7);
    }

    #[test]
    fn test_no_candidates() {
        assert!(select_station(Vec::new(), fixed_now()).is_none());
    }

    #[test]
    fn test_staleness_secs_future_is_negative() {
        let future = fixed_now() + Duration::seconds(30);
        assert_eq!(staleness_secs(future, fixed_now()), -30);
    }
}
