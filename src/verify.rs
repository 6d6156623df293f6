//! Data Source Verification Module
//!
//! Checks configured PurpleAir stations and Awair devices against the live
//! APIs without touching the history store or the broker. Use this before
//! adding a station id to the cron line or after re-pairing a device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::averaging::average_station;
use crate::analysis::staleness::{staleness_secs, STALE_AFTER_SECS};
use crate::config::AwairConfig;
use crate::ingest::awair::{fetch_air_data, fetch_devices, normalize_device};
use crate::ingest::purpleair::{fetch_station, normalize_station};
use crate::ingest::Transport;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub station_results: Vec<StationVerification>,
    pub device_results: Vec<DeviceVerification>,
    /// Set when the Awair device list itself could not be read.
    pub device_list_error: Option<String>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub stations_total: usize,
    pub stations_working: usize,
    pub stations_failed: usize,
    pub devices_total: usize,
    pub devices_working: usize,
    pub devices_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationVerification {
    pub station_id: u64,
    pub status: VerificationStatus,
    pub api_responsive: bool,
    pub matching_records: usize,
    pub staleness_secs: Option<i64>,
    pub short_term_aqi: Option<u32>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceVerification {
    pub uuid: String,
    pub location: String,
    pub physical_location: String,
    pub status: VerificationStatus,
    pub data_window_present: bool,
    pub dust_sensor_present: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// PurpleAir Verification
// ============================================================================

/// `Success` for a fresh station with matching records, `PartialSuccess`
/// when it is stale, `Failed` otherwise.
pub fn verify_purpleair_station(
    transport: &dyn Transport,
    station_id: u64,
    now: DateTime<Utc>,
) -> StationVerification {
    let mut result = StationVerification {
        station_id,
        status: VerificationStatus::Failed,
        api_responsive: false,
        matching_records: 0,
        staleness_secs: None,
        short_term_aqi: None,
        error_message: None,
    };

    let response = match fetch_station(transport, station_id) {
        Ok(response) => response,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    result.api_responsive = true;

    let reading = normalize_station(station_id, &response)
        .and_then(|records| average_station(station_id, &records));
    match reading {
        Ok(reading) => {
            let age = staleness_secs(reading.last_seen, now);
            result.matching_records = reading.record_count;
            result.staleness_secs = Some(age);
            result.short_term_aqi = Some(reading.aqi.get(crate::channels::TREND_CHANNEL));
            result.status = if age >= STALE_AFTER_SECS {
                VerificationStatus::PartialSuccess
            } else {
                VerificationStatus::Success
            };
        }
        Err(e) => result.error_message = Some(e.to_string()),
    }

    result
}

// ============================================================================
// Awair Verification
// ============================================================================

/// Check every device on the account. A device with no recent data is
/// `PartialSuccess`.
pub fn verify_awair_devices(
    transport: &dyn Transport,
    awair: &AwairConfig,
) -> Result<Vec<DeviceVerification>, String> {
    let only = if awair.only_location { awair.location.as_deref() } else { None };
    let devices = fetch_devices(transport, &awair.auth_token, only).map_err(|e| e.to_string())?;

    let results = devices
        .iter()
        .map(|device| {
            let mut result = DeviceVerification {
                uuid: device.id().to_string(),
                location: device.name.clone(),
                physical_location: device.location_name.clone(),
                status: VerificationStatus::Failed,
                data_window_present: false,
                dust_sensor_present: false,
                error_message: None,
            };

            match fetch_air_data(transport, &awair.auth_token, device)
                .and_then(|data| normalize_device(device, &data))
            {
                Ok(Some(reading)) => {
                    result.data_window_present = true;
                    result.dust_sensor_present = reading.dust.is_some();
                    result.status = VerificationStatus::Success;
                }
                Ok(None) => result.status = VerificationStatus::PartialSuccess,
                Err(e) => result.error_message = Some(e.to_string()),
            }
            result
        })
        .collect();

    Ok(results)
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_verification(
    transport: &dyn Transport,
    station_ids: &[u64],
    awair: Option<&AwairConfig>,
    now: DateTime<Utc>,
) -> VerificationReport {
    let mut report = VerificationReport {
        timestamp: now.to_rfc3339(),
        station_results: Vec::new(),
        device_results: Vec::new(),
        device_list_error: None,
        summary: VerificationSummary::default(),
    };

    for &station_id in station_ids {
        let result = verify_purpleair_station(transport, station_id, now);
        report.summary.stations_total += 1;
        if result.status == VerificationStatus::Failed {
            report.summary.stations_failed += 1;
        } else {
            report.summary.stations_working += 1;
        }
        report.station_results.push(result);
    }

    if let Some(awair) = awair {
        match verify_awair_devices(transport, awair) {
            Ok(devices) => {
                for result in devices {
                    report.summary.devices_total += 1;
                    if result.status == VerificationStatus::Failed {
                        report.summary.devices_failed += 1;
                    } else {
                        report.summary.devices_working += 1;
                    }
                    report.device_results.push(result);
                }
            }
            Err(e) => report.device_list_error = Some(e),
        }
    }

    report
}

pub fn print_summary(report: &VerificationReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!("VERIFICATION SUMMARY ({})", report.timestamp);
    println!("═══════════════════════════════════════════════════════════");

    for station in &report.station_results {
        match station.status {
            VerificationStatus::Success => println!(
                "  purpleair {} ... ✓ OK ({} records, {}s old)",
                station.station_id,
                station.matching_records,
                station.staleness_secs.unwrap_or_default()
            ),
            VerificationStatus::PartialSuccess => println!(
                "  purpleair {} ... ⚠ Stale ({}s since update)",
                station.station_id,
                station.staleness_secs.unwrap_or_default()
            ),
            VerificationStatus::Failed => println!(
                "  purpleair {} ... ✗ FAILED: {}",
                station.station_id,
                station.error_message.as_deref().unwrap_or("Unknown")
            ),
        }
    }

    if let Some(e) = &report.device_list_error {
        println!("  awair device list ... ✗ FAILED: {}", e);
    }
    for device in &report.device_results {
        match device.status {
            VerificationStatus::Success => println!(
                "  awair {} ({}/{}) ... ✓ OK{}",
                device.uuid,
                device.physical_location,
                device.location,
                if device.dust_sensor_present { "" } else { " (no dust sensor)" }
            ),
            VerificationStatus::PartialSuccess => {
                println!("  awair {} ... ⚠ No recent data", device.uuid)
            }
            VerificationStatus::Failed => println!(
                "  awair {} ... ✗ FAILED: {}",
                device.uuid,
                device.error_message.as_deref().unwrap_or("Unknown")
            ),
        }
    }

    println!();
    println!(
        "PurpleAir Stations: {}/{} working  ({} failed)",
        report.summary.stations_working, report.summary.stations_total, report.summary.stations_failed
    );
    println!(
        "Awair Devices:      {}/{} working  ({} failed)",
        report.summary.devices_working, report.summary.devices_total, report.summary.devices_failed
    );
    println!("═══════════════════════════════════════════════════════════");
}
