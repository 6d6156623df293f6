/// Awair indoor air monitor client
///
/// Lists the devices visible to the account token, then fetches each
/// device's latest air-data snapshot (temperatures in Fahrenheit).
///
/// API Documentation: https://docs.developer.getawair.com/

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{decode, deserialize_numeric_id, Transport};
use crate::model::{DeviceId, IndoorDeviceReading, IndoorField, PipelineError};

const AWAIR_BASE_URL: &str = "https://developer-apis.awair.is";

// ============================================================================
// Awair API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<AwairDevice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwairDevice {
    /// Room name given by the owner, e.g. "Bedroom".
    pub name: String,
    /// Physical location (home) name, e.g. "Home".
    pub location_name: String,
    pub device_type: String,
    #[serde(deserialize_with = "deserialize_numeric_id")]
    pub device_id: u64,
}

impl AwairDevice {
    pub fn id(&self) -> DeviceId {
        DeviceId {
            device_type: self.device_type.clone(),
            device_id: self.device_id,
        }
    }
}

/// Latest air-data response; `data` is empty when the device has not
/// reported recently.
#[derive(Debug, Deserialize)]
pub struct AirDataResponse {
    pub data: Vec<AirDataPoint>,
}

#[derive(Debug, Deserialize)]
pub struct AirDataPoint {
    pub timestamp: DateTime<Utc>,
    pub sensors: Vec<SensorComponent>,
}

/// One sensor component, e.g. `{"comp": "co2", "value": 612.0}`.
#[derive(Debug, Deserialize)]
pub struct SensorComponent {
    pub comp: String,
    pub value: f64,
}

// ============================================================================
// API Client Functions
// ============================================================================

pub fn build_devices_url() -> String {
    format!("{}/v1/users/self/devices", AWAIR_BASE_URL)
}

pub fn build_air_data_url(device: &AwairDevice) -> String {
    format!(
        "{}/v1/users/self/devices/{}/{}/air-data/latest?fahrenheit=true",
        AWAIR_BASE_URL, device.device_type, device.device_id
    )
}

/// Fetch the devices for `auth_token`, keeping only those at
/// `only_location` when given.
pub fn fetch_devices(
    transport: &dyn Transport,
    auth_token: &str,
    only_location: Option<&str>,
) -> Result<Vec<AwairDevice>, PipelineError> {
    let body = transport.get_text(&build_devices_url(), Some(auth_token))?;
    let response: DeviceListResponse = decode(&body, "Awair device list")?;
    Ok(filter_devices(response.devices, only_location))
}

pub fn filter_devices(devices: Vec<AwairDevice>, only_location: Option<&str>) -> Vec<AwairDevice> {
    match only_location {
        Some(location) => devices
            .into_iter()
            .filter(|d| d.location_name == location)
            .collect(),
        None => devices,
    }
}

pub fn fetch_air_data(
    transport: &dyn Transport,
    auth_token: &str,
    device: &AwairDevice,
) -> Result<AirDataResponse, PipelineError> {
    let body = transport.get_text(&build_air_data_url(device), Some(auth_token))?;
    decode(&body, &format!("Awair air-data for {}", device.id()))
}

// ============================================================================
// Normalization
// ============================================================================

/// Turn one device's latest snapshot into a reading.
///
/// Returns `Ok(None)` when the data window is empty. `temp`, `humid`,
/// `co2` and `voc` are required; `pm25` is optional and becomes `dust`.
pub fn normalize_device(
    device: &AwairDevice,
    air_data: &AirDataResponse,
) -> Result<Option<IndoorDeviceReading>, PipelineError> {
    let Some(point) = air_data.data.first() else {
        return Ok(None);
    };

    let component = |comp: &str| -> Option<f64> {
        point.sensors.iter().find(|s| s.comp == comp).map(|s| s.value)
    };
    let required = |comp: &str, field: IndoorField| -> Result<f64, PipelineError> {
        component(comp).map(|v| field.quantize(v)).ok_or_else(|| {
            PipelineError::MalformedPayload(format!("device {} has no '{}' sensor value", device.id(), comp))
        })
    };

    Ok(Some(IndoorDeviceReading {
        location: device.name.clone(),
        physical_location: device.location_name.clone(),
        device: device.id(),
        timestamp: point.timestamp,
        temp: required("temp", IndoorField::Temp)?,
        humid: required("humid", IndoorField::Humid)?,
        co2: required("co2", IndoorField::Co2)?,
        voc: required("voc", IndoorField::Voc)?,
        dust: component("pm25").map(|v| IndoorField::Dust.quantize(v)),
    }))
}

// ============================================================================
// Tests
// ============================================================================
