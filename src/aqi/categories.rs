//! AQI health categories.
//!
//! The published AQI bands, used to attach a human-readable description
//! to the index on dashboards.

/// AQI categories, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    /// Category for an index value. Anything above 300 is hazardous,
    /// including values past the nominal 500 ceiling.
    pub fn from_aqi(aqi: u32) -> AqiCategory {
        match aqi {
            0..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Moderate,
            101..=150 => AqiCategory::UnhealthyForSensitiveGroups,
            151..=200 => AqiCategory::Unhealthy,
            201..=300 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for SG",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            AqiCategory::Good => "Green",
            AqiCategory::Moderate => "Yellow",
            AqiCategory::UnhealthyForSensitiveGroups => "Orange",
            AqiCategory::Unhealthy => "Red",
            AqiCategory::VeryUnhealthy => "Purple",
            AqiCategory::Hazardous => "Maroon",
        }
    }
}
