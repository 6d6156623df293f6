//! EPA Air Quality Index calculation.
//!
//! Maps a pollutant concentration onto the index with the EPA
//! piecewise-linear breakpoint tables:
//!
//! ```text
//! I = round(I_lo + (I_hi - I_lo) / (C_hi - C_lo) * (C - C_lo))
//! ```
//!
//! Concentrations are truncated to the table's resolution before lookup
//! (0.1 µg/m³ for PM2.5, 1 µg/m³ for PM10), so every truncated value falls
//! inside exactly one interval. Values above the top breakpoint are an
//! error rather than being clamped to 500.
//!
//! Reference: EPA Technical Assistance Document for the Reporting of Daily
//! Air Quality (EPA-454/B-18-007), PM tables prior to the 2024 revision.

pub mod categories;

use std::fmt;

use thiserror::Error;

pub use categories::AqiCategory;

// ---------------------------------------------------------------------------
// Pollutants and breakpoint tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pollutant {
    Pm25,
    Pm10,
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pollutant::Pm25 => write!(f, "PM2.5"),
            Pollutant::Pm10 => write!(f, "PM10"),
        }
    }
}

/// One breakpoint interval, with concentrations in table units
/// (tenths of µg/m³ for PM2.5, whole µg/m³ for PM10).
struct Breakpoint {
    c_lo: i64,
    c_hi: i64,
    i_lo: u32,
    i_hi: u32,
}

const fn bp(c_lo: i64, c_hi: i64, i_lo: u32, i_hi: u32) -> Breakpoint {
    Breakpoint { c_lo, c_hi, i_lo, i_hi }
}

static PM25_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0, 120, 0, 50),       // Good
    bp(121, 354, 51, 100),   // Moderate
    bp(355, 554, 101, 150),  // Unhealthy for Sensitive Groups
    bp(555, 1504, 151, 200), // Unhealthy
    bp(1505, 2504, 201, 300), // Very Unhealthy
    bp(2505, 3504, 301, 400), // Hazardous
    bp(3505, 5004, 401, 500), // Hazardous
];

static PM10_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0, 54, 0, 50),
    bp(55, 154, 51, 100),
    bp(155, 254, 101, 150),
    bp(255, 354, 151, 200),
    bp(355, 424, 201, 300),
    bp(425, 504, 301, 400),
    bp(505, 604, 401, 500),
];

impl Pollutant {
    fn breakpoints(self) -> &'static [Breakpoint] {
        match self {
            Pollutant::Pm25 => &PM25_BREAKPOINTS,
            Pollutant::Pm10 => &PM10_BREAKPOINTS,
        }
    }

    /// Table units per µg/m³.
    fn scale(self) -> f64 {
        match self {
            Pollutant::Pm25 => 10.0,
            Pollutant::Pm10 => 1.0,
        }
    }

    /// Highest concentration (µg/m³) covered by the table.
    pub fn max_concentration(self) -> f64 {
        let top = self.breakpoints().last().map(|b| b.c_hi).unwrap_or(0);
        top as f64 / self.scale()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AqiError {
    /// Concentration is negative, not finite, or above the top breakpoint.
    #[error("{pollutant} concentration {concentration} is outside the breakpoint table")]
    OutOfRange { pollutant: Pollutant, concentration: f64 },
}

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

/// Computes the AQI for `concentration` (µg/m³) of `pollutant`.
///
/// Callers must skip the call when no concentration is available; an
/// undefined reading is never treated as zero.
pub fn compute_aqi(pollutant: Pollutant, concentration: f64) -> Result<u32, AqiError> {
    let out_of_range = AqiError::OutOfRange { pollutant, concentration };
    if !concentration.is_finite() || concentration < 0.0 {
        return Err(out_of_range);
    }

    // Small epsilon so values like 35.4 survive float representation.
    let truncated = (concentration * pollutant.scale() + 1e-9).floor() as i64;

    let b = pollutant
        .breakpoints()
        .iter()
        .find(|b| truncated >= b.c_lo && truncated <= b.c_hi)
        .ok_or(out_of_range)?;

    // Interpolate in integers so exact halves round half to even.
    let span = b.c_hi - b.c_lo;
    let scaled = i64::from(b.i_hi - b.i_lo) * (truncated - b.c_lo);
    let mut index = i64::from(b.i_lo) + scaled / span;
    let twice_remainder = 2 * (scaled % span);
    if twice_remainder > span || (twice_remainder == span && index % 2 == 1) {
        index += 1;
    }
    Ok(index as u32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
