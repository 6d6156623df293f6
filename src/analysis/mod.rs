//! Reading analysis for the air quality service.
//!
//! Pure computations over canonical readings, plus the history lookups
//! the delta engine needs.
//!
//! Submodules:
//! - `averaging`: per-channel averages across duplicate station records.
//! - `delta`: hour-over-hour deltas and the smoothed indoor AQI.
//! - `staleness`: station freshness and multi-station selection.

pub mod averaging;
pub mod delta;
pub mod staleness;
