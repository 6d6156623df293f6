/// Structured logging for the air quality service
///
/// Thin layer over `tracing` that tags every event with the data source
/// and, where relevant, the station or device it concerns. Console output
/// goes to stderr; an optional log file receives the same events without
/// ANSI colors. `RUST_LOG` overrides the configured level.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::model::PipelineError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Config files name the level as a string; unknown names are rejected.
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    PurpleAir,
    Awair,
    Database,
    Mqtt,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::PurpleAir => write!(f, "PURPLEAIR"),
            DataSource::Awair => write!(f, "AWAIR"),
            DataSource::Database => write!(f, "DB"),
            DataSource::Mqtt => write!(f, "MQTT"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - station offline, sensor fault or a real extreme event
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_logger(min_level: LogLevel, log_file: Option<&Path>, console_timestamps: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

    let console = if console_timestamps {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = log_file.and_then(|path| match file_appender(path) {
        Ok(appender) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender),
        ),
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", path.display(), e);
            None
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "aqmon.log".to_string());

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(source: DataSource, site_id: Option<&str>, message: &str) {
    tracing::info!(source = %source, site = site_id.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(source: DataSource, site_id: Option<&str>, message: &str) {
    tracing::warn!(source = %source, site = site_id.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(source: DataSource, site_id: Option<&str>, message: &str) {
    tracing::error!(source = %source, site = site_id.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(source: DataSource, site_id: Option<&str>, message: &str) {
    tracing::debug!(source = %source, site = site_id.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a pipeline failure.
///
/// Vendor-side conditions that come and go (a station dropping out of the
/// response, an implausible sensor value) are `Unknown`; anything pointing
/// at our configuration, the API contract or local infrastructure is
/// `Unexpected`.
pub fn classify_failure(err: &PipelineError) -> FailureType {
    match err {
        PipelineError::NoMatchingStation(_) => FailureType::Unknown,
        PipelineError::OutOfRangeConcentration(_) => FailureType::Unknown,
        PipelineError::SourceUnavailable(_)
        | PipelineError::MalformedPayload(_)
        | PipelineError::History(_)
        | PipelineError::Publish(_)
        | PipelineError::Config(_)
        | PipelineError::Lock(_) => FailureType::Unexpected,
    }
}

/// Log a pipeline failure with automatic classification
pub fn log_failure(source: DataSource, site_id: Option<&str>, operation: &str, err: &PipelineError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Unexpected => error(source, site_id, &message),
        FailureType::Unknown => warn(source, site_id, &message),
    }
}

/// A delta or AQI field was omitted because no baseline row exists.
pub fn log_missing_baseline(source: DataSource, site_id: &str, field: &str) {
    debug(
        source,
        Some(site_id),
        &format!("no historical baseline for '{}', field omitted", field),
    );
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one fetch-compute-store-publish cycle
pub fn log_cycle_summary(source: DataSource, readings: usize, rows_written: usize, published: usize) {
    let message = format!(
        "Cycle complete: {} readings, {} rows stored, {} messages published",
        readings, rows_written, published
    );

    if readings == 0 {
        warn(source, None, &message);
    } else {
        info(source, None, &message);
    }
}
