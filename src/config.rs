//! Service configuration.
//!
//! Loaded from a TOML file (`sensor.toml` by default). History goes to the
//! database file named by `db_file`; without one, a Postgres URL is taken
//! from `database_url` or from `DATABASE_URL` in the environment, with
//! `.env` support via `dotenv`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::logging::LogLevel;

pub const DEFAULT_CONFIG_PATH: &str = "sensor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing setting: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub all: GeneralConfig,
    #[serde(default)]
    pub awair: Option<AwairConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings shared by every source.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    /// History database file.
    #[serde(default)]
    pub db_file: Option<PathBuf>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

/// Where history is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryBackend {
    File(PathBuf),
    Postgres(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwairConfig {
    pub auth_token: String,
    /// Home physical location; devices there publish under a shorter topic.
    #[serde(default)]
    pub location: Option<String>,
    /// Only poll devices whose physical location equals `location`.
    #[serde(default)]
    pub only_location: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
            timestamps: default_timestamps(),
        }
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_lock_dir() -> PathBuf {
    env::temp_dir()
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_timestamps() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// `db_file` when set, else a Postgres URL.
    pub fn history_backend(&self) -> Result<HistoryBackend, ConfigError> {
        if let Some(path) = &self.all.db_file {
            return Ok(HistoryBackend::File(path.clone()));
        }
        self.database_url()
            .map(HistoryBackend::Postgres)
            .map_err(|_| ConfigError::Missing("all.db_file, all.database_url or DATABASE_URL"))
    }

    /// Database URL from the file, else `DATABASE_URL` (loading `.env` first).
    pub fn database_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.all.database_url {
            return Ok(url.clone());
        }
        dotenv::dotenv().ok();
        env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("all.database_url or DATABASE_URL"))
    }

    pub fn awair(&self) -> Result<&AwairConfig, ConfigError> {
        self.awair.as_ref().ok_or(ConfigError::Missing("[awair] section"))
    }
}
