use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};

use aqmon_service::config::{Config, HistoryBackend, DEFAULT_CONFIG_PATH};
use aqmon_service::history::{HistoryStore, PostgresHistory, SqliteHistory, TableSpec};
use aqmon_service::ingest::build_client;
use aqmon_service::lock::{lock_path, InstanceLock};
use aqmon_service::logging::{self, DataSource, LogLevel};
use aqmon_service::model::PipelineError;
use aqmon_service::pipeline::{run_cycle, AwairSource, CycleOptions, PurpleAirSource, SensorSource};
use aqmon_service::publish::MqttPublisher;
use aqmon_service::verify;

/// Poll air quality sensors, record history and publish to MQTT.
#[derive(Debug, Parser)]
#[command(name = "aqmon", version, about)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Do not write readings to the history store
    #[arg(long, global = true)]
    nosave: bool,

    /// Do not publish to the MQTT broker
    #[arg(long, global = true)]
    nomqtt: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll PurpleAir stations, first listed preferred
    Purpleair {
        #[arg(required = true)]
        station_ids: Vec<u64>,
    },
    /// Poll every Awair device on the account
    Awair,
    /// Check stations and devices against the live APIs
    Verify {
        /// PurpleAir station id to check (repeatable)
        #[arg(long = "station")]
        stations: Vec<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logger(LogLevel::Info, None, true);
            logging::error(DataSource::System, None, &format!("Failed to load configuration: {}", e));
            return ExitCode::FAILURE;
        }
    };

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.logging.level
    };
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.timestamps);

    let options = CycleOptions {
        persist: !cli.nosave,
        publish: !cli.nomqtt,
    };

    let result = match &cli.command {
        Command::Purpleair { station_ids } => build_client().and_then(|client| {
            let source = PurpleAirSource::new(&client, station_ids.clone());
            run_source(&source, &config, options)
        }),
        Command::Awair => config
            .awair()
            .map_err(PipelineError::from)
            .and_then(|awair| {
                let client = build_client()?;
                let source = AwairSource::new(&client, awair.auth_token.clone())
                    .with_location(awair.location.clone(), awair.only_location);
                run_source(&source, &config, options)
            }),
        Command::Verify { stations } => return run_verify(&config, stations),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::log_failure(DataSource::System, None, "run", &e);
            ExitCode::FAILURE
        }
    }
}

/// Run one cycle under the source's instance lock.
fn run_source<S: SensorSource>(source: &S, config: &Config, options: CycleOptions) -> Result<(), PipelineError> {
    let path = lock_path(&config.all.lock_dir, source.name());
    let Some(_lock) = InstanceLock::try_acquire(&path).map_err(PipelineError::Lock)? else {
        logging::info(
            source.data_source(),
            None,
            &format!("another instance holds {}, exiting", path.display()),
        );
        return Ok(());
    };

    let mut history = open_history(config, source.table())?;
    let mut publisher = MqttPublisher::new(config.all.mqtt_host.as_str(), config.all.mqtt_port);

    let summary = run_cycle(source, history.as_mut(), &mut publisher, options, Utc::now())?;
    logging::log_cycle_summary(
        source.data_source(),
        summary.readings,
        summary.rows_written,
        summary.published,
    );
    Ok(())
}

fn open_history(config: &Config, table: &TableSpec) -> Result<Box<dyn HistoryStore>, PipelineError> {
    match config.history_backend()? {
        HistoryBackend::File(path) => {
            let history = SqliteHistory::open(&path)?;
            logging::debug(DataSource::Database, None, &format!("opened history file {}", path.display()));
            Ok(Box::new(history))
        }
        HistoryBackend::Postgres(url) => {
            let history = PostgresHistory::connect_and_verify(&url, &[table])?;
            logging::debug(DataSource::Database, None, "connected to Postgres history");
            Ok(Box::new(history))
        }
    }
}

fn run_verify(config: &Config, stations: &[u64]) -> ExitCode {
    let client = match build_client() {
        Ok(client) => client,
        Err(e) => {
            logging::log_failure(DataSource::System, None, "verify", &e);
            return ExitCode::FAILURE;
        }
    };

    let report = verify::run_verification(&client, stations, config.awair.as_ref(), Utc::now());
    verify::print_summary(&report);

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => logging::warn(DataSource::System, None, &format!("report encoding failed: {}", e)),
    }

    let failed = report.summary.stations_failed + report.summary.devices_failed;
    if failed == 0 && report.device_list_error.is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
