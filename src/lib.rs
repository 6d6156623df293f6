//! Air quality monitoring service.
//!
//! Polls the PurpleAir particulate network and Awair indoor monitors,
//! derives EPA AQI values, keeps an hourly history in a database file and
//! publishes current readings plus hour-over-hour deltas over MQTT.

pub mod analysis;
pub mod aqi;
pub mod channels;
pub mod config;
pub mod history;
pub mod ingest;
pub mod lock;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod verify;
