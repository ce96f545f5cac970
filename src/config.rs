//! Application configuration.
//!
//! Settings are loaded in three layers: built-in defaults, an optional TOML
//! file, and environment variables prefixed with `LABLINK_` (double
//! underscore as section separator, e.g. `LABLINK_SERIAL__PORT`).
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! timeout_ms = 1000
//!
//! [protocol]
//! address = "/1"
//! poll_interval_ms = 1000
//! max_poll_attempts = 600
//! telemetry_arity = 5
//! repetitions = 1
//!
//! [storage]
//! output_dir = "output"
//! ```

use crate::error::LinkResult;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Serial port parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Communication speed (e.g. 9600, 115200)
    pub baud_rate: u32,
    /// Overall read timeout per frame
    pub timeout_ms: u64,
}

/// Wire protocol parameters shared by both engine variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Device address prefixed to every framed command
    pub address: String,
    /// Delay between status polls while the device reports busy
    pub poll_interval_ms: u64,
    /// Status polls before the ready-wait gives up with a timeout error
    pub max_poll_attempts: u32,
    /// Total numeric field count of one telemetry frame (device timestamp
    /// included)
    pub telemetry_arity: usize,
    /// Number of times the whole command sequence is replayed
    pub repetitions: usize,
    /// Control directive that starts the acquisition loop
    pub start_directive: String,
    /// Control directive that requests a cooperative stop
    pub stop_directive: String,
    /// Grace period between setting the stop flag and joining the
    /// acquisition loop
    pub stop_grace_ms: u64,
    /// Event prefixes echoed to the operator during acquisition
    pub echo_prefixes: Vec<String>,
    /// Identification/status queries issued before the control loop starts
    pub init_queries: Vec<String>,
}

/// Output locations for session artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for the exchange log and session-end flushes
    pub output_dir: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            address: "/1".to_string(),
            poll_interval_ms: 1000,
            max_poll_attempts: 600,
            telemetry_arity: 5,
            repetitions: 1,
            start_directive: "SIG_START".to_string(),
            stop_directive: "STOP".to_string(),
            stop_grace_ms: 1000,
            echo_prefixes: vec!["AZ:".to_string(), "STOP:".to_string()],
            init_queries: vec![
                "IDENTIFY?".to_string(),
                "INFO?".to_string(),
                "STATUS?".to_string(),
            ],
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            protocol: ProtocolSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, and the
    /// environment.
    pub fn new(config_path: Option<&Path>) -> LinkResult<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(Environment::with_prefix("LABLINK").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
