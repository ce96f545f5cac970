//! Data records exchanged between the protocol engines, the telemetry
//! series, and the sinks.

pub mod series;

pub use series::TelemetrySeries;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fixed-arity numeric sample from continuous device output.
///
/// The device reports its own timestamp as the final field of every signal
/// frame; the preceding fields are the signal channels (the last of which is
/// the device temperature).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Signal channels in wire order (device temperature last)
    pub channels: Vec<f64>,
    /// Device timestamp (milliseconds since device start)
    pub device_time: f64,
}

/// A non-telemetry line received during acquisition (status/info/error).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// UTC timestamp when the line was received
    pub timestamp: DateTime<Utc>,
    /// Raw line text with framing stripped
    pub text: String,
}

impl EventRecord {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
        }
    }
}

/// The durable unit written to the exchange log.
///
/// Either side may be empty: connection state changes carry no command, and
/// fire-and-forget control writes carry no response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub response: String,
}

impl LogEntry {
    /// Entry for one command/response exchange.
    pub fn exchange(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            response: response.into(),
        }
    }

    /// Entry for a connection state change ("Port opened", "Port closed", ...).
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            command: String::new(),
            response: text.into(),
        }
    }
}
