//! Custom error types for the application.
//!
//! `LinkError` consolidates the error sources of the crate. Transport
//! implementations use `anyhow` internally for context-rich I/O errors;
//! the protocol engines surface typed errors at their public boundary so
//! callers can distinguish a fatal device fault from an exhausted busy-poll
//! or a configuration problem.
//!
//! Only `Device` and `Timeout` abort a running command sequence. Decode
//! problems and writes against a closed port are handled where they occur
//! and never become a `LinkError`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Device still busy after {attempts} status polls")]
    Timeout { attempts: u32 },

    #[error("Device error in response to '{command}': {response}")]
    Device { command: String, response: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
