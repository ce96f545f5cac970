//! Append-only durable sinks.
//!
//! The exchange log records one CSV row per wire exchange and per connection
//! state change. Each append opens the file, writes a single row, and closes
//! it again; a row is the atomic unit, so no partial-write recovery is
//! needed. Rows are never mutated after being written.

use crate::data::{EventRecord, LogEntry};
use crate::error::LinkResult;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const EXCHANGE_LOG_HEADER: [&str; 3] = ["Datetime", "Command", "Response"];

/// Append-only CSV log of every exchanged frame.
#[derive(Debug, Clone)]
pub struct ExchangeLog {
    path: PathBuf,
}

impl ExchangeLog {
    /// Open the log at `path`, creating it with the header row if absent.
    /// An existing file is reused as-is.
    pub fn open(path: impl Into<PathBuf>) -> LinkResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            let file = std::fs::File::create(&path)?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(EXCHANGE_LOG_HEADER)?;
            writer.flush()?;
            log::info!("Exchange log created at '{}'", path.display());
        } else {
            log::info!("Appending to existing exchange log '{}'", path.display());
        }

        Ok(Self { path })
    }

    /// Append one entry as a single row.
    pub fn append(&self, entry: &LogEntry) -> LinkResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([
            entry.timestamp.to_rfc3339(),
            entry.command.clone(),
            entry.response.clone(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Flush the in-memory event log as one free-text line per entry.
pub fn write_event_log(path: &Path, events: &[EventRecord]) -> LinkResult<()> {
    let mut file = std::fs::File::create(path)?;
    for event in events {
        writeln!(file, "{} {}", event.timestamp.to_rfc3339(), event.text)?;
    }
    Ok(())
}
