//! Append-only telemetry series shared between the acquisition loop and
//! live consumers.
//!
//! The acquisition loop is the only appender; readers (live plot, session
//! flush) take snapshots. The published length is stored in an atomic that
//! is only advanced after the record is fully in place, so a snapshot can
//! never observe a partially written record. Records are never removed or
//! mutated during a run.

use crate::data::TelemetryRecord;
use crate::error::LinkResult;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct TelemetrySeries {
    rows: RwLock<Vec<TelemetryRecord>>,
    published: AtomicUsize,
}

impl TelemetrySeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record and publish the new length.
    pub fn append(&self, record: TelemetryRecord) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.push(record);
        let len = rows.len();
        drop(rows);
        self.published.store(len, Ordering::Release);
    }

    /// Number of fully published records.
    pub fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the published prefix. Valid under concurrent appends: the
    /// length bound is taken before indexing.
    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        let bound = self.published.load(Ordering::Acquire);
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows[..bound.min(rows.len())].to_vec()
    }

    /// Flush the whole series as a numeric CSV matrix.
    ///
    /// Header: `Channel1,...,Channel{n-1},Temperature,TimeStamp` where the
    /// final channel of each record is the device temperature.
    /// `channel_count` fixes the header width, so an empty session still
    /// writes the full documented header.
    pub fn write_csv(&self, path: &Path, channel_count: usize) -> LinkResult<()> {
        let rows = self.snapshot();
        let mut writer = csv::Writer::from_path(path)?;

        let mut header: Vec<String> = (1..channel_count)
            .map(|i| format!("Channel{}", i))
            .collect();
        if channel_count > 0 {
            header.push("Temperature".to_string());
        }
        header.push("TimeStamp".to_string());
        writer.write_record(&header)?;

        for row in &rows {
            let mut record: Vec<String> =
                row.channels.iter().map(|v| v.to_string()).collect();
            record.push(row.device_time.to_string());
            writer.write_record(&record)?;
        }
        writer.flush().map_err(crate::error::LinkError::Io)?;
        Ok(())
    }
}
