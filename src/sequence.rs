//! Command sequences driving the pump-style protocol engine.
//!
//! A sequence interleaves device commands, delays, and structural
//! block/step markers. Sequences are usually loaded from a CSV file with
//! `Block,Step,Command,Sleep` columns; every row yields a marker followed by
//! its command, and a delay when the sleep column is positive.

use crate::error::LinkResult;
use serde::Deserialize;
use std::path::Path;

/// One queued item of a command sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum SequenceItem {
    /// Device command string, framed and sent through the engine
    Command(String),
    /// Suspend the sequence for this many seconds
    Delay(f64),
    /// Structural label, logged for traceability but never sent
    Marker { block: String, step: String },
}

#[derive(Debug, Deserialize)]
struct SequenceRow {
    #[serde(rename = "Block")]
    block: String,
    #[serde(rename = "Step")]
    step: String,
    #[serde(rename = "Command")]
    command: String,
    #[serde(rename = "Sleep", default)]
    sleep: f64,
}

/// Load a command sequence from a CSV file.
///
/// Zero or negative sleep values are never scheduled.
pub fn load_csv(path: &Path) -> LinkResult<Vec<SequenceItem>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut items = Vec::new();

    for row in reader.deserialize() {
        let row: SequenceRow = row?;
        items.push(SequenceItem::Marker {
            block: row.block,
            step: row.step,
        });
        items.push(SequenceItem::Command(row.command));
        if row.sleep > 0.0 {
            items.push(SequenceItem::Delay(row.sleep));
        }
    }

    Ok(items)
}
