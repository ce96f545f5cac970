//! Frame construction and response decoding.
//!
//! Outgoing frames are `<address><payload><CR>`. Incoming frames carry an
//! "end of text + CR + LF" marker triple and 0xFF filler bytes, both of
//! which are stripped before the remaining payload is matched against the
//! recognized prefixes:
//!
//! - `` /0` `` — device ready (ack)
//! - `/0i`     — device error (fatal for the in-flight command)
//! - `/0...`   — any other status-address line means the device is busy
//! - `SIG:`    — telemetry tuple, comma-separated numeric fields
//!
//! Anything else is an event line. Decoding never fails on malformed input;
//! bad telemetry tuples come back as [`Decoded::Malformed`] with a logged
//! warning and are dropped by the caller.

use crate::data::TelemetryRecord;
use log::warn;

/// Marker triple terminating framed responses.
pub const ETX_CR_LF: &[u8] = b"\x03\r\n";
/// Standalone filler byte padded into responses by some devices.
pub const FILLER: u8 = 0xFF;

const READY_STATUS: &str = "/0`";
const FAULT_STATUS: &str = "/0i";
const RESPONSE_ADDRESS: &str = "/0";
const TELEMETRY_PREFIX: &str = "SIG:";

/// Result of decoding one incoming frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// Device reports ready; payload is the stripped response text
    Ready(String),
    /// Device still executing; the engine must keep polling
    Busy(String),
    /// Device error; fatal for the pending command sequence
    Fault(String),
    /// Well-formed telemetry tuple
    Telemetry(TelemetryRecord),
    /// Any other status/info line
    Event(String),
    /// Telemetry-marked frame with wrong arity or non-numeric fields
    Malformed(String),
    /// Nothing readable arrived before the timeout
    Empty,
}

/// Framing rules for one instrument.
#[derive(Clone, Debug)]
pub struct Codec {
    address: String,
    response_terminator: Vec<u8>,
    telemetry_arity: usize,
}

impl Codec {
    /// Codec for pump-style devices: addressed commands, ETX-framed
    /// responses.
    pub fn pump(address: impl Into<String>) -> Self {
        let mut terminator = ETX_CR_LF.to_vec();
        terminator.push(FILLER);
        Self {
            address: address.into(),
            response_terminator: terminator,
            telemetry_arity: 5,
        }
    }

    /// Codec for sensor-style devices: bare commands, CR-delimited lines.
    pub fn sensor(telemetry_arity: usize) -> Self {
        Self {
            address: String::new(),
            response_terminator: b"\r".to_vec(),
            telemetry_arity,
        }
    }

    pub fn with_telemetry_arity(mut self, arity: usize) -> Self {
        self.telemetry_arity = arity;
        self
    }

    /// Delimiter the transport should read up to for this device.
    pub fn response_terminator(&self) -> &[u8] {
        &self.response_terminator
    }

    /// Total numeric field count of one telemetry frame, device timestamp
    /// included.
    pub fn telemetry_arity(&self) -> usize {
        self.telemetry_arity
    }

    /// Build the full outgoing frame: address, payload, CR terminator.
    pub fn encode(&self, command: &str) -> Vec<u8> {
        format!("{}{}\r", self.address, command).into_bytes()
    }

    /// Frame a command verbatim, without the device address. Used by the
    /// acquisition control loop, which forwards operator text as-is.
    pub fn frame_raw(&self, command: &str) -> Vec<u8> {
        format!("{}\r", command).into_bytes()
    }

    /// Decode one raw frame into its payload classification.
    pub fn decode(&self, raw: &[u8]) -> Decoded {
        let stripped = strip_markers(raw);
        let text = String::from_utf8_lossy(&stripped);
        let text = text.trim();

        if text.is_empty() {
            return Decoded::Empty;
        }
        if text.starts_with(READY_STATUS) {
            return Decoded::Ready(text.to_string());
        }
        if text.starts_with(FAULT_STATUS) {
            return Decoded::Fault(text.to_string());
        }
        if text.starts_with(RESPONSE_ADDRESS) {
            return Decoded::Busy(text.to_string());
        }
        if let Some(fields) = text.strip_prefix(TELEMETRY_PREFIX) {
            return self.decode_telemetry(fields, text);
        }
        Decoded::Event(text.to_string())
    }

    fn decode_telemetry(&self, fields: &str, full_text: &str) -> Decoded {
        let values: Result<Vec<f64>, _> = fields
            .split(',')
            .map(|f| f.trim().parse::<f64>())
            .collect();

        match values {
            Ok(values) if values.len() == self.telemetry_arity => {
                match values.split_last() {
                    Some((device_time, channels)) => Decoded::Telemetry(TelemetryRecord {
                        channels: channels.to_vec(),
                        device_time: *device_time,
                    }),
                    None => {
                        warn!("Unknown signal format: {}", full_text);
                        Decoded::Malformed(full_text.to_string())
                    }
                }
            }
            _ => {
                warn!("Unknown signal format: {}", full_text);
                Decoded::Malformed(full_text.to_string())
            }
        }
    }
}

/// Remove the ETX+CR+LF marker triple and filler bytes anywhere in the
/// frame; stray marker bytes must never reach payload interpretation.
fn strip_markers(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i..].starts_with(ETX_CR_LF) {
            i += ETX_CR_LF.len();
        } else if raw[i] == FILLER {
            i += 1;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}
