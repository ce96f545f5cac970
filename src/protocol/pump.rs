//! Synchronous command/response engine for pump-style devices.
//!
//! One command is in flight at a time: IDLE -> SENT -> (ACK | BUSY | ERROR).
//! After every acknowledged command the engine enters a ready-wait,
//! repeatedly issuing the status query until the device stops reporting
//! busy. The wait is bounded; exhausting the bound yields a typed
//! [`LinkError::Timeout`] instead of polling forever. A decoded device
//! error aborts the wait and the whole pending sequence.
//!
//! Each completed exchange is sunk as exactly one log entry. Busy polls are
//! surfaced as progress logging only. If the transport failed to open, every
//! send degrades to a local diagnostic no-op so a session with a dead port
//! still runs to completion with a symmetric open/close record.

use crate::data::LogEntry;
use crate::error::{LinkError, LinkResult};
use crate::protocol::codec::{Codec, Decoded};
use crate::sequence::SequenceItem;
use crate::sink::ExchangeLog;
use crate::transport::Transport;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Status query issued during the ready-wait.
const STATUS_QUERY: &str = "?";

/// Engine state over the single in-flight command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Sent,
    Busy,
    Fault,
}

pub struct PumpEngine {
    transport: Arc<dyn Transport>,
    codec: Codec,
    log: ExchangeLog,
    poll_interval: Duration,
    max_poll_attempts: u32,
    state: EngineState,
}

impl PumpEngine {
    pub fn new(transport: Arc<dyn Transport>, codec: Codec, log: ExchangeLog) -> Self {
        Self {
            transport,
            codec,
            log,
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 600,
            state: EngineState::Idle,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_bound(mut self, max_attempts: u32) -> Self {
        self.max_poll_attempts = max_attempts;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Open the transport. Failure is degraded, not fatal: the session
    /// continues with a closed handle and every send becomes a no-op
    /// diagnostic. The attempt is sunk either way.
    pub async fn connect(&mut self) -> LinkResult<()> {
        let status = match self.transport.open().await {
            Ok(()) => "Port opened",
            Err(e) => {
                warn!("{:#}", e);
                "Failed to open port"
            }
        };
        info!("Status: {}", status);
        self.log.append(&LogEntry::status(status))?;
        Ok(())
    }

    /// Close the transport and sink the state change.
    pub async fn shutdown(&mut self) -> LinkResult<()> {
        if !self.transport.is_open() {
            return Ok(());
        }
        info!("Closing port ...");
        let status = match self.transport.close().await {
            Ok(()) => "Port closed",
            Err(e) => {
                warn!("{:#}", e);
                "Failed to close port"
            }
        };
        info!("Status: {}", status);
        self.log.append(&LogEntry::status(status))?;
        Ok(())
    }

    /// Run one full command cycle: frame, send, read the response, sink the
    /// exchange, then wait until the device reports ready again.
    pub async fn send_command(&mut self, command: &str) -> LinkResult<()> {
        if !self.transport.is_open() {
            warn!("Did not send command '{}', port closed", command);
            return Ok(());
        }

        self.state = EngineState::Sent;
        let frame = self.codec.encode(command);
        let frame_text = String::from_utf8_lossy(&frame).into_owned();
        self.transport.write(&frame).await?;
        info!("{}", command);

        let raw = self
            .transport
            .read_until(self.codec.response_terminator())
            .await?;
        let decoded = self.codec.decode(&raw);
        let response_text = decoded_text(&decoded);
        info!("> {}", response_text);
        self.log
            .append(&LogEntry::exchange(frame_text, response_text.clone()))?;

        if let Decoded::Fault(text) = decoded {
            self.state = EngineState::Fault;
            return Err(LinkError::Device {
                command: command.to_string(),
                response: text,
            });
        }

        self.wait_ready(command).await?;
        self.state = EngineState::Idle;
        Ok(())
    }

    /// Busy-poll the status query until the device reports ready.
    ///
    /// Busy iterations emit progress logging but are not sunk; a decoded
    /// device error aborts, and exhausting the bound yields a timeout.
    async fn wait_ready(&mut self, command: &str) -> LinkResult<()> {
        for attempt in 1..=self.max_poll_attempts {
            let query = self.codec.encode(STATUS_QUERY);
            self.transport.write(&query).await?;
            let raw = self
                .transport
                .read_until(self.codec.response_terminator())
                .await?;

            match self.codec.decode(&raw) {
                Decoded::Ready(text) => {
                    info!("> {}", text);
                    return Ok(());
                }
                Decoded::Fault(text) => {
                    self.state = EngineState::Fault;
                    return Err(LinkError::Device {
                        command: command.to_string(),
                        response: text,
                    });
                }
                other => {
                    self.state = EngineState::Busy;
                    debug!(
                        "Device busy ({}/{}): {}",
                        attempt,
                        self.max_poll_attempts,
                        decoded_text(&other)
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(LinkError::Timeout {
            attempts: self.max_poll_attempts,
        })
    }

    /// Execute a command sequence, optionally replayed.
    ///
    /// A device error aborts the remaining queued items of every pass; the
    /// caller is expected to still run [`Self::shutdown`] so the session
    /// record stays symmetric.
    pub async fn run_sequence(
        &mut self,
        items: &[SequenceItem],
        repetitions: usize,
    ) -> LinkResult<()> {
        let passes = repetitions.max(1);
        for pass in 1..=passes {
            if passes > 1 {
                info!("Sequence pass {}/{}", pass, passes);
            }
            for item in items {
                match item {
                    SequenceItem::Command(cmd) => self.send_command(cmd).await?,
                    SequenceItem::Delay(secs) => self.delay(*secs).await,
                    SequenceItem::Marker { block, step } => {
                        info!("Block: {}", block);
                        info!("Step: {}", step);
                    }
                }
            }
        }
        Ok(())
    }

    /// Suspend the sequence, logging the intended wall-clock window first.
    /// Zero or negative delays are never scheduled.
    async fn delay(&self, secs: f64) {
        if secs <= 0.0 {
            return;
        }
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds((secs * 1000.0) as i64);
        info!(
            "Delay: {} seconds (start {}, end {})",
            secs,
            start.format("%H:%M:%S"),
            end.format("%H:%M:%S")
        );
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

fn decoded_text(decoded: &Decoded) -> String {
    match decoded {
        Decoded::Ready(t)
        | Decoded::Busy(t)
        | Decoded::Fault(t)
        | Decoded::Event(t)
        | Decoded::Malformed(t) => t.clone(),
        Decoded::Telemetry(rec) => format!("SIG tuple ({} channels)", rec.channels.len()),
        Decoded::Empty => String::new(),
    }
}
