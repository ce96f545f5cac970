//! Continuous telemetry acquisition with an interactive control channel.
//!
//! Two activities share one transport handle: the acquisition loop performs
//! blocking frame reads and routes every decode result (telemetry into the
//! append-only series, everything else into the event log), while the
//! control loop forwards operator commands verbatim to the device and
//! recognizes the local start/stop directives. Cancellation is cooperative
//! through one shared flag checked once per read; worst-case shutdown
//! latency is one transport read timeout.
//!
//! The control channel is an explicit `mpsc` receiver so the engine works
//! the same whether commands come from stdin, a script, or a test.

use crate::data::{EventRecord, LogEntry, TelemetrySeries};
use crate::error::{LinkError, LinkResult};
use crate::protocol::codec::{Codec, Decoded};
use crate::sink::{self, ExchangeLog};
use crate::transport::Transport;
use chrono::Utc;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct AcquisitionEngine {
    transport: Arc<dyn Transport>,
    codec: Codec,
    series: Arc<TelemetrySeries>,
    events: Arc<Mutex<Vec<EventRecord>>>,
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    log: Option<ExchangeLog>,
    start_directive: String,
    stop_directive: String,
    echo_prefixes: Vec<String>,
    stop_grace: Duration,
}

impl AcquisitionEngine {
    pub fn new(transport: Arc<dyn Transport>, codec: Codec) -> Self {
        Self {
            transport,
            codec,
            series: Arc::new(TelemetrySeries::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            task: None,
            log: None,
            start_directive: "SIG_START".to_string(),
            stop_directive: "STOP".to_string(),
            echo_prefixes: vec!["AZ:".to_string(), "STOP:".to_string()],
            stop_grace: Duration::from_secs(1),
        }
    }

    /// Sink connection state changes and forwarded control commands here.
    pub fn with_exchange_log(mut self, log: ExchangeLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_directives(
        mut self,
        start: impl Into<String>,
        stop: impl Into<String>,
    ) -> Self {
        self.start_directive = start.into();
        self.stop_directive = stop.into();
        self
    }

    pub fn with_echo_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.echo_prefixes = prefixes;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Live-view boundary: the append-only series, safe to snapshot while
    /// acquisition is running.
    pub fn series(&self) -> Arc<TelemetrySeries> {
        Arc::clone(&self.series)
    }

    /// Copy of the event log accumulated so far.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether the acquisition loop is currently running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Open the transport; the attempt is sunk regardless of outcome.
    pub async fn connect(&mut self) -> LinkResult<()> {
        let status = match self.transport.open().await {
            Ok(()) => "Port opened",
            Err(e) => {
                warn!("{:#}", e);
                "Failed to open port"
            }
        };
        info!("Status: {}", status);
        if let Some(log) = &self.log {
            log.append(&LogEntry::status(status))?;
        }
        Ok(())
    }

    /// Issue the initial identification/status queries synchronously and
    /// append every response to the event log.
    ///
    /// A closed transport skips the queries with a diagnostic; the session
    /// continues degraded, like every other send against a dead port.
    pub async fn interrogate(&self, queries: &[String]) -> LinkResult<()> {
        if !self.transport.is_open() {
            warn!("Skipped initial queries, port closed");
            return Ok(());
        }
        for query in queries {
            self.transport
                .write(&self.codec.frame_raw(query))
                .await
                .map_err(LinkError::Other)?;
            let raw = self
                .transport
                .read_until(self.codec.response_terminator())
                .await
                .map_err(LinkError::Other)?;
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim().to_string();
            info!("{}", text);
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(EventRecord::now(text));
        }
        Ok(())
    }

    /// Start the acquisition loop. Idempotent: a second start while the
    /// loop is running is ignored. Returns whether a loop was started.
    pub fn start_acquisition(&mut self) -> bool {
        if self.is_running() {
            warn!("Acquisition loop already running, start ignored");
            return false;
        }

        let transport = Arc::clone(&self.transport);
        let codec = self.codec.clone();
        let series = Arc::clone(&self.series);
        let events = Arc::clone(&self.events);
        let stop = Arc::clone(&self.stop);
        let echo_prefixes = self.echo_prefixes.clone();

        self.task = Some(tokio::spawn(async move {
            info!("Acquisition loop started");
            while !stop.load(Ordering::SeqCst) {
                let raw = match transport.read_until(codec.response_terminator()).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Acquisition read failed: {:#}", e);
                        break;
                    }
                };
                if raw.is_empty() {
                    // Read timeout with an idle line; re-check the flag.
                    continue;
                }

                match codec.decode(&raw) {
                    Decoded::Telemetry(record) => series.append(record),
                    Decoded::Malformed(_) | Decoded::Empty => {
                        // Malformed tuples are already logged by the codec;
                        // dropped, never appended.
                    }
                    Decoded::Ready(text)
                    | Decoded::Busy(text)
                    | Decoded::Fault(text)
                    | Decoded::Event(text) => {
                        if echo_prefixes.iter().any(|p| text.starts_with(p)) {
                            info!("{}", text);
                        }
                        events
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(EventRecord::now(text));
                    }
                }
            }
            info!("Acquisition loop stopped");
        }));
        true
    }

    /// Request a cooperative stop of the acquisition loop.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Consume the control channel until the stop directive arrives or the
    /// channel closes.
    ///
    /// Every command is forwarded verbatim to the device (terminator only,
    /// no address framing, fire-and-forget); the start and stop directives
    /// are additionally interpreted locally.
    pub async fn run_control(
        &mut self,
        mut commands: mpsc::Receiver<String>,
    ) -> LinkResult<()> {
        info!("Control loop started");
        while let Some(command) = commands.recv().await {
            let command = command.trim().to_string();
            if command.is_empty() {
                continue;
            }

            if self.transport.is_open() {
                if let Err(e) = self.transport.write(&self.codec.frame_raw(&command)).await
                {
                    warn!("Failed to forward '{}': {:#}", command, e);
                }
                if let Some(log) = &self.log {
                    log.append(&LogEntry::exchange(command.clone(), ""))?;
                }
            } else {
                warn!("Did not send command '{}', port closed", command);
            }

            if command == self.start_directive {
                self.start_acquisition();
                info!("Type {} to end the session", self.stop_directive);
            } else if command == self.stop_directive {
                self.request_stop();
                // One grace period for the loop to observe the flag.
                tokio::time::sleep(self.stop_grace).await;
                break;
            }
        }
        // A closed channel also ends the session.
        self.request_stop();
        info!("Control loop stopped");
        Ok(())
    }

    /// End the session: join the acquisition loop, flush the series and
    /// event log, close the transport.
    ///
    /// Returns the paths of the telemetry matrix and the event text log.
    pub async fn finalize(mut self, out_dir: &Path) -> LinkResult<(PathBuf, PathBuf)> {
        self.request_stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        std::fs::create_dir_all(out_dir)?;
        let stamp = Utc::now().format("%y%m%d_%H%M_%S");
        let data_path = out_dir.join(format!("{}_telemetry.csv", stamp));
        let events_path = out_dir.join(format!("{}_events.txt", stamp));

        let channel_count = self.codec.telemetry_arity().saturating_sub(1);
        self.series.write_csv(&data_path, channel_count)?;
        let events = self.events();
        sink::write_event_log(&events_path, &events)?;
        info!(
            "Session flushed: {} telemetry records, {} events",
            self.series.len(),
            events.len()
        );

        if self.transport.is_open() {
            let status = match self.transport.close().await {
                Ok(()) => "Port closed",
                Err(e) => {
                    warn!("{:#}", e);
                    "Failed to close port"
                }
            };
            info!("Status: {}", status);
            if let Some(log) = &self.log {
                log.append(&LogEntry::status(status))?;
            }
        }

        Ok((data_path, events_path))
    }
}
