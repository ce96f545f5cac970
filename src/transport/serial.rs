//! Serial transport for RS-232 instruments.
//!
//! Wraps the `serialport` crate and moves every blocking operation onto
//! Tokio's blocking executor. The port handle is cloned into a read half and
//! a write half (`SerialPort::try_clone`), each behind its own lock, so the
//! acquisition loop's blocking read and a concurrent control write can
//! interleave on the wire.

use crate::transport::Transport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serialport::SerialPort;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Internal per-read timeout; the overall frame timeout is enforced by
/// `read_until`.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    reader: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    writer: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    open: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout,
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self) -> Result<()> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        let reader = Arc::clone(&self.reader);
        let writer = Arc::clone(&self.writer);
        let open = Arc::clone(&self.open);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let port = serialport::new(&port_name, baud_rate)
                .timeout(POLL_TIMEOUT)
                .open()
                .with_context(|| {
                    format!(
                        "Failed to open serial port '{}' at {} baud",
                        port_name, baud_rate
                    )
                })?;
            let write_half = port
                .try_clone()
                .context("Failed to clone serial port handle")?;

            *reader.blocking_lock() = Some(port);
            *writer.blocking_lock() = Some(write_half);
            open.store(true, Ordering::SeqCst);

            debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);
            Ok(())
        })
        .await
        .context("Serial open task panicked")?
    }

    async fn close(&self) -> Result<()> {
        *self.reader.lock().await = None;
        *self.writer.lock().await = None;
        self.open.store(false, Ordering::SeqCst);
        debug!("Serial port '{}' closed", self.port_name);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;

            let mut guard = writer.blocking_lock();
            let port = guard
                .as_mut()
                .ok_or_else(|| anyhow!("Serial port not open"))?;

            port.write_all(&bytes)
                .context("Failed to write to serial port")?;
            port.flush().context("Failed to flush serial port")?;
            Ok(())
        })
        .await
        .context("Serial write task panicked")?
    }

    async fn read_until(&self, delimiter: &[u8]) -> Result<Vec<u8>> {
        let reader = Arc::clone(&self.reader);
        let delimiter = delimiter.to_vec();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            use std::io::Read;

            let mut guard = reader.blocking_lock();
            let port = guard
                .as_mut()
                .ok_or_else(|| anyhow!("Serial port not open"))?;

            let mut response: Vec<u8> = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > timeout {
                    // Timeout is not an error: hand back what arrived.
                    return Ok(response);
                }

                match port.read(&mut buffer) {
                    Ok(1) => {
                        response.push(buffer[0]);
                        if response.ends_with(&delimiter) {
                            return Ok(response);
                        }
                    }
                    Ok(_) => return Err(anyhow!("Unexpected EOF from serial port")),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(anyhow!("Serial read error: {}", e)),
                }
            }
        })
        .await
        .context("Serial read task panicked")?
    }
}
