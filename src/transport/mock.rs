//! Mock transport for testing.
//!
//! Replays a scripted queue of response frames and records every write for
//! verification. Supports failure injection on open and a configurable
//! per-read latency so concurrency behavior can be exercised.

use crate::transport::Transport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sleep used when the script is exhausted, standing in for an idle line
/// hitting its read timeout.
const IDLE_READ_DELAY: Duration = Duration::from_millis(5);

#[derive(Clone, Default)]
pub struct MockTransport {
    open: Arc<AtomicBool>,
    fail_next_open: Arc<AtomicBool>,
    read_latency_ms: Arc<AtomicU64>,
    reads: Arc<Mutex<VecDeque<Vec<u8>>>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixed delay before every read completes.
    pub fn with_read_latency(self, ms: u64) -> Self {
        self.read_latency_ms.store(ms, Ordering::SeqCst);
        self
    }

    /// Make the next `open` call fail.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Queue one response frame for a future read.
    pub fn queue_frame(&self, frame: &[u8]) {
        self.reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame.to_vec());
    }

    /// Number of scripted frames not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.reads.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every write issued so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Writes decoded as UTF-8 for convenient assertions.
    pub fn written_strings(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<()> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("Injected open failure"));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(anyhow!("Mock transport not open"));
        }
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(bytes.to_vec());
        Ok(())
    }

    async fn read_until(&self, _delimiter: &[u8]) -> Result<Vec<u8>> {
        let latency = self.read_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let next = self
            .reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(frame) => Ok(frame),
            None => {
                // Idle line: behave like a timeout with nothing read.
                tokio::time::sleep(IDLE_READ_DELAY).await;
                Ok(Vec::new())
            }
        }
    }
}
