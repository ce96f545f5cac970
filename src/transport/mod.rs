//! Transport implementations.
//!
//! A transport is a byte-oriented, timeout-bounded half-duplex channel.
//! `SerialTransport` talks to real hardware through the `serialport` crate;
//! `MockTransport` replays scripted responses for tests and dry runs.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

use anyhow::Result;
use async_trait::async_trait;

/// Byte-oriented channel to one instrument.
///
/// All methods take `&self` so one handle can be shared between a reading
/// task and a writing task; implementations keep the two directions behind
/// separate locks so a blocked read never stalls a write.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying channel.
    async fn open(&self) -> Result<()>;

    /// Close the underlying channel.
    async fn close(&self) -> Result<()>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Write raw bytes.
    async fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Read until `delimiter` or until the read timeout expires.
    ///
    /// On timeout this returns whatever was read so far, possibly empty --
    /// an empty result is how callers observe an idle line.
    async fn read_until(&self, delimiter: &[u8]) -> Result<Vec<u8>>;
}
