//! Wire protocol: framing/decoding and the two engine variants.
//!
//! `codec` builds and parses frames; `pump` runs the synchronous
//! command/response cycle with its busy-poll ready-wait; `sensor` runs the
//! continuous acquisition loop alongside an interactive control channel.

pub mod codec;
pub mod pump;
pub mod sensor;

pub use codec::{Codec, Decoded};
pub use pump::{EngineState, PumpEngine};
pub use sensor::AcquisitionEngine;
