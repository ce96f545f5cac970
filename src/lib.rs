//! Core library for the lablink application.
//!
//! This library talks to laboratory instruments over a serial link: it frames
//! outgoing commands, decodes framed responses, runs a synchronous
//! command/response cycle with a busy-poll ready-wait (syringe-pump style
//! devices), and runs a continuous telemetry acquisition loop concurrently
//! with an interactive control channel (detector style devices). Every wire
//! exchange is recorded in an append-only exchange log.

pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod sequence;
pub mod sink;
pub mod transport;
