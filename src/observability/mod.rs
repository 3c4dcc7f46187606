//! Console logging for the `accessgate` binary.
//!
//! Library users install their own subscriber; the engine only emits
//! `tracing` events.

mod tracing_init;

pub use tracing_init::*;
