//! Common utilities for Heron: event sink, telemetry, metrics, error helpers

#![deny(missing_docs)]

pub mod error;
pub mod events;
pub mod metrics;
pub mod telemetry;

pub use events::{Event, EventLevel, EventSink, EventSubject};

/// Daemon name used for errors attributed to the Kea Control Agent itself
pub const KEA_CONTROL_AGENT_DAEMON: &str = "ca";
