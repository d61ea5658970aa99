//! Fire-and-forget UI event sink
//!
//! The local web UI (or any other live listener) receives named JSON events
//! as the hub's state changes. Delivery is best-effort to zero or more
//! listeners; the hub never waits on it.

use serde_json::Value;

/// Sink for UI events
pub trait EventSink: Send {
    /// Emit one named event
    fn emit(&mut self, event: &str, payload: Value);
}

/// Sink that drops everything (headless operation)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &str, _payload: Value) {}
}
