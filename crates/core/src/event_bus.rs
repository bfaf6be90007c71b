//! Event sink bus: trait for emitting tracking records from any module.
//!
//! Services that observe user activity outside the tracker itself (the chat
//! session, commerce flows) accept an `Arc<dyn EventSink>` and emit through
//! it. The behavioral tracker is the production implementation.

use crate::events::{ConversionRecord, EventKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Trait for emitting tracking records. The implementation decides context
/// (identity, page URL, timestamp) and delivery mode.
pub trait EventSink: Send + Sync {
    fn emit(&self, kind: EventKind);

    /// Report a conversion-style milestone to the conversion endpoint.
    fn emit_conversion(&self, _record: ConversionRecord) {}
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _kind: EventKind) {}
}

/// In-memory sink that captures records for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EventKind>>,
    conversions: Mutex<Vec<ConversionRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventKind> {
        self.events.lock().clone()
    }

    pub fn conversions(&self) -> Vec<ConversionRecord> {
        self.conversions.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Count captured records with the given wire name (`"chat_opened"`).
    pub fn count_type(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn count_conversions(&self, event_type: &str) -> usize {
        self.conversions
            .lock()
            .iter()
            .filter(|c| c.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.conversions.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, kind: EventKind) {
        self.events.lock().push(kind);
    }

    fn emit_conversion(&self, record: ConversionRecord) {
        self.conversions.lock().push(record);
    }
}

/// Convenience: create a no-op sink for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
