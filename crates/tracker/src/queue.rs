//! Event buffer: ordered in-memory queue drained by the flush timer, the
//! size threshold, or page teardown.

use tracing::{debug, warn};

use storefront_core::events::TrackingEvent;

pub struct EventQueue {
    buffer: Vec<TrackingEvent>,
    flush_threshold: usize,
    max_buffered: usize,
}

impl EventQueue {
    pub fn new(flush_threshold: usize, max_buffered: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(flush_threshold),
            flush_threshold,
            max_buffered: max_buffered.max(flush_threshold),
        }
    }

    /// Append an event. Returns `true` once the buffer has reached the flush
    /// threshold.
    pub fn push(&mut self, event: TrackingEvent) -> bool {
        self.buffer.push(event);
        metrics::counter!("telemetry.events.queued").increment(1);
        self.enforce_cap();
        self.buffer.len() >= self.flush_threshold
    }

    /// Drain the whole buffer for delivery.
    pub fn take(&mut self) -> Vec<TrackingEvent> {
        std::mem::take(&mut self.buffer)
    }

    /// Put a failed batch back in front of anything queued since it was
    /// taken.
    pub fn requeue(&mut self, mut batch: Vec<TrackingEvent>) {
        debug!(count = batch.len(), "requeueing undelivered batch");
        batch.append(&mut self.buffer);
        self.buffer = batch;
        self.enforce_cap();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn events(&self) -> &[TrackingEvent] {
        &self.buffer
    }

    fn enforce_cap(&mut self) {
        if self.buffer.len() <= self.max_buffered {
            return;
        }
        let excess = self.buffer.len() - self.max_buffered;
        self.buffer.drain(..excess);
        metrics::counter!("telemetry.events.dropped").increment(excess as u64);
        warn!(
            dropped = excess,
            max = self.max_buffered,
            "event buffer full, oldest events dropped"
        );
    }
}
