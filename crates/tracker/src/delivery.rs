//! Collector client: the three analytics endpoints.

use std::sync::Arc;

use tracing::debug;

use storefront_core::error::TelemetryResult;
use storefront_core::events::{ConversionRecord, EventBatch, TrackingEvent};
use storefront_core::HttpSender;

pub const TRACK_PATH: &str = "/api/analytics/track";
pub const BATCH_PATH: &str = "/api/analytics/batch";
pub const CONVERSION_PATH: &str = "/api/analytics/conversion";

#[derive(Clone)]
pub struct CollectorClient {
    sender: Arc<dyn HttpSender>,
}

impl CollectorClient {
    pub fn new(sender: Arc<dyn HttpSender>) -> Self {
        Self { sender }
    }

    pub async fn send_event(&self, event: &TrackingEvent) -> TelemetryResult<()> {
        let body = serde_json::to_value(event)?;
        self.sender.post_json(TRACK_PATH, &body).await
    }

    pub async fn send_batch(&self, batch: &EventBatch) -> TelemetryResult<()> {
        let body = serde_json::to_value(batch)?;
        self.sender.post_json(BATCH_PATH, &body).await
    }

    /// Non-blocking best-effort batch send for page teardown.
    pub fn beacon_batch(&self, batch: &EventBatch) -> TelemetryResult<()> {
        let body = serde_json::to_value(batch)?;
        debug!(count = batch.events.len(), "beaconing batch");
        self.sender.beacon(BATCH_PATH, body);
        Ok(())
    }

    pub async fn send_conversion(&self, record: &ConversionRecord) -> TelemetryResult<()> {
        let body = serde_json::to_value(record)?;
        self.sender.post_json(CONVERSION_PATH, &body).await
    }
}
