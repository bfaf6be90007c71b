//! Shared foundation for the storefront telemetry pipeline: configuration,
//! error taxonomy, the tracking event model, the event sink bus and the
//! capability seams (storage, clock, HTTP) injected into every service.

pub mod clock;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod http;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TelemetryConfig;
pub use error::{TelemetryError, TelemetryResult};
pub use event_bus::EventSink;
pub use events::{EventContext, EventKind, TrackingEvent};
pub use http::{CaptureSender, HttpSender, ReqwestSender};
pub use store::{read_json, write_json, FileStore, KeyValueStore, MemoryStore};
