//! Behavioral tracking for the storefront: visitor identity and sessions,
//! interaction observers, engagement scoring and buffered delivery to the
//! analytics collector.
//!
//! # Modules
//!
//! - [`identity`]: Durable visitor id, fixed-window session, profile and page history
//! - [`device`]: Device, browser and campaign attribution snapshot
//! - [`signals`]: Browser signals forwarded by the host page adapter
//! - [`observers`]: Scroll, pointer and form observers over the per-page accumulator
//! - [`engagement`]: Bounded 0–100 engagement score
//! - [`queue`]: Ordered event buffer with threshold and cap
//! - [`delivery`]: Collector endpoints
//! - [`timing`]: Debounce and throttle primitives
//! - [`tracker`]: The `BehavioralTracker` service tying it together

pub mod delivery;
pub mod device;
pub mod engagement;
pub mod identity;
pub mod observers;
pub mod queue;
pub mod signals;
pub mod timing;
pub mod tracker;

pub use device::{DeviceSnapshot, NavigationContext, UtmParams};
pub use engagement::{engagement_score, EngagementSnapshot};
pub use identity::{IdentityStore, VisitorProfile};
pub use signals::{BrowserSignal, ElementInfo, ProductAttributes};
pub use tracker::{BehavioralTracker, ErrorClass, FlushOutcome, TrackerDeps};
