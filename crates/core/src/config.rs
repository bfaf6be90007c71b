use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Root telemetry configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `STOREFRONT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Remote analytics collector endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Buffering, sampling and identity policy for the behavioral tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    #[serde(default = "default_engagement_interval_ms")]
    pub engagement_interval_ms: u64,
    #[serde(default = "default_scroll_debounce_ms")]
    pub scroll_debounce_ms: u64,
    #[serde(default = "default_mouse_throttle_ms")]
    pub mouse_throttle_ms: u64,
    #[serde(default = "default_hover_min_duration_ms")]
    pub hover_min_duration_ms: u64,
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_page_history_limit")]
    pub page_history_limit: usize,
}

/// Conversational backend used by the chat widget.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_auto_open_delay_ms")]
    pub auto_open_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_send_failure_message")]
    pub send_failure_message: String,
}

// Default functions
fn default_collector_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_chat_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_flush_threshold() -> usize {
    20
}
fn default_max_buffered_events() -> usize {
    1_000
}
fn default_engagement_interval_ms() -> u64 {
    5_000
}
fn default_scroll_debounce_ms() -> u64 {
    150
}
fn default_mouse_throttle_ms() -> u64 {
    100
}
fn default_hover_min_duration_ms() -> u64 {
    500
}
fn default_idle_threshold_ms() -> u64 {
    30_000
}
fn default_session_timeout_ms() -> u64 {
    30 * 60 * 1_000
}
fn default_page_history_limit() -> usize {
    50
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_auto_open_delay_ms() -> u64 {
    3_000
}
fn default_send_failure_message() -> String {
    "Désolé, je rencontre un problème technique. Veuillez réessayer.".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            collector: CollectorConfig::default(),
            tracker: TrackerConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_collector_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            flush_threshold: default_flush_threshold(),
            max_buffered_events: default_max_buffered_events(),
            engagement_interval_ms: default_engagement_interval_ms(),
            scroll_debounce_ms: default_scroll_debounce_ms(),
            mouse_throttle_ms: default_mouse_throttle_ms(),
            hover_min_duration_ms: default_hover_min_duration_ms(),
            idle_threshold_ms: default_idle_threshold_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            page_history_limit: default_page_history_limit(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_url(),
            poll_interval_ms: default_poll_interval_ms(),
            auto_open_delay_ms: default_auto_open_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            send_failure_message: default_send_failure_message(),
        }
    }
}

impl TrackerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn engagement_interval(&self) -> Duration {
        Duration::from_millis(self.engagement_interval_ms)
    }

    pub fn scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.scroll_debounce_ms)
    }
}

impl ChatConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn auto_open_delay(&self) -> Duration {
        Duration::from_millis(self.auto_open_delay_ms)
    }
}

impl TelemetryConfig {
    /// Load configuration from an optional TOML file, overridden by
    /// environment variables (`STOREFRONT__TRACKER__FLUSH_THRESHOLD=50`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("STOREFRONT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
