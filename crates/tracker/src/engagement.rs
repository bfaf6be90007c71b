//! Engagement scorer: a bounded 0–100 heuristic over one page view.
//!
//! | component | rule                              | max |
//! |-----------|-----------------------------------|-----|
//! | scroll    | `min(depth, 100) * 0.3`           | 30  |
//! | clicks    | `min(clicks * 5, 30)`             | 30  |
//! | time      | `min(ms / 60000 * 20, 20)`        | 20  |
//! | hovers    | `min(hovers * 2, 10)`             | 10  |
//! | activity  | `10` if idle below the threshold  | 10  |

use chrono::{DateTime, Utc};
use serde::Serialize;

use storefront_core::clock::elapsed_ms;
use storefront_core::events::{EngagementMetrics, EventContext};

use crate::observers::PageAccumulator;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngagementInputs {
    pub scroll_depth_max: u8,
    pub clicks_count: u32,
    pub hovers_count: u32,
    pub time_on_page_ms: u64,
    pub idle_time_ms: u64,
}

pub fn engagement_score(inputs: &EngagementInputs, idle_threshold_ms: u64) -> u8 {
    let scroll = f64::from(inputs.scroll_depth_max.min(100)) * 0.3;
    let clicks = (f64::from(inputs.clicks_count) * 5.0).min(30.0);
    let time = (inputs.time_on_page_ms as f64 / 60_000.0 * 20.0).min(20.0);
    let hovers = (f64::from(inputs.hovers_count) * 2.0).min(10.0);
    let activity = if inputs.idle_time_ms < idle_threshold_ms {
        10.0
    } else {
        0.0
    };
    (scroll + clicks + time + hovers + activity)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Point-in-time view of the current page's engagement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementSnapshot {
    pub time_on_page: u64,
    pub scroll_depth_max: u8,
    pub clicks_count: u32,
    pub hovers_count: u32,
    pub mouse_distance: u64,
    pub idle_time: u64,
    pub engagement_score: u8,
}

impl EngagementSnapshot {
    pub fn capture(acc: &PageAccumulator, now: DateTime<Utc>, idle_threshold_ms: u64) -> Self {
        let inputs = EngagementInputs {
            scroll_depth_max: acc.scroll_depth_max,
            clicks_count: acc.clicks_count,
            hovers_count: acc.hovers_count,
            time_on_page_ms: elapsed_ms(acc.page_started_at, now),
            idle_time_ms: elapsed_ms(acc.last_activity_at, now),
        };
        Self {
            time_on_page: inputs.time_on_page_ms,
            scroll_depth_max: inputs.scroll_depth_max,
            clicks_count: inputs.clicks_count,
            hovers_count: inputs.hovers_count,
            mouse_distance: acc.mouse_distance.round() as u64,
            idle_time: inputs.idle_time_ms,
            engagement_score: engagement_score(&inputs, idle_threshold_ms),
        }
    }

    pub fn into_metrics(self, context: EventContext) -> EngagementMetrics {
        EngagementMetrics {
            context,
            time_on_page: self.time_on_page,
            scroll_depth_max: self.scroll_depth_max,
            clicks_count: self.clicks_count,
            hovers_count: self.hovers_count,
            mouse_distance: self.mouse_distance,
            idle_time: self.idle_time,
            engagement_score: self.engagement_score,
        }
    }
}
