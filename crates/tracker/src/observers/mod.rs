//! Interaction observers: translate browser signals into tracking records
//! while updating the per-page accumulator the engagement scorer reads.
//!
//! Observers are plain functions over [`PageAccumulator`]; timing policy
//! (debounce, throttle) is applied by the caller.

pub mod form;
pub mod pointer;
pub mod scroll;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Mutable per-page state. Reset on every page transition.
#[derive(Debug, Clone)]
pub struct PageAccumulator {
    pub page_url: String,
    pub page_title: String,
    pub page_started_at: DateTime<Utc>,
    pub scroll_depth_max: u8,
    pub clicks_count: u32,
    pub hovers_count: u32,
    pub mouse_distance: f64,
    pub last_pointer: Option<(f64, f64)>,
    pub last_activity_at: DateTime<Utc>,
    /// Hover start time keyed by element node id.
    pub hover_starts: HashMap<u64, DateTime<Utc>>,
}

impl PageAccumulator {
    pub fn new(
        page_url: impl Into<String>,
        page_title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            page_url: page_url.into(),
            page_title: page_title.into(),
            page_started_at: now,
            scroll_depth_max: 0,
            clicks_count: 0,
            hovers_count: 0,
            mouse_distance: 0.0,
            last_pointer: None,
            last_activity_at: now,
            hover_starts: HashMap::new(),
        }
    }

    /// Start accounting for a new page.
    pub fn reset(
        &mut self,
        page_url: impl Into<String>,
        page_title: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        *self = Self::new(page_url, page_title, now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_counters() {
        let t0 = Utc::now();
        let mut acc = PageAccumulator::new("https://shop.example/", "Accueil", t0);
        acc.scroll_depth_max = 80;
        acc.clicks_count = 4;
        acc.hovers_count = 2;
        acc.mouse_distance = 1_000.0;
        acc.hover_starts.insert(9, t0);

        let t1 = t0 + chrono::Duration::seconds(30);
        acc.reset("https://shop.example/canapes", "Canapés", t1);
        assert_eq!(acc.page_url, "https://shop.example/canapes");
        assert_eq!(acc.scroll_depth_max, 0);
        assert_eq!(acc.clicks_count, 0);
        assert_eq!(acc.hovers_count, 0);
        assert_eq!(acc.mouse_distance, 0.0);
        assert!(acc.hover_starts.is_empty());
        assert_eq!(acc.page_started_at, t1);
    }
}
