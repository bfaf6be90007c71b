//! Scroll depth observer. Measures once per debounced burst and reports only
//! the exact milestones.

use storefront_core::events::{ScrollDirection, ScrollPayload};

use super::PageAccumulator;

pub const MILESTONES: [u8; 4] = [25, 50, 75, 100];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollGeometry {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub viewport_height: f64,
}

/// Percentage of the scrollable distance covered, clamped to `0..=100`.
/// A page that does not scroll reports 0.
pub fn scroll_percent(geometry: ScrollGeometry) -> u8 {
    let scrollable = geometry.scroll_height - geometry.viewport_height;
    if scrollable <= 0.0 {
        return 0;
    }
    let pct = (geometry.scroll_top / scrollable * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Update the running maximum and return a milestone record when the
/// measured depth lands exactly on one.
pub fn observe_scroll(
    acc: &mut PageAccumulator,
    geometry: ScrollGeometry,
) -> Option<ScrollPayload> {
    let pct = scroll_percent(geometry);
    let direction = if pct > acc.scroll_depth_max {
        ScrollDirection::Down
    } else {
        ScrollDirection::Up
    };
    acc.scroll_depth_max = acc.scroll_depth_max.max(pct);

    MILESTONES.contains(&pct).then_some(ScrollPayload {
        scroll_depth: pct,
        scroll_direction: direction,
    })
}
