//! Pointer observers: clicks, sustained hovers and mouse travel distance.

use chrono::{DateTime, Utc};

use storefront_core::clock::elapsed_ms;
use storefront_core::events::{ClickPayload, EventKind, HoverPayload, ProductPayload};

use super::PageAccumulator;
use crate::signals::{non_empty, ElementInfo};

const TEXT_PREVIEW_CHARS: usize = 50;

/// Count the click and describe it; a click inside a product-tagged element
/// additionally yields a `product_click`.
pub fn observe_click(
    acc: &mut PageAccumulator,
    target: &ElementInfo,
    x: f64,
    y: f64,
    now: DateTime<Utc>,
) -> Vec<EventKind> {
    acc.clicks_count += 1;
    acc.touch(now);

    let mut events = vec![EventKind::Click(ClickPayload {
        element_type: target.tag_name(),
        element_id: non_empty(target.id.as_deref()).map(str::to_string),
        element_class: non_empty(target.class.as_deref()).map(str::to_string),
        element_text: target.text_preview(TEXT_PREVIEW_CHARS),
        element_href: non_empty(target.href.as_deref()).map(str::to_string),
        click_x: x,
        click_y: y,
    })];
    if let Some(product) = product_event(target, EventKind::ProductClick) {
        events.push(product);
    }
    events
}

pub fn observe_hover_start(acc: &mut PageAccumulator, target: &ElementInfo, now: DateTime<Utc>) {
    if target.is_hover_trackable() {
        acc.hover_starts.insert(target.node_id, now);
    }
}

/// Close a hover pair. Pairs shorter than `min_duration_ms` are dropped
/// without counting.
pub fn observe_hover_end(
    acc: &mut PageAccumulator,
    target: &ElementInfo,
    now: DateTime<Utc>,
    min_duration_ms: u64,
) -> Vec<EventKind> {
    let Some(started) = acc.hover_starts.remove(&target.node_id) else {
        return Vec::new();
    };
    let duration = elapsed_ms(started, now);
    if duration < min_duration_ms {
        return Vec::new();
    }

    acc.hovers_count += 1;
    let mut events = vec![EventKind::Hover(HoverPayload {
        element_type: target.tag_name(),
        element_id: non_empty(target.id.as_deref()).map(str::to_string),
        element_text: target.text_preview(TEXT_PREVIEW_CHARS),
        hover_duration: duration,
    })];
    if let Some(product) = product_event(target, EventKind::ProductHover) {
        events.push(product);
    }
    events
}

/// Add the straight-line distance from the previous sample. The first
/// sample on a page only sets the origin.
pub fn observe_pointer_move(acc: &mut PageAccumulator, x: f64, y: f64) {
    if let Some((last_x, last_y)) = acc.last_pointer {
        acc.mouse_distance += (x - last_x).hypot(y - last_y);
    }
    acc.last_pointer = Some((x, y));
}

fn product_event(target: &ElementInfo, wrap: fn(ProductPayload) -> EventKind) -> Option<EventKind> {
    target.product.as_ref().map(|attrs| {
        wrap(ProductPayload {
            product: attrs.to_product(),
            view_duration: None,
        })
    })
}
