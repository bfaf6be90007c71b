//! Tracking event model: the closed set of records the storefront ships to
//! the analytics collector, plus the batch and conversion envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and page context carried by every tracking record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub visitor_id: String,
    pub session_id: String,
    pub page_url: String,
    pub timestamp: DateTime<Utc>,
}

/// A record queued for the collector. Interaction events are tagged with
/// `event_type`; the periodic engagement record is told apart structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackingEvent {
    Interaction(InteractionEvent),
    Engagement(EngagementMetrics),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(flatten)]
    pub context: EventContext,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Per-page engagement record, produced on a timer and on page exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    #[serde(flatten)]
    pub context: EventContext,
    pub time_on_page: u64,
    pub scroll_depth_max: u8,
    pub clicks_count: u32,
    pub hovers_count: u32,
    pub mouse_distance: u64,
    pub idle_time: u64,
    pub engagement_score: u8,
}

/// How a record reaches the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent on its own request right away, and also buffered.
    Priority,
    /// Buffered until the next batch flush.
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    PageView(PageViewPayload),
    Scroll(ScrollPayload),
    Click(ClickPayload),
    FormInteraction(FormPayload),
    Hover(HoverPayload),

    ChatOpened(ChatPayload),
    ChatClosed(ChatPayload),
    ChatMinimized(ChatPayload),
    UserMessageSent(ChatPayload),
    AiMessageReceived(ChatPayload),
    TypingStarted(ChatPayload),
    TypingStopped(ChatPayload),

    ProductViewed(ProductPayload),
    ProductHover(ProductPayload),
    ProductClick(ProductPayload),
    AddToCart(ProductPayload),
    RemoveFromCart(ProductPayload),
    WishlistAdd(ProductPayload),

    PaymentCardShown(PaymentPayload),
    PaymentLinkClicked(PaymentPayload),
    CheckoutStarted(PaymentPayload),
    CheckoutCompleted(PaymentPayload),
    CheckoutAbandoned(PaymentPayload),

    JsError(ErrorPayload),
    ApiError(ErrorPayload),
    NetworkError(ErrorPayload),
}

impl EventKind {
    /// Wire name of the variant (the `event_type` tag).
    pub fn name(&self) -> &'static str {
        match self {
            Self::PageView(_) => "page_view",
            Self::Scroll(_) => "scroll",
            Self::Click(_) => "click",
            Self::FormInteraction(_) => "form_interaction",
            Self::Hover(_) => "hover",
            Self::ChatOpened(_) => "chat_opened",
            Self::ChatClosed(_) => "chat_closed",
            Self::ChatMinimized(_) => "chat_minimized",
            Self::UserMessageSent(_) => "user_message_sent",
            Self::AiMessageReceived(_) => "ai_message_received",
            Self::TypingStarted(_) => "typing_started",
            Self::TypingStopped(_) => "typing_stopped",
            Self::ProductViewed(_) => "product_viewed",
            Self::ProductHover(_) => "product_hover",
            Self::ProductClick(_) => "product_click",
            Self::AddToCart(_) => "add_to_cart",
            Self::RemoveFromCart(_) => "remove_from_cart",
            Self::WishlistAdd(_) => "wishlist_add",
            Self::PaymentCardShown(_) => "payment_card_shown",
            Self::PaymentLinkClicked(_) => "payment_link_clicked",
            Self::CheckoutStarted(_) => "checkout_started",
            Self::CheckoutCompleted(_) => "checkout_completed",
            Self::CheckoutAbandoned(_) => "checkout_abandoned",
            Self::JsError(_) => "js_error",
            Self::ApiError(_) => "api_error",
            Self::NetworkError(_) => "network_error",
        }
    }

    /// Chat lifecycle, conversion-relevant commerce, payment and error
    /// records go out immediately; everything else waits for a batch.
    pub fn delivery(&self) -> Delivery {
        match self {
            Self::ChatOpened(_)
            | Self::ChatClosed(_)
            | Self::UserMessageSent(_)
            | Self::AddToCart(_)
            | Self::WishlistAdd(_)
            | Self::PaymentCardShown(_)
            | Self::PaymentLinkClicked(_)
            | Self::CheckoutStarted(_)
            | Self::CheckoutCompleted(_)
            | Self::CheckoutAbandoned(_)
            | Self::JsError(_)
            | Self::ApiError(_)
            | Self::NetworkError(_) => Delivery::Priority,
            // The view start is a funnel entry; the view-ended record is not.
            Self::ProductViewed(p) if p.view_duration.is_none() => Delivery::Priority,
            _ => Delivery::Buffered,
        }
    }
}

/// Page view payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewPayload {
    pub page_title: String,
    pub referrer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_page: Option<String>,
    pub page_load_time: u64,
    pub scroll_depth_max: u8,
}

/// Scroll depth milestone payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollPayload {
    pub scroll_depth: u8,
    pub scroll_direction: ScrollDirection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Down,
    Up,
}

/// Click payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickPayload {
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_href: Option<String>,
    pub click_x: f64,
    pub click_y: f64,
}

/// Form field interaction payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    pub action: FormAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormAction {
    Focus,
    Blur,
    Change,
    Submit,
}

/// Sustained hover payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoverPayload {
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
    pub hover_duration: u64,
}

/// Chat lifecycle payload; every field is optional and milestone-specific.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_count: Option<usize>,
}

/// Catalog product as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl ProductInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            category: None,
            collection: None,
            variant: None,
            quantity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPayload {
    pub product: ProductInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_duration: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_source: Option<String>,
}

/// Body of `POST /api/analytics/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub visitor_id: String,
    pub session_id: String,
    pub events: Vec<TrackingEvent>,
    pub timestamp: DateTime<Utc>,
}

/// Product summary attached to conversion records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionProduct {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub price: f64,
}

/// Body of `POST /api/analytics/conversion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub visitor_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ConversionProduct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversionRecord {
    pub fn new(
        visitor_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            visitor_id: visitor_id.into(),
            event_type: event_type.into(),
            page_url: None,
            duration: None,
            message_preview: None,
            product: None,
            payment_url: None,
            timestamp,
        }
    }
}

/// First `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> EventContext {
        EventContext {
            visitor_id: "v_1".into(),
            session_id: "s_1".into(),
            page_url: "https://shop.example/canapes".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_interaction_event_is_tagged_and_flat() {
        let event = TrackingEvent::Interaction(InteractionEvent {
            context: ctx(),
            kind: EventKind::Scroll(ScrollPayload {
                scroll_depth: 50,
                scroll_direction: ScrollDirection::Down,
            }),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "scroll");
        assert_eq!(json["visitor_id"], "v_1");
        assert_eq!(json["scroll_depth"], 50);
        assert_eq!(json["scroll_direction"], "down");
        assert_eq!(json["timestamp"], "2026-03-01T12:00:00Z");
    }

    #[test]
    fn test_engagement_record_has_no_tag() {
        let event = TrackingEvent::Engagement(EngagementMetrics {
            context: ctx(),
            time_on_page: 12_000,
            scroll_depth_max: 40,
            clicks_count: 2,
            hovers_count: 1,
            mouse_distance: 830,
            idle_time: 500,
            engagement_score: 36,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("event_type").is_none());
        assert_eq!(json["engagement_score"], 36);

        let parsed: TrackingEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(parsed, TrackingEvent::Engagement(_)));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let kind = EventKind::ChatOpened(ChatPayload::default());
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json, serde_json::json!({ "event_type": "chat_opened" }));
    }

    #[test]
    fn test_delivery_classes() {
        let product = ProductInfo::new("42", "Canapé Oslo", 1290.0);
        assert_eq!(
            EventKind::ChatOpened(ChatPayload::default()).delivery(),
            Delivery::Priority
        );
        assert_eq!(
            EventKind::TypingStarted(ChatPayload::default()).delivery(),
            Delivery::Buffered
        );
        assert_eq!(
            EventKind::ProductViewed(ProductPayload {
                product: product.clone(),
                view_duration: None
            })
            .delivery(),
            Delivery::Priority
        );
        assert_eq!(
            EventKind::ProductViewed(ProductPayload {
                product: product.clone(),
                view_duration: Some(4_000)
            })
            .delivery(),
            Delivery::Buffered
        );
        assert_eq!(
            EventKind::RemoveFromCart(ProductPayload {
                product,
                view_duration: None
            })
            .delivery(),
            Delivery::Buffered
        );
        assert_eq!(
            EventKind::JsError(ErrorPayload {
                error_message: "boom".into(),
                error_stack: None,
                error_source: None,
            })
            .delivery(),
            Delivery::Priority
        );
    }

    #[test]
    fn test_name_matches_wire_tag() {
        let kind = EventKind::AiMessageReceived(ChatPayload::default());
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["event_type"], kind.name());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("Fauteuil ébène", 10), "Fauteuil é");
        assert_eq!(truncate_chars("abc", 50), "abc");
    }
}
