//! Raw browser signals, as translated by the host page adapter.
//!
//! The adapter owns DOM traversal: it resolves event targets into
//! [`ElementInfo`] (including the nearest product-tagged ancestor) and
//! forwards one [`BrowserSignal`] per observed browser event.

use serde::{Deserialize, Serialize};

use storefront_core::events::{FormAction, ProductInfo};

/// Tags whose hovers are always tracked.
const TRACKABLE_TAGS: &[&str] = &["a", "button", "img", "input", "select", "textarea"];

/// Tags whose focus/blur/change/submit are reported.
const FORM_TAGS: &[&str] = &["input", "select", "textarea", "form"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserSignal {
    Scroll {
        scroll_top: f64,
        scroll_height: f64,
        viewport_height: f64,
    },
    Click {
        target: ElementInfo,
        x: f64,
        y: f64,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerEnter {
        target: ElementInfo,
    },
    PointerLeave {
        target: ElementInfo,
    },
    Form {
        action: FormAction,
        target: ElementInfo,
    },
    VisibilityHidden,
    /// In-app navigation through the history API.
    Navigate {
        url: String,
        #[serde(default)]
        title: String,
    },
    /// Back/forward navigation.
    PopState {
        url: String,
        #[serde(default)]
        title: String,
    },
    Error {
        message: String,
        #[serde(default)]
        stack: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
    UnhandledRejection {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        stack: Option<String>,
    },
    Unload,
}

/// Description of a DOM element involved in a signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Host-assigned identity, stable for the element's lifetime.
    pub node_id: u64,
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    /// `name` attribute of a form field.
    #[serde(default)]
    pub name: Option<String>,
    /// `type` attribute of a form field.
    #[serde(default)]
    pub input_type: Option<String>,
    /// Id of the enclosing form, if any.
    #[serde(default)]
    pub form_id: Option<String>,
    /// Element carries `data-track`.
    #[serde(default)]
    pub trackable: bool,
    /// Attributes of the element itself or its nearest product-tagged ancestor.
    #[serde(default)]
    pub product: Option<ProductAttributes>,
}

/// Raw `data-product-*` attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductAttributes {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

impl ElementInfo {
    pub fn new(node_id: u64, tag: impl Into<String>) -> Self {
        Self {
            node_id,
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn tag_name(&self) -> String {
        self.tag.to_ascii_lowercase()
    }

    pub fn is_hover_trackable(&self) -> bool {
        TRACKABLE_TAGS.contains(&self.tag_name().as_str())
            || self.trackable
            || self.product.is_some()
    }

    pub fn is_form_element(&self) -> bool {
        FORM_TAGS.contains(&self.tag_name().as_str())
    }

    /// Leading `max` characters of the text content; `None` when empty.
    pub fn text_preview(&self, max: usize) -> Option<String> {
        non_empty(self.text.as_deref()).map(|t| storefront_core::events::truncate_chars(t, max))
    }
}

impl ProductAttributes {
    pub fn to_product(&self) -> ProductInfo {
        ProductInfo::new(
            self.id.clone(),
            self.name.clone().unwrap_or_default(),
            self.price.as_deref().map(parse_price).unwrap_or(0.0),
        )
    }
}

/// Lenient price parse: the longest numeric prefix, `0` when there is none
/// (`"129.90€"` → 129.9).
pub fn parse_price(raw: &str) -> f64 {
    let raw = raw.trim();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in raw.char_indices() {
        let ok = c.is_ascii_digit()
            || (c == '-' && i == 0)
            || (c == '+' && i == 0)
            || (c == '.' && !seen_dot);
        if !ok {
            break;
        }
        seen_dot |= c == '.';
        end = i + c.len_utf8();
    }
    raw[..end].parse().unwrap_or(0.0)
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
