//! Chat message model and the assistant backend's response envelope.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use storefront_core::events::{ConversionProduct, ProductInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_offer: Option<PaymentOffer>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            content: content.into(),
            sender: Sender::User,
            timestamp,
            payment_offer: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        payment_offer: Option<PaymentOffer>,
    ) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            content: content.into(),
            sender: Sender::Assistant,
            timestamp,
            payment_offer,
        }
    }

    /// Assistant-authored stand-in for a reply that could not be requested.
    pub fn delivery_error(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("msg_error_{}", Uuid::new_v4().simple()),
            ..Self::assistant(content, timestamp, None)
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.sender == Sender::Assistant
    }
}

/// Product + payment link embedded in an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOffer {
    pub product: OfferProduct,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(rename = "cart_data", default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<Vec<CartLine>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferProduct {
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "lenient_price")]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "lenient_price")]
    pub price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PaymentOffer {
    /// Identity used to report an offer once: product id, else its name.
    pub fn key(&self) -> &str {
        self.product.id.as_deref().unwrap_or(&self.product.name)
    }

    pub fn tracked_product(&self) -> ProductInfo {
        ProductInfo::new(
            self.product.id.clone().unwrap_or_default(),
            self.product.name.clone(),
            self.product.price,
        )
    }

    pub fn conversion_product(&self) -> ConversionProduct {
        ConversionProduct {
            id: self.product.id.clone(),
            name: self.product.name.clone(),
            price: self.product.price,
        }
    }
}

/// Backends send ids and prices either as JSON strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Text(String),
    Number(serde_json::Number),
}

impl Loose {
    fn into_string(self) -> String {
        match self {
            Loose::Text(s) => s,
            Loose::Number(n) => n.to_string(),
        }
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Loose>::deserialize(deserializer)?.map(Loose::into_string))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Loose::deserialize(deserializer).map(Loose::into_string)
}

fn lenient_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Loose::deserialize(deserializer)? {
        Loose::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("price out of range")),
        Loose::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

/// Body of `GET /api/chat-response/{visitor_id}`. The offer is kept raw so a
/// malformed one never costs the reply text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<Value>,
}

impl ChatResponse {
    /// Reply text, when the response carries one.
    pub fn reply(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.message.as_deref().filter(|m| !m.is_empty())
    }

    /// The embedded payment offer. An unusable offer is logged and dropped.
    pub fn offer(&self) -> Option<PaymentOffer> {
        let raw = self.payment_data.clone()?;
        serde_json::from_value(raw)
            .map_err(|e| debug!(error = %e, "unusable payment offer ignored"))
            .ok()
    }
}
