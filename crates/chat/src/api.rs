//! Chat backend client. Every call degrades instead of failing: announce and
//! send report a boolean, polling yields an empty response.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use storefront_core::HttpSender;

use crate::messages::ChatResponse;

pub const CHAT_OPENED_PATH: &str = "/api/chat-opened";
pub const VISITOR_MESSAGE_PATH: &str = "/api/visitor-message";

pub fn response_path(visitor_id: &str) -> String {
    format!("/api/chat-response/{visitor_id}")
}

#[derive(Clone)]
pub struct ChatApi {
    sender: Arc<dyn HttpSender>,
}

impl ChatApi {
    pub fn new(sender: Arc<dyn HttpSender>) -> Self {
        Self { sender }
    }

    pub async fn announce_open(
        &self,
        visitor_id: &str,
        page_url: &str,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let body = json!({
            "visitor_id": visitor_id,
            "page_url": page_url,
            "timestamp": timestamp,
        });
        match self.sender.post_json(CHAT_OPENED_PATH, &body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(visitor_id, error = %e, "chat open announcement failed");
                false
            }
        }
    }

    pub async fn send_message(&self, visitor_id: &str, message: &str) -> bool {
        let body = json!({
            "visitor_id": visitor_id,
            "message": message,
        });
        match self.sender.post_json(VISITOR_MESSAGE_PATH, &body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(visitor_id, error = %e, "visitor message not delivered");
                false
            }
        }
    }

    /// Fetch the pending assistant reply, if any.
    pub async fn poll(&self, visitor_id: &str) -> ChatResponse {
        let body = match self.sender.get_json(&response_path(visitor_id)).await {
            Ok(body) => body,
            Err(e) => {
                debug!(visitor_id, error = %e, "chat poll failed");
                return ChatResponse::default();
            }
        };
        serde_json::from_value(body).unwrap_or_else(|e| {
            debug!(visitor_id, error = %e, "malformed chat response ignored");
            ChatResponse::default()
        })
    }
}
