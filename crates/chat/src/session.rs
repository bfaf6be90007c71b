//! Chat session state machine.
//!
//! ```text
//! idle ──open (first in tab)──▶ announced ──announcement done──▶ awaiting_first_reply
//!                                                                      │ reply
//!                                                                      ▼
//!                                                                  conversing
//! ```
//!
//! Polling runs only while the chat is open; the poll task is aborted on
//! close or minimize. Lifecycle milestones are emitted through the
//! [`EventSink`] both as tracking records and as conversion records.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use storefront_core::clock::elapsed_ms;
use storefront_core::config::ChatConfig;
use storefront_core::events::{
    truncate_chars, ChatPayload, ConversionRecord, EventKind, PaymentPayload,
};
use storefront_core::{Clock, EventSink, HttpSender};
use storefront_tracker::identity::{keys, IdentityStore};
use storefront_tracker::timing::spawn_detached;

use crate::api::ChatApi;
use crate::messages::{ChatMessage, PaymentOffer};

const TRACKED_PREVIEW_CHARS: usize = 100;
const CONVERSION_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Idle,
    Announced,
    AwaitingFirstReply,
    Conversing,
}

/// Capabilities injected into the chat session.
#[derive(Clone)]
pub struct ChatDeps {
    pub sender: Arc<dyn HttpSender>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub identity: Arc<IdentityStore>,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChatConfig,
    visitor_id: String,
    api: ChatApi,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    identity: Arc<IdentityStore>,
    state: Mutex<SessionState>,
    poller: Mutex<Option<JoinHandle<()>>>,
    auto_open: Mutex<Option<JoinHandle<()>>>,
}

struct SessionState {
    phase: ChatState,
    is_open: bool,
    announced: bool,
    opened_at: Option<DateTime<Utc>>,
    messages: Vec<ChatMessage>,
    is_typing: bool,
    has_new_message: bool,
    /// Set when a user message goes out, cleared by the next reply.
    awaiting_since: Option<DateTime<Utc>>,
    shown_offers: HashSet<String>,
}

impl ChatSession {
    pub fn new(config: ChatConfig, deps: ChatDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                visitor_id: deps.identity.visitor_id(),
                api: ChatApi::new(deps.sender),
                sink: deps.sink,
                clock: deps.clock,
                identity: deps.identity,
                config,
                state: Mutex::new(SessionState {
                    phase: ChatState::Idle,
                    is_open: false,
                    announced: false,
                    opened_at: None,
                    messages: Vec::new(),
                    is_typing: false,
                    has_new_message: false,
                    awaiting_since: None,
                    shown_offers: HashSet::new(),
                }),
                poller: Mutex::new(None),
                auto_open: Mutex::new(None),
            }),
        }
    }

    // ─── Open / close ───────────────────────────────────────────────────

    /// Show the chat. The first open in this tab announces the visitor to
    /// the assistant backend; every open starts polling.
    pub fn open(&self, page_url: &str) {
        let now = self.inner.clock.now();
        let first_open = {
            let mut state = self.inner.state.lock();
            if state.is_open {
                return;
            }
            state.is_open = true;
            state.has_new_message = false;
            state.opened_at = Some(now);

            let first_open = !state.announced;
            if first_open {
                state.announced = true;
                state.phase = ChatState::Announced;
                state.is_typing = true;
            } else {
                state.phase = if state.messages.iter().any(ChatMessage::is_assistant) {
                    ChatState::Conversing
                } else {
                    ChatState::AwaitingFirstReply
                };
            }
            first_open
        };
        info!(visitor_id = %self.inner.visitor_id, first_open, "chat opened");

        self.inner
            .sink
            .emit(EventKind::ChatOpened(ChatPayload::default()));
        let mut record = self.conversion("chat_opened");
        record.page_url = Some(page_url.to_string());
        self.inner.sink.emit_conversion(record);

        if first_open {
            let session = self.clone();
            let page_url = page_url.to_string();
            spawn_detached(async move { session.announce(&page_url, now).await });
        }
        self.start_polling();
    }

    async fn announce(&self, page_url: &str, at: DateTime<Utc>) {
        let delivered = self
            .inner
            .api
            .announce_open(&self.inner.visitor_id, page_url, at)
            .await;
        let mut state = self.inner.state.lock();
        if state.phase == ChatState::Announced {
            state.phase = ChatState::AwaitingFirstReply;
        }
        if !delivered {
            state.is_typing = false;
        }
    }

    /// Hide the chat, stop polling and record how long it was open.
    pub fn close(&self) {
        let Some((duration, messages_count)) = self.hide() else {
            return;
        };
        info!(visitor_id = %self.inner.visitor_id, duration, "chat closed");

        self.inner.sink.emit(EventKind::ChatClosed(ChatPayload {
            chat_duration: Some(duration),
            messages_count: Some(messages_count),
            ..Default::default()
        }));
        let mut record = self.conversion("chat_closed");
        record.duration = Some(duration);
        self.inner.sink.emit_conversion(record);
    }

    /// Collapse the chat without ending the conversation.
    pub fn minimize(&self) {
        if self.hide().is_some() {
            self.inner
                .sink
                .emit(EventKind::ChatMinimized(ChatPayload::default()));
        }
    }

    /// Returns the open duration and message count, or `None` when the chat
    /// was not open.
    fn hide(&self) -> Option<(u64, usize)> {
        let now = self.inner.clock.now();
        let hidden = {
            let mut state = self.inner.state.lock();
            if !state.is_open {
                return None;
            }
            state.is_open = false;
            state.phase = ChatState::Idle;
            let duration = state
                .opened_at
                .take()
                .map(|at| elapsed_ms(at, now))
                .unwrap_or(0);
            (duration, state.messages.len())
        };
        self.stop_polling();
        Some(hidden)
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Append the visitor's message right away and submit it in the
    /// background. Blank input is ignored.
    pub fn send_message(&self, text: &str) -> Option<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let now = self.inner.clock.now();
        let message = ChatMessage::user(text, now);
        {
            let mut state = self.inner.state.lock();
            state.messages.push(message.clone());
            state.is_typing = true;
            state.awaiting_since = Some(now);
        }

        self.inner.sink.emit(EventKind::UserMessageSent(ChatPayload {
            message_preview: Some(truncate_chars(text, TRACKED_PREVIEW_CHARS)),
            message_length: Some(text.chars().count()),
            ..Default::default()
        }));
        let mut record = self.conversion("user_message_sent");
        record.message_preview = Some(truncate_chars(text, CONVERSION_PREVIEW_CHARS));
        self.inner.sink.emit_conversion(record);

        let session = self.clone();
        let text = text.to_string();
        spawn_detached(async move { session.submit(&text).await });
        Some(message)
    }

    async fn submit(&self, text: &str) {
        if self.inner.api.send_message(&self.inner.visitor_id, text).await {
            return;
        }
        let error = ChatMessage::delivery_error(
            self.inner.config.send_failure_message.clone(),
            self.inner.clock.now(),
        );
        let mut state = self.inner.state.lock();
        state.is_typing = false;
        state.awaiting_since = None;
        state.messages.push(error);
    }

    /// One poll cycle. Returns the assistant message it appended, if any.
    pub async fn poll_once(&self) -> Option<ChatMessage> {
        let response = self.inner.api.poll(&self.inner.visitor_id).await;
        let reply = response.reply()?.to_string();
        let now = self.inner.clock.now();
        let message = ChatMessage::assistant(reply, now, response.offer());

        let response_time = {
            let mut state = self.inner.state.lock();
            state.messages.push(message.clone());
            state.is_typing = false;
            // A closed chat stays idle; reopening resumes as conversing.
            if state.is_open {
                state.phase = ChatState::Conversing;
            } else {
                state.has_new_message = true;
            }
            state.awaiting_since.take().map(|at| elapsed_ms(at, now))
        };
        debug!(visitor_id = %self.inner.visitor_id, "assistant reply received");

        self.inner.sink.emit(EventKind::AiMessageReceived(ChatPayload {
            response_time,
            ..Default::default()
        }));
        self.inner
            .sink
            .emit_conversion(self.conversion("ai_message_received"));
        Some(message)
    }

    fn start_polling(&self) {
        let mut poller = self.inner.poller.lock();
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let session = self.clone();
        let every = self.inner.config.poll_interval();
        *poller = spawn_detached(async move {
            let mut tick = interval_at(Instant::now() + every, every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                session.poll_once().await;
            }
        });
    }

    fn stop_polling(&self) {
        if let Some(poller) = self.inner.poller.lock().take() {
            poller.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // ─── Payment offers ─────────────────────────────────────────────────

    /// Report an offer card as shown. Only the first render per product is
    /// reported; returns whether this call reported it.
    pub fn offer_rendered(&self, offer: &PaymentOffer) -> bool {
        let first = self
            .inner
            .state
            .lock()
            .shown_offers
            .insert(offer.key().to_string());
        if !first {
            return false;
        }

        self.inner
            .sink
            .emit(EventKind::PaymentCardShown(PaymentPayload {
                product: Some(offer.tracked_product()),
                payment_url: offer.payment_url.clone(),
                cart_value: None,
            }));
        let mut record = self.conversion("payment_card_shown");
        record.product = Some(offer.conversion_product());
        self.inner.sink.emit_conversion(record);
        true
    }

    /// The visitor activated the payment button. Returns the URL to
    /// navigate to; offers without a link do nothing.
    pub fn payment_link_activated(&self, offer: &PaymentOffer) -> Option<String> {
        let url = offer.payment_url.clone()?;
        self.inner
            .sink
            .emit(EventKind::PaymentLinkClicked(PaymentPayload {
                product: Some(offer.tracked_product()),
                payment_url: Some(url.clone()),
                cart_value: None,
            }));
        let mut record = self.conversion("payment_link_clicked");
        record.product = Some(offer.conversion_product());
        record.payment_url = Some(url.clone());
        self.inner.sink.emit_conversion(record);
        Some(url)
    }

    // ─── Auto-open ──────────────────────────────────────────────────────

    /// Open the chat after the configured delay unless it was ever shown to
    /// this visitor. Returns whether a timer was armed.
    pub fn schedule_auto_open(&self, page_url: &str) -> bool {
        if self.inner.identity.was_shown(keys::CHAT_SHOWN) {
            return false;
        }
        let session = self.clone();
        let page_url = page_url.to_string();
        let delay = self.inner.config.auto_open_delay();
        let handle = spawn_detached(async move {
            tokio::time::sleep(delay).await;
            session.open(&page_url);
            session.inner.identity.mark_shown(keys::CHAT_SHOWN);
        });
        let armed = handle.is_some();
        if let Some(previous) = std::mem::replace(&mut *self.inner.auto_open.lock(), handle) {
            previous.abort();
        }
        armed
    }

    /// Abort background tasks. The conversation itself is kept.
    pub fn shutdown(&self) {
        if let Some(timer) = self.inner.auto_open.lock().take() {
            timer.abort();
        }
        self.stop_polling();
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn visitor_id(&self) -> &str {
        &self.inner.visitor_id
    }

    pub fn state(&self) -> ChatState {
        self.inner.state.lock().phase
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().messages.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().is_open
    }

    pub fn is_typing(&self) -> bool {
        self.inner.state.lock().is_typing
    }

    pub fn has_new_message(&self) -> bool {
        self.inner.state.lock().has_new_message
    }

    pub fn acknowledge_new_message(&self) {
        self.inner.state.lock().has_new_message = false;
    }

    fn conversion(&self, event_type: &str) -> ConversionRecord {
        ConversionRecord::new(
            self.inner.visitor_id.clone(),
            event_type,
            self.inner.clock.now(),
        )
    }
}
