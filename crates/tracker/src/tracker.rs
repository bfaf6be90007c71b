//! The behavioral tracker service.
//!
//! One explicitly constructed instance per page context. `start()` records
//! the visit and the first page view, then spawns a background loop that
//! consumes [`BrowserSignal`]s and drives the flush and engagement timers.
//! Public `track_*` methods and the [`EventSink`] impl let other services
//! (chat, commerce flows) report milestones through the same queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use storefront_core::clock::elapsed_ms;
use storefront_core::config::TrackerConfig;
use storefront_core::events::{
    ChatPayload, ConversionRecord, Delivery, ErrorPayload, EventBatch, EventContext, EventKind,
    InteractionEvent, PageViewPayload, PaymentPayload, ProductInfo, ProductPayload,
    truncate_chars, TrackingEvent,
};
use storefront_core::{Clock, EventSink, HttpSender, KeyValueStore};

use crate::delivery::CollectorClient;
use crate::device::{DeviceSnapshot, NavigationContext, UtmParams};
use crate::engagement::EngagementSnapshot;
use crate::identity::{IdentityStore, PageHistoryEntry, SessionIdentity, VisitorProfile};
use crate::observers::form::observe_form;
use crate::observers::pointer::{
    observe_click, observe_hover_end, observe_hover_start, observe_pointer_move,
};
use crate::observers::scroll::{observe_scroll, ScrollGeometry};
use crate::observers::PageAccumulator;
use crate::queue::EventQueue;
use crate::signals::BrowserSignal;
use crate::timing::{spawn_detached, Debouncer, Throttle};

const USER_MESSAGE_PREVIEW_CHARS: usize = 100;
const UNHANDLED_REJECTION_MESSAGE: &str = "Unhandled Promise Rejection";

/// Capabilities injected into the tracker.
#[derive(Clone)]
pub struct TrackerDeps {
    pub durable: Arc<dyn KeyValueStore>,
    pub ephemeral: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub sender: Arc<dyn HttpSender>,
}

/// Result of one batch flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Delivered(usize),
    /// Delivery failed; the batch is back at the front of the buffer.
    Requeued(usize),
}

/// Which error kind [`BehavioralTracker::track_error`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Js,
    Api,
    Network,
}

#[derive(Clone)]
pub struct BehavioralTracker {
    inner: Arc<Inner>,
}

struct Inner {
    config: TrackerConfig,
    identity: Arc<IdentityStore>,
    clock: Arc<dyn Clock>,
    collector: CollectorClient,
    navigation: NavigationContext,
    visitor_id: String,
    created_at: DateTime<Utc>,
    state: Mutex<PageState>,
    queue: Mutex<EventQueue>,
    scroll_debounce: Debouncer,
    pointer_throttle: Throttle,
    lifecycle: Mutex<Lifecycle>,
    shutdown: Notify,
}

struct PageState {
    /// Session stamped on outgoing records; re-resolved on page views only.
    session: SessionIdentity,
    page: PageAccumulator,
    product_views: HashMap<String, ProductView>,
}

struct ProductView {
    product: ProductInfo,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    torn_down: bool,
    run_handle: Option<JoinHandle<()>>,
}

impl BehavioralTracker {
    pub fn new(config: TrackerConfig, deps: TrackerDeps, navigation: NavigationContext) -> Self {
        let identity = IdentityStore::new(deps.durable, deps.ephemeral, deps.clock.clone())
            .with_session_timeout_ms(config.session_timeout_ms)
            .with_history_limit(config.page_history_limit);
        let identity = Arc::new(identity);
        let now = deps.clock.now();
        let visitor_id = identity.visitor_id();
        let session = identity.session();

        let state = PageState {
            session,
            page: PageAccumulator::new(navigation.url.clone(), navigation.title.clone(), now),
            product_views: HashMap::new(),
        };

        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(EventQueue::new(
                    config.flush_threshold,
                    config.max_buffered_events,
                )),
                scroll_debounce: Debouncer::new(config.scroll_debounce()),
                pointer_throttle: Throttle::new(config.mouse_throttle_ms),
                collector: CollectorClient::new(deps.sender),
                clock: deps.clock,
                config,
                identity,
                navigation,
                visitor_id,
                created_at: now,
                state: Mutex::new(state),
                lifecycle: Mutex::new(Lifecycle::default()),
                shutdown: Notify::new(),
            }),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Record the visit and initial page view, then spawn the signal loop.
    /// Calling it again is a no-op.
    pub fn start(&self, signals: mpsc::Receiver<BrowserSignal>) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.started {
                debug!("tracker already started");
                return;
            }
            lifecycle.started = true;
        }

        let nav = &self.inner.navigation;
        let session_id = self.session_id();
        let profile = self.inner.identity.record_visit(
            &session_id,
            &DeviceSnapshot::capture(nav),
            &UtmParams::from_url(&nav.url),
        );
        info!(
            visitor_id = %self.inner.visitor_id,
            session_id = %session_id,
            total_visits = profile.total_visits,
            "behavioral tracker started"
        );

        let page_load_time = elapsed_ms(self.inner.created_at, self.inner.clock.now());
        self.begin_page(nav.url.clone(), nav.title.clone(), page_load_time);

        let handle = spawn_detached(self.clone().run(signals));
        self.inner.lifecycle.lock().run_handle = handle;
    }

    /// Stop the background loop and cancel pending timers. Buffered events
    /// stay queued.
    pub async fn stop(&self) {
        self.inner.scroll_debounce.cancel();
        let handle = self.inner.lifecycle.lock().run_handle.take();
        if let Some(handle) = handle {
            self.inner.shutdown.notify_one();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "tracker loop ended abnormally");
                }
            }
            info!(visitor_id = %self.inner.visitor_id, "behavioral tracker stopped");
        }
    }

    /// Page teardown: final engagement snapshot, then a beacon flush.
    /// Timers are torn down; only the first call has any effect.
    pub fn teardown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.torn_down {
                return;
            }
            lifecycle.torn_down = true;
            if lifecycle.run_handle.is_some() {
                self.inner.shutdown.notify_one();
            }
        }
        self.inner.scroll_debounce.cancel();
        self.exit_page();
        self.beacon_flush();
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lifecycle
            .lock()
            .run_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    async fn run(self, mut signals: mpsc::Receiver<BrowserSignal>) {
        let flush_every = self.inner.config.flush_interval();
        let engagement_every = self.inner.config.engagement_interval();
        let mut flush_tick = interval_at(Instant::now() + flush_every, flush_every);
        let mut engagement_tick = interval_at(Instant::now() + engagement_every, engagement_every);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        engagement_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut feed_open = true;

        loop {
            tokio::select! {
                signal = signals.recv(), if feed_open => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => {
                        debug!("signal feed closed");
                        feed_open = false;
                    }
                },
                _ = flush_tick.tick() => {
                    self.flush().await;
                }
                _ = engagement_tick.tick() => {
                    self.track_engagement();
                }
                _ = self.inner.shutdown.notified() => break,
            }
        }
        debug!("tracker loop exited");
    }

    // ─── Signals ────────────────────────────────────────────────────────

    /// Apply one browser signal.
    pub fn handle_signal(&self, signal: BrowserSignal) {
        let now = self.inner.clock.now();
        match signal {
            BrowserSignal::Scroll {
                scroll_top,
                scroll_height,
                viewport_height,
            } => {
                self.inner.state.lock().page.touch(now);
                let geometry = ScrollGeometry {
                    scroll_top,
                    scroll_height,
                    viewport_height,
                };
                let tracker = self.clone();
                self.inner
                    .scroll_debounce
                    .schedule(async move { tracker.measure_scroll(geometry) });
            }
            BrowserSignal::Click { target, x, y } => {
                let events = observe_click(&mut self.inner.state.lock().page, &target, x, y, now);
                self.record_all(events);
            }
            BrowserSignal::PointerMove { x, y } => {
                let mut state = self.inner.state.lock();
                state.page.touch(now);
                if self.inner.pointer_throttle.try_acquire(now) {
                    observe_pointer_move(&mut state.page, x, y);
                }
            }
            BrowserSignal::PointerEnter { target } => {
                observe_hover_start(&mut self.inner.state.lock().page, &target, now);
            }
            BrowserSignal::PointerLeave { target } => {
                let events = observe_hover_end(
                    &mut self.inner.state.lock().page,
                    &target,
                    now,
                    self.inner.config.hover_min_duration_ms,
                );
                self.record_all(events);
            }
            BrowserSignal::Form { action, target } => {
                if let Some(event) = observe_form(&target, action) {
                    self.record(event);
                }
            }
            BrowserSignal::VisibilityHidden => self.beacon_flush(),
            BrowserSignal::Navigate { url, title } | BrowserSignal::PopState { url, title } => {
                self.navigate(url, title)
            }
            BrowserSignal::Error {
                message,
                stack,
                source,
            } => self.record(EventKind::JsError(ErrorPayload {
                error_message: message,
                error_stack: stack,
                error_source: source,
            })),
            BrowserSignal::UnhandledRejection { message, stack } => {
                self.record(EventKind::JsError(ErrorPayload {
                    error_message: message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| UNHANDLED_REJECTION_MESSAGE.to_string()),
                    error_stack: stack,
                    error_source: None,
                }))
            }
            BrowserSignal::Unload => self.teardown(),
        }
    }

    fn measure_scroll(&self, geometry: ScrollGeometry) {
        let milestone = observe_scroll(&mut self.inner.state.lock().page, geometry);
        if let Some(payload) = milestone {
            self.record(EventKind::Scroll(payload));
        }
    }

    /// In-app URL change: close the outgoing page and open the new one.
    /// Same-URL navigations are ignored.
    fn navigate(&self, url: String, title: String) {
        if self.inner.state.lock().page.page_url == url {
            return;
        }
        self.inner.scroll_debounce.cancel();
        self.exit_page();
        self.begin_page(url, title, 0);
    }

    fn begin_page(&self, url: String, title: String, page_load_time: u64) {
        let now = self.inner.clock.now();
        let session = self.inner.identity.session();
        let previous = {
            let mut state = self.inner.state.lock();
            let previous = std::mem::take(&mut state.page.page_url);
            state.session = session;
            state.page.reset(url.clone(), title.clone(), now);
            previous
        };
        self.inner.pointer_throttle.reset();
        self.inner.identity.record_page_view(&url);
        debug!(page_url = %url, "page view");

        self.record(EventKind::PageView(PageViewPayload {
            page_title: title,
            referrer: self.inner.navigation.referrer.clone(),
            previous_page: (previous != url && !previous.is_empty()).then_some(previous),
            page_load_time,
            scroll_depth_max: 0,
        }));
    }

    fn exit_page(&self) {
        let snapshot = self.track_engagement();
        self.inner.identity.add_time_spent(snapshot.time_on_page);
    }

    // ─── Recording ──────────────────────────────────────────────────────

    fn context(&self) -> EventContext {
        let state = self.inner.state.lock();
        EventContext {
            visitor_id: self.inner.visitor_id.clone(),
            session_id: state.session.session_id.clone(),
            page_url: state.page.page_url.clone(),
            timestamp: self.inner.clock.now(),
        }
    }

    /// Queue a record; priority kinds are also sent on their own request.
    pub fn record(&self, kind: EventKind) {
        let delivery = kind.delivery();
        let event = TrackingEvent::Interaction(InteractionEvent {
            context: self.context(),
            kind,
        });
        if delivery == Delivery::Priority {
            self.send_priority(event.clone());
        }
        self.enqueue(event);
    }

    fn record_all(&self, events: Vec<EventKind>) {
        for event in events {
            self.record(event);
        }
    }

    fn enqueue(&self, event: TrackingEvent) {
        let threshold_reached = self.inner.queue.lock().push(event);
        if threshold_reached {
            let tracker = self.clone();
            spawn_detached(async move {
                tracker.flush().await;
            });
        }
    }

    fn send_priority(&self, event: TrackingEvent) {
        let collector = self.inner.collector.clone();
        spawn_detached(async move {
            match collector.send_event(&event).await {
                Ok(()) => metrics::counter!("telemetry.priority.sent").increment(1),
                Err(e) => {
                    metrics::counter!("telemetry.priority.errors").increment(1);
                    warn!(error = %e, "priority event delivery failed");
                }
            }
        });
    }

    fn batch(&self, events: Vec<TrackingEvent>) -> EventBatch {
        EventBatch {
            visitor_id: self.inner.visitor_id.clone(),
            session_id: self.inner.state.lock().session.session_id.clone(),
            events,
            timestamp: self.inner.clock.now(),
        }
    }

    /// Send everything buffered as one batch. On failure the batch goes
    /// back in front of the buffer.
    pub async fn flush(&self) -> FlushOutcome {
        let events = self.inner.queue.lock().take();
        if events.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = events.len();
        let batch = self.batch(events);

        match self.inner.collector.send_batch(&batch).await {
            Ok(()) => {
                metrics::counter!("telemetry.events.flushed").increment(count as u64);
                debug!(count, "batch delivered");
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                metrics::counter!("telemetry.flush.errors").increment(1);
                warn!(error = %e, count, "batch delivery failed, requeueing");
                self.inner.queue.lock().requeue(batch.events);
                FlushOutcome::Requeued(count)
            }
        }
    }

    /// Hand the whole buffer to the beacon transport. Nothing is requeued.
    pub fn beacon_flush(&self) {
        let events = self.inner.queue.lock().take();
        if events.is_empty() {
            return;
        }
        let count = events.len();
        match self.inner.collector.beacon_batch(&self.batch(events)) {
            Ok(()) => metrics::counter!("telemetry.events.flushed").increment(count as u64),
            Err(e) => warn!(error = %e, count, "beacon batch could not be encoded"),
        }
    }

    /// Queue an engagement record for the current page.
    pub fn track_engagement(&self) -> EngagementSnapshot {
        let snapshot = self.engagement_snapshot();
        let metrics = snapshot.clone().into_metrics(self.context());
        self.enqueue(TrackingEvent::Engagement(metrics));
        snapshot
    }

    // ─── Commerce ───────────────────────────────────────────────────────

    /// Start a product view timer and report the view.
    pub fn track_product_viewed(&self, product: ProductInfo) {
        self.inner.state.lock().product_views.insert(
            product.id.clone(),
            ProductView {
                product: product.clone(),
                started_at: self.inner.clock.now(),
            },
        );
        self.record(EventKind::ProductViewed(ProductPayload {
            product,
            view_duration: None,
        }));
    }

    /// Close a product view timer. Returns the view duration when a timer
    /// was running.
    pub fn track_product_view_ended(&self, product_id: &str) -> Option<u64> {
        let view = self.inner.state.lock().product_views.remove(product_id)?;
        let duration = elapsed_ms(view.started_at, self.inner.clock.now());
        self.record(EventKind::ProductViewed(ProductPayload {
            product: view.product,
            view_duration: Some(duration),
        }));
        Some(duration)
    }

    pub fn track_add_to_cart(&self, product: ProductInfo) {
        self.record(EventKind::AddToCart(product_payload(product)));
    }

    pub fn track_remove_from_cart(&self, product: ProductInfo) {
        self.record(EventKind::RemoveFromCart(product_payload(product)));
    }

    pub fn track_wishlist_add(&self, product: ProductInfo) {
        self.record(EventKind::WishlistAdd(product_payload(product)));
    }

    pub fn track_checkout_started(&self, cart_value: f64) {
        self.record(EventKind::CheckoutStarted(cart_payload(cart_value)));
    }

    pub fn track_checkout_completed(&self, cart_value: f64) {
        self.record(EventKind::CheckoutCompleted(cart_payload(cart_value)));
    }

    pub fn track_checkout_abandoned(&self, cart_value: f64) {
        self.record(EventKind::CheckoutAbandoned(cart_payload(cart_value)));
    }

    pub fn track_payment_card_shown(&self, product: ProductInfo, payment_url: Option<String>) {
        self.record(EventKind::PaymentCardShown(PaymentPayload {
            product: Some(product),
            payment_url,
            cart_value: None,
        }));
    }

    pub fn track_payment_link_clicked(&self, product: ProductInfo, payment_url: Option<String>) {
        self.record(EventKind::PaymentLinkClicked(PaymentPayload {
            product: Some(product),
            payment_url,
            cart_value: None,
        }));
    }

    pub fn track_error(
        &self,
        class: ErrorClass,
        message: impl Into<String>,
        stack: Option<String>,
    ) {
        let payload = ErrorPayload {
            error_message: message.into(),
            error_stack: stack,
            error_source: None,
        };
        self.record(match class {
            ErrorClass::Js => EventKind::JsError(payload),
            ErrorClass::Api => EventKind::ApiError(payload),
            ErrorClass::Network => EventKind::NetworkError(payload),
        });
    }

    // ─── Chat ───────────────────────────────────────────────────────────

    pub fn track_chat_opened(&self) {
        self.record(EventKind::ChatOpened(ChatPayload::default()));
    }

    pub fn track_chat_closed(&self, chat_duration_ms: u64, messages_count: usize) {
        self.record(EventKind::ChatClosed(ChatPayload {
            chat_duration: Some(chat_duration_ms),
            messages_count: Some(messages_count),
            ..Default::default()
        }));
    }

    pub fn track_chat_minimized(&self) {
        self.record(EventKind::ChatMinimized(ChatPayload::default()));
    }

    pub fn track_user_message_sent(&self, message: &str) {
        self.record(EventKind::UserMessageSent(ChatPayload {
            message_preview: Some(truncate_chars(message, USER_MESSAGE_PREVIEW_CHARS)),
            message_length: Some(message.chars().count()),
            ..Default::default()
        }));
    }

    pub fn track_ai_message_received(&self, response_time_ms: Option<u64>) {
        self.record(EventKind::AiMessageReceived(ChatPayload {
            response_time: response_time_ms,
            ..Default::default()
        }));
    }

    pub fn track_typing_started(&self) {
        self.record(EventKind::TypingStarted(ChatPayload::default()));
    }

    pub fn track_typing_stopped(&self) {
        self.record(EventKind::TypingStopped(ChatPayload::default()));
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn visitor_id(&self) -> &str {
        &self.inner.visitor_id
    }

    pub fn session_id(&self) -> String {
        self.inner.state.lock().session.session_id.clone()
    }

    pub fn visitor_profile(&self) -> Option<VisitorProfile> {
        self.inner.identity.visitor_profile()
    }

    pub fn page_history(&self) -> Vec<PageHistoryEntry> {
        self.inner.identity.page_history()
    }

    /// Shared identity store, for services that need the visitor id or the
    /// first-touch flags.
    pub fn identity(&self) -> Arc<IdentityStore> {
        self.inner.identity.clone()
    }

    pub fn current_page_url(&self) -> String {
        self.inner.state.lock().page.page_url.clone()
    }

    /// Milliseconds since the tracker's session started. Never renews the
    /// session; that only happens on a page view.
    pub fn session_duration(&self) -> u64 {
        let started_at = self.inner.state.lock().session.started_at;
        elapsed_ms(started_at, self.inner.clock.now())
    }

    pub fn engagement_snapshot(&self) -> EngagementSnapshot {
        let state = self.inner.state.lock();
        EngagementSnapshot::capture(
            &state.page,
            self.inner.clock.now(),
            self.inner.config.idle_threshold_ms,
        )
    }

    pub fn current_engagement_score(&self) -> u8 {
        self.engagement_snapshot().engagement_score
    }

    pub fn buffered_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn buffered_events(&self) -> Vec<TrackingEvent> {
        self.inner.queue.lock().events().to_vec()
    }
}

impl EventSink for BehavioralTracker {
    fn emit(&self, kind: EventKind) {
        self.record(kind);
    }

    fn emit_conversion(&self, record: ConversionRecord) {
        let collector = self.inner.collector.clone();
        spawn_detached(async move {
            if let Err(e) = collector.send_conversion(&record).await {
                warn!(error = %e, event_type = %record.event_type, "conversion delivery failed");
            }
        });
    }
}

fn product_payload(product: ProductInfo) -> ProductPayload {
    ProductPayload {
        product,
        view_duration: None,
    }
}

fn cart_payload(cart_value: f64) -> PaymentPayload {
    PaymentPayload {
        cart_value: Some(cart_value),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{BATCH_PATH, CONVERSION_PATH, TRACK_PATH};
    use crate::identity::keys;
    use crate::signals::ElementInfo;
    use chrono::TimeZone;
    use std::time::Duration;
    use storefront_core::events::HoverPayload;
    use storefront_core::http::RequestMethod;
    use storefront_core::{CaptureSender, ManualClock, MemoryStore};

    struct Fixture {
        tracker: BehavioralTracker,
        sender: Arc<CaptureSender>,
        clock: Arc<ManualClock>,
        ephemeral: Arc<MemoryStore>,
    }

    fn navigation() -> NavigationContext {
        NavigationContext {
            url: "https://shop.example/?utm_source=newsletter".into(),
            title: "Accueil".into(),
            referrer: "https://search.example/".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0) Chrome/120.0".into(),
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        ));
        let sender = Arc::new(CaptureSender::new());
        let ephemeral = Arc::new(MemoryStore::new());
        let deps = TrackerDeps {
            durable: Arc::new(MemoryStore::new()),
            ephemeral: ephemeral.clone(),
            clock: clock.clone(),
            sender: sender.clone(),
        };
        Fixture {
            tracker: BehavioralTracker::new(TrackerConfig::default(), deps, navigation()),
            sender,
            clock,
            ephemeral,
        }
    }

    fn hover() -> EventKind {
        EventKind::Hover(HoverPayload {
            element_type: "button".into(),
            element_id: None,
            element_text: None,
            hover_duration: 600,
        })
    }

    fn scroll_to(pct: f64) -> BrowserSignal {
        BrowserSignal::Scroll {
            scroll_top: pct * 10.0,
            scroll_height: 1_800.0,
            viewport_height: 800.0,
        }
    }

    fn names(events: &[TrackingEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                TrackingEvent::Interaction(i) => i.kind.name(),
                TrackingEvent::Engagement(_) => "engagement",
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_records_visit_and_first_page_view() {
        let f = fixture();
        let (_tx, rx) = mpsc::channel(16);
        f.tracker.start(rx);
        f.tracker.start(mpsc::channel(1).1);

        assert!(f.tracker.is_running());
        assert_eq!(names(&f.tracker.buffered_events()), vec!["page_view"]);

        let profile = f.tracker.visitor_profile().unwrap();
        assert_eq!(profile.total_visits, 1);
        assert_eq!(profile.total_pages_viewed, 1);
        assert_eq!(profile.utm_params.utm_source.as_deref(), Some("newsletter"));
        assert_eq!(profile.device_info.browser, "Chrome");

        f.tracker.stop().await;
        assert!(!f.tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_event_sent_immediately_and_buffered() {
        let f = fixture();
        f.tracker.track_chat_opened();
        settle().await;

        assert_eq!(f.sender.count(RequestMethod::Post, TRACK_PATH), 1);
        assert_eq!(f.sender.bodies(TRACK_PATH)[0]["event_type"], "chat_opened");
        assert_eq!(names(&f.tracker.buffered_events()), vec!["chat_opened"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_event_not_sent_alone() {
        let f = fixture();
        f.tracker.emit(hover());
        settle().await;
        assert_eq!(f.sender.count(RequestMethod::Post, TRACK_PATH), 0);
        assert_eq!(f.tracker.buffered_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_twentieth_event_triggers_flush() {
        let f = fixture();
        for _ in 0..19 {
            f.tracker.emit(hover());
        }
        settle().await;
        assert_eq!(f.sender.count(RequestMethod::Post, BATCH_PATH), 0);

        f.tracker.emit(hover());
        settle().await;
        assert_eq!(f.sender.count(RequestMethod::Post, BATCH_PATH), 1);
        let body = &f.sender.bodies(BATCH_PATH)[0];
        assert_eq!(body["events"].as_array().unwrap().len(), 20);
        assert_eq!(body["visitor_id"], f.tracker.visitor_id());
        assert_eq!(f.tracker.buffered_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_requeues_in_front() {
        let f = fixture();
        f.sender.fail_path(BATCH_PATH);
        f.tracker.emit(hover());
        f.tracker.track_typing_started();

        assert_eq!(f.tracker.flush().await, FlushOutcome::Requeued(2));
        f.tracker.track_typing_stopped();
        assert_eq!(
            names(&f.tracker.buffered_events()),
            vec!["hover", "typing_started", "typing_stopped"]
        );

        f.sender.restore_path(BATCH_PATH);
        assert_eq!(f.tracker.flush().await, FlushOutcome::Delivered(3));
        assert_eq!(f.tracker.flush().await, FlushOutcome::Empty);

        let bodies = f.sender.bodies(BATCH_PATH);
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1]["events"][0]["event_type"], "hover");
        assert_eq!(bodies[1]["events"][2]["event_type"], "typing_stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_emits_exit_snapshot_and_resets_page() {
        let f = fixture();
        let (_tx, rx) = mpsc::channel(16);
        f.tracker.start(rx);

        f.tracker.handle_signal(BrowserSignal::Click {
            target: ElementInfo::new(1, "button"),
            x: 10.0,
            y: 10.0,
        });
        f.clock.advance_ms(10_000);
        f.tracker.handle_signal(BrowserSignal::Navigate {
            url: "https://shop.example/canapes".into(),
            title: "Canapés".into(),
        });

        let events = f.tracker.buffered_events();
        assert_eq!(
            names(&events),
            vec!["page_view", "click", "engagement", "page_view"]
        );
        match &events[2] {
            TrackingEvent::Engagement(m) => {
                assert_eq!(m.clicks_count, 1);
                assert_eq!(m.time_on_page, 10_000);
                assert_eq!(m.context.page_url, "https://shop.example/?utm_source=newsletter");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[3] {
            TrackingEvent::Interaction(InteractionEvent {
                context,
                kind: EventKind::PageView(view),
            }) => {
                assert_eq!(context.page_url, "https://shop.example/canapes");
                assert_eq!(
                    view.previous_page.as_deref(),
                    Some("https://shop.example/?utm_source=newsletter")
                );
                assert_eq!(view.page_load_time, 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(f.tracker.engagement_snapshot().clicks_count, 0);
        let profile = f.tracker.visitor_profile().unwrap();
        assert_eq!(profile.total_pages_viewed, 2);
        assert_eq!(profile.total_time_spent, 10_000);
        assert_eq!(f.tracker.page_history().len(), 2);

        // Same URL again is not a navigation.
        f.tracker.handle_signal(BrowserSignal::PopState {
            url: "https://shop.example/canapes".into(),
            title: "Canapés".into(),
        });
        assert_eq!(f.tracker.buffered_count(), 4);
        f.tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_milestone_exactness() {
        let f = fixture();
        for pct in [24.0, 25.0, 26.0] {
            f.tracker.handle_signal(scroll_to(pct));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let events = f.tracker.buffered_events();
        assert_eq!(names(&events), vec!["scroll"]);
        match &events[0] {
            TrackingEvent::Interaction(InteractionEvent {
                kind: EventKind::Scroll(s),
                ..
            }) => assert_eq!(s.scroll_depth, 25),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.tracker.engagement_snapshot().scroll_depth_max, 26);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_burst_measured_once() {
        let f = fixture();
        for pct in [10.0, 25.0, 30.0] {
            f.tracker.handle_signal(scroll_to(pct));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Only the settled 30% position is measured.
        assert_eq!(f.tracker.buffered_count(), 0);
        assert_eq!(f.tracker.engagement_snapshot().scroll_depth_max, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_beacons_buffer() {
        let f = fixture();
        f.tracker.emit(hover());
        f.tracker.emit(hover());
        f.tracker.handle_signal(BrowserSignal::VisibilityHidden);

        assert_eq!(f.sender.count(RequestMethod::Beacon, BATCH_PATH), 1);
        assert_eq!(
            f.sender.bodies(BATCH_PATH)[0]["events"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(f.tracker.buffered_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_snapshots_then_beacons_once() {
        let f = fixture();
        let (_tx, rx) = mpsc::channel(16);
        f.tracker.start(rx);

        f.tracker.handle_signal(BrowserSignal::Unload);
        f.tracker.teardown();
        settle().await;

        assert_eq!(f.sender.count(RequestMethod::Beacon, BATCH_PATH), 1);
        let body = &f.sender.bodies(BATCH_PATH)[0];
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].get("engagement_score").is_some());
        assert!(!f.tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_priority() {
        let f = fixture();
        f.tracker.handle_signal(BrowserSignal::Error {
            message: "x is undefined".into(),
            stack: Some("at cart.js:12".into()),
            source: Some("cart.js:12:4".into()),
        });
        f.tracker
            .handle_signal(BrowserSignal::UnhandledRejection { message: None, stack: None });
        settle().await;

        let sent = f.sender.bodies(TRACK_PATH);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["event_type"], "js_error");
        assert_eq!(sent[0]["error_source"], "cart.js:12:4");
        assert_eq!(sent[1]["error_message"], UNHANDLED_REJECTION_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pointer_moves_throttled() {
        let f = fixture();
        f.tracker.handle_signal(BrowserSignal::PointerMove { x: 0.0, y: 0.0 });
        f.clock.advance_ms(150);
        f.tracker.handle_signal(BrowserSignal::PointerMove { x: 3.0, y: 4.0 });
        f.clock.advance_ms(50);
        f.tracker
            .handle_signal(BrowserSignal::PointerMove { x: 100.0, y: 100.0 });

        assert_eq!(f.tracker.engagement_snapshot().mouse_distance, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_pair_through_signals() {
        let f = fixture();
        let button = ElementInfo::new(42, "button");
        f.tracker
            .handle_signal(BrowserSignal::PointerEnter { target: button.clone() });
        f.clock.advance_ms(499);
        f.tracker
            .handle_signal(BrowserSignal::PointerLeave { target: button.clone() });
        assert_eq!(f.tracker.buffered_count(), 0);

        f.tracker
            .handle_signal(BrowserSignal::PointerEnter { target: button.clone() });
        f.clock.advance_ms(501);
        f.tracker
            .handle_signal(BrowserSignal::PointerLeave { target: button });
        assert_eq!(names(&f.tracker.buffered_events()), vec!["hover"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_product_view_duration() {
        let f = fixture();
        f.tracker
            .track_product_viewed(ProductInfo::new("oslo-3p", "Canapé Oslo", 1290.0));
        f.clock.advance_ms(4_000);

        assert_eq!(f.tracker.track_product_view_ended("oslo-3p"), Some(4_000));
        assert_eq!(f.tracker.track_product_view_ended("oslo-3p"), None);
        settle().await;

        // Only the view start goes out on its own.
        assert_eq!(f.sender.count(RequestMethod::Post, TRACK_PATH), 1);
        let events = f.tracker.buffered_events();
        match &events[1] {
            TrackingEvent::Interaction(InteractionEvent {
                kind: EventKind::ProductViewed(p),
                ..
            }) => assert_eq!(p.view_duration, Some(4_000)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_message_preview_truncated() {
        let f = fixture();
        let long = "é".repeat(150);
        f.tracker.track_user_message_sent(&long);
        settle().await;

        let sent = &f.sender.bodies(TRACK_PATH)[0];
        assert_eq!(sent["message_preview"].as_str().unwrap().chars().count(), 100);
        assert_eq!(sent["message_length"], 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversion_records_posted() {
        let f = fixture();
        let mut record =
            ConversionRecord::new(f.tracker.visitor_id(), "chat_opened", f.clock.now());
        record.page_url = Some(f.tracker.current_page_url());
        f.tracker.emit_conversion(record);
        settle().await;

        let sent = f.sender.bodies(CONVERSION_PATH);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event_type"], "chat_opened");
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_and_engagement() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(16);
        f.tracker.start(rx);
        tx.send(BrowserSignal::Click {
            target: ElementInfo::new(1, "a"),
            x: 1.0,
            y: 1.0,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        let batches = f.sender.bodies(BATCH_PATH);
        assert!(!batches.is_empty());
        assert_eq!(batches[0]["events"][0]["event_type"], "page_view");
        assert_eq!(batches[0]["events"][1]["event_type"], "click");

        f.tracker.stop().await;
    }

    #[test]
    fn test_accessors_before_start() {
        let f = fixture();
        assert!(f.tracker.visitor_id().starts_with("v_"));
        assert!(f.tracker.session_id().starts_with("s_"));
        assert_eq!(f.tracker.current_engagement_score(), 10);
        assert!(f.tracker.visitor_profile().is_none());

        f.clock.advance_ms(90_000);
        assert_eq!(f.tracker.session_duration(), 90_000);
        // Time saturates at 20; idle past the threshold loses activity.
        assert_eq!(f.tracker.current_engagement_score(), 20);
    }

    #[test]
    fn test_session_duration_does_not_renew_session() {
        let f = fixture();
        let original = f.tracker.session_id();

        f.clock.advance_ms(31 * 60 * 1_000);
        assert_eq!(f.tracker.session_duration(), 31 * 60 * 1_000);
        assert_eq!(f.tracker.session_id(), original);
        assert_eq!(
            f.ephemeral.get(keys::SESSION_ID).as_deref(),
            Some(original.as_str())
        );

        // The next page view rolls the session, in storage and on records alike.
        f.tracker.handle_signal(BrowserSignal::Navigate {
            url: "https://shop.example/canapes".into(),
            title: "Canapés".into(),
        });
        let renewed = f.tracker.session_id();
        assert_ne!(renewed, original);
        assert_eq!(f.ephemeral.get(keys::SESSION_ID), Some(renewed.clone()));
        assert_eq!(f.tracker.session_duration(), 0);
        match f.tracker.buffered_events().last() {
            Some(TrackingEvent::Interaction(event)) => {
                assert_eq!(event.context.session_id, renewed)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
