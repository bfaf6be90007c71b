//! Identity & session store: durable visitor id, fixed-window session id,
//! visitor profile, page history and first-touch flags.
//!
//! Nothing here fails outward: storage write errors are logged and the
//! in-memory value is still returned, corrupt JSON falls back to defaults.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use storefront_core::store::{read_json, write_json};
use storefront_core::{Clock, KeyValueStore};

use crate::device::{DeviceSnapshot, UtmParams};

/// Storage keys shared with the storefront front-end.
pub mod keys {
    pub const VISITOR_ID: &str = "archetypes_visitor_id";
    pub const VISITOR_PROFILE: &str = "archetypes_visitor_profile";
    pub const SESSION_ID: &str = "archetypes_session_id";
    pub const SESSION_START: &str = "archetypes_session_start";
    pub const PAGE_HISTORY: &str = "archetypes_page_history";
    pub const CHAT_SHOWN: &str = "archetypes_chat_shown";
}

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorProfile {
    pub visitor_id: String,
    pub session_id: String,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
    pub total_visits: u64,
    pub total_pages_viewed: u64,
    pub total_time_spent: u64,
    pub device_info: DeviceSnapshot,
    pub utm_params: UtmParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHistoryEntry {
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

pub struct IdentityStore {
    durable: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
    history_limit: usize,
}

impl IdentityStore {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        ephemeral: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            clock,
            session_timeout: Duration::minutes(30),
            history_limit: 50,
        }
    }

    pub fn with_session_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.session_timeout = Duration::milliseconds(timeout_ms as i64);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    // ─── Identifiers ────────────────────────────────────────────────────

    /// Durable visitor id, minted on first call and stable afterwards.
    pub fn visitor_id(&self) -> String {
        if let Some(id) = self.durable.get(keys::VISITOR_ID).filter(|id| !id.is_empty()) {
            return id;
        }
        let id = format!("v_{}_{}", self.clock.now_ms(), random_suffix(12));
        self.put(&*self.durable, keys::VISITOR_ID, &id);
        info!(visitor_id = %id, "new visitor");
        id
    }

    /// Current session, minted when none is stored or the stored one is
    /// older than the timeout. Reading never extends the window.
    pub fn session(&self) -> SessionIdentity {
        let now = self.clock.now();
        if let Some(existing) = self.stored_session() {
            if now - existing.started_at < self.session_timeout {
                return existing;
            }
            debug!(session_id = %existing.session_id, "session expired");
        }

        let session = SessionIdentity {
            session_id: format!("s_{}_{}", now.timestamp_millis(), random_suffix(8)),
            started_at: now,
        };
        self.put(&*self.ephemeral, keys::SESSION_ID, &session.session_id);
        self.put(
            &*self.ephemeral,
            keys::SESSION_START,
            &now.timestamp_millis().to_string(),
        );
        info!(session_id = %session.session_id, "new session");
        session
    }

    pub fn session_id(&self) -> String {
        self.session().session_id
    }

    fn stored_session(&self) -> Option<SessionIdentity> {
        let session_id = self.ephemeral.get(keys::SESSION_ID)?;
        let raw_start = self.ephemeral.get(keys::SESSION_START)?;
        let started_at = raw_start
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        match started_at {
            Some(started_at) => Some(SessionIdentity {
                session_id,
                started_at,
            }),
            None => {
                warn!(value = %raw_start, "malformed session start, renewing session");
                None
            }
        }
    }

    // ─── First-touch flags ──────────────────────────────────────────────

    pub fn was_shown(&self, flag: &str) -> bool {
        self.durable.get(flag).is_some_and(|v| !v.is_empty())
    }

    pub fn mark_shown(&self, flag: &str) {
        self.put(&*self.durable, flag, "true");
    }

    // ─── Profile & history ──────────────────────────────────────────────

    pub fn visitor_profile(&self) -> Option<VisitorProfile> {
        read_json(&*self.durable, keys::VISITOR_PROFILE)
    }

    /// Count a new visit: bump the visit counter and refresh the last visit
    /// and session reference. The device snapshot and attribution are only
    /// recorded when the profile is first created.
    pub fn record_visit(
        &self,
        session_id: &str,
        device: &DeviceSnapshot,
        utm: &UtmParams,
    ) -> VisitorProfile {
        let now = self.clock.now();
        let mut profile = self.visitor_profile().unwrap_or_else(|| VisitorProfile {
            visitor_id: self.visitor_id(),
            session_id: session_id.to_string(),
            first_visit: now,
            last_visit: now,
            total_visits: 0,
            total_pages_viewed: 0,
            total_time_spent: 0,
            device_info: device.clone(),
            utm_params: utm.clone(),
        });
        profile.last_visit = now;
        profile.total_visits += 1;
        profile.session_id = session_id.to_string();
        self.save_profile(&profile);
        profile
    }

    /// Append to the page history (oldest evicted past the limit) and count
    /// the view on the profile.
    pub fn record_page_view(&self, url: &str) {
        let mut history = self.page_history();
        history.push(PageHistoryEntry {
            url: url.to_string(),
            timestamp: self.clock.now(),
        });
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        if let Err(e) = write_json(&*self.durable, keys::PAGE_HISTORY, &history) {
            warn!(error = %e, "failed to persist page history");
        }

        if let Some(mut profile) = self.visitor_profile() {
            profile.total_pages_viewed += 1;
            self.save_profile(&profile);
        }
    }

    pub fn add_time_spent(&self, ms: u64) {
        if let Some(mut profile) = self.visitor_profile() {
            profile.total_time_spent += ms;
            self.save_profile(&profile);
        }
    }

    pub fn page_history(&self) -> Vec<PageHistoryEntry> {
        read_json(&*self.durable, keys::PAGE_HISTORY).unwrap_or_default()
    }

    fn save_profile(&self, profile: &VisitorProfile) {
        if let Err(e) = write_json(&*self.durable, keys::VISITOR_PROFILE, profile) {
            warn!(error = %e, "failed to persist visitor profile");
        }
    }

    fn put(&self, store: &dyn KeyValueStore, key: &str, value: &str) {
        if let Err(e) = store.set(key, value) {
            warn!(key, error = %e, "failed to persist identity value");
        }
    }
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NavigationContext;
    use storefront_core::{ManualClock, MemoryStore};

    struct Fixture {
        durable: Arc<MemoryStore>,
        ephemeral: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                durable: Arc::new(MemoryStore::new()),
                ephemeral: Arc::new(MemoryStore::new()),
                clock: Arc::new(ManualClock::new(
                    Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap(),
                )),
            }
        }

        fn store(&self) -> IdentityStore {
            IdentityStore::new(
                self.durable.clone(),
                self.ephemeral.clone(),
                self.clock.clone(),
            )
        }
    }

    fn device() -> DeviceSnapshot {
        DeviceSnapshot::capture(&NavigationContext::default())
    }

    #[test]
    fn test_visitor_id_is_idempotent_across_loads() {
        let fx = Fixture::new();
        let first = fx.store().visitor_id();
        assert!(first.starts_with("v_"));
        assert_eq!(fx.store().visitor_id(), first);

        fx.clock.advance_ms(86_400_000);
        assert_eq!(fx.store().visitor_id(), first);
    }

    #[test]
    fn test_session_kept_within_window() {
        let fx = Fixture::new();
        let store = fx.store();
        let first = store.session();

        fx.clock.advance(Duration::minutes(29));
        let second = store.session();
        assert_eq!(second, first);
    }

    #[test]
    fn test_session_renewed_after_timeout() {
        let fx = Fixture::new();
        let store = fx.store();
        let first = store.session();

        fx.clock.advance(Duration::minutes(30) + Duration::milliseconds(1));
        let renewed = store.session();
        assert_ne!(renewed.session_id, first.session_id);
        assert_eq!(renewed.started_at, fx.clock.now());
    }

    #[test]
    fn test_session_window_is_fixed_not_sliding() {
        let fx = Fixture::new();
        let store = fx.store();
        let first = store.session();

        // Frequent reads do not push the expiry out.
        for _ in 0..6 {
            fx.clock.advance(Duration::minutes(5));
            store.session();
        }
        assert_ne!(store.session_id(), first.session_id);
    }

    #[test]
    fn test_cleared_ephemeral_store_starts_new_session() {
        let fx = Fixture::new();
        let first = fx.store().session_id();
        fx.ephemeral.clear();
        assert_ne!(fx.store().session_id(), first);
    }

    #[test]
    fn test_malformed_session_start_renews() {
        let fx = Fixture::new();
        fx.ephemeral.set(keys::SESSION_ID, "s_old").unwrap();
        fx.ephemeral.set(keys::SESSION_START, "yesterday").unwrap();
        assert_ne!(fx.store().session_id(), "s_old");
    }

    #[test]
    fn test_shown_flag() {
        let fx = Fixture::new();
        let store = fx.store();
        assert!(!store.was_shown(keys::CHAT_SHOWN));
        store.mark_shown(keys::CHAT_SHOWN);
        assert!(fx.store().was_shown(keys::CHAT_SHOWN));
    }

    #[test]
    fn test_record_visit_increments() {
        let fx = Fixture::new();
        let store = fx.store();
        let session = store.session_id();

        let first = store.record_visit(&session, &device(), &UtmParams::default());
        assert_eq!(first.total_visits, 1);
        assert_eq!(first.first_visit, first.last_visit);

        fx.clock.advance(Duration::hours(2));
        let second = store.record_visit("s_next", &device(), &UtmParams::default());
        assert_eq!(second.total_visits, 2);
        assert_eq!(second.session_id, "s_next");
        assert_eq!(second.first_visit, first.first_visit);
        assert!(second.last_visit > first.last_visit);
    }

    #[test]
    fn test_corrupt_profile_falls_back_to_fresh() {
        let fx = Fixture::new();
        fx.durable.set(keys::VISITOR_PROFILE, "{broken").unwrap();
        let store = fx.store();
        assert!(store.visitor_profile().is_none());

        let profile = store.record_visit("s_1", &device(), &UtmParams::default());
        assert_eq!(profile.total_visits, 1);
    }

    #[test]
    fn test_page_history_capped_oldest_first() {
        let fx = Fixture::new();
        let store = fx.store().with_history_limit(3);
        store.record_visit("s_1", &device(), &UtmParams::default());

        for i in 0..5 {
            store.record_page_view(&format!("https://shop.example/p/{i}"));
        }

        let history = store.page_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].url, "https://shop.example/p/2");
        assert_eq!(history[2].url, "https://shop.example/p/4");
        assert_eq!(store.visitor_profile().unwrap().total_pages_viewed, 5);
    }

    #[test]
    fn test_time_spent_accumulates() {
        let fx = Fixture::new();
        let store = fx.store();
        store.record_visit("s_1", &device(), &UtmParams::default());
        store.add_time_spent(1_200);
        store.add_time_spent(800);
        assert_eq!(store.visitor_profile().unwrap().total_time_spent, 2_000);
    }
}
