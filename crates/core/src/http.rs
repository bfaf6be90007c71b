//! HTTP seam shared by the collector and chat clients.
//!
//! [`ReqwestSender`] is the production transport; [`CaptureSender`] records
//! requests and replays scripted responses for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{TelemetryError, TelemetryResult};

#[async_trait]
pub trait HttpSender: Send + Sync {
    /// POST a JSON body. Any non-2xx status is an error.
    async fn post_json(&self, path: &str, body: &Value) -> TelemetryResult<()>;

    /// GET and decode a JSON body.
    async fn get_json(&self, path: &str) -> TelemetryResult<Value>;

    /// Fire-and-forget POST that must not block the caller and may outlive
    /// it. No delivery confirmation.
    fn beacon(&self, path: &str, body: Value);
}

// ─── reqwest ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestSender {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TelemetryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post_json(&self, path: &str, body: &Value) -> TelemetryResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| TelemetryError::transport(format!("POST {path} failed: {e}")))?;

        let status = response.status();
        debug!(path, status = %status, "POST completed");
        if status.is_success() {
            Ok(())
        } else {
            Err(TelemetryError::status(
                status.as_u16(),
                format!("POST {path} rejected"),
            ))
        }
    }

    async fn get_json(&self, path: &str) -> TelemetryResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| TelemetryError::transport(format!("GET {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::status(
                status.as_u16(),
                format!("GET {path} rejected"),
            ));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| TelemetryError::transport(format!("GET {path} returned bad JSON: {e}")))
    }

    fn beacon(&self, path: &str, body: Value) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(path, "no async runtime, beacon dropped");
            return;
        };
        let request = self.client.post(self.url(path)).json(&body);
        let path = path.to_string();
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                debug!(path = %path, error = %e, "beacon failed");
            }
        });
    }
}

// ─── capture ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Post,
    Get,
    Beacon,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: RequestMethod,
    pub path: String,
    pub body: Option<Value>,
}

/// In-memory sender that records every request. Paths can be scripted to
/// fail, and GET paths can be given a queue of responses.
#[derive(Default)]
pub struct CaptureSender {
    requests: Mutex<Vec<RecordedRequest>>,
    failing_paths: Mutex<HashSet<String>>,
    offline: AtomicBool,
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
}

impl CaptureSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().insert(path.to_string());
    }

    pub fn restore_path(&self, path: &str) {
        self.failing_paths.lock().remove(path);
    }

    /// Queue a response for the next GET of `path`.
    pub fn push_response(&self, path: &str, body: Value) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(body);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Bodies sent to `path`, in order, over any method.
    pub fn bodies(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .filter_map(|r| r.body.clone())
            .collect()
    }

    pub fn count(&self, method: RequestMethod, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }

    fn check(&self, path: &str) -> TelemetryResult<()> {
        if self.offline.load(Ordering::SeqCst) || self.failing_paths.lock().contains(path) {
            return Err(TelemetryError::transport(format!("{path} unreachable")));
        }
        Ok(())
    }

    fn record(&self, method: RequestMethod, path: &str, body: Option<Value>) {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
    }
}

#[async_trait]
impl HttpSender for CaptureSender {
    async fn post_json(&self, path: &str, body: &Value) -> TelemetryResult<()> {
        self.record(RequestMethod::Post, path, Some(body.clone()));
        self.check(path)
    }

    async fn get_json(&self, path: &str) -> TelemetryResult<Value> {
        self.record(RequestMethod::Get, path, None);
        self.check(path)?;
        self.responses
            .lock()
            .get_mut(path)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| TelemetryError::status(404, format!("no response scripted for {path}")))
    }

    fn beacon(&self, path: &str, body: Value) {
        self.record(RequestMethod::Beacon, path, Some(body));
    }
}
