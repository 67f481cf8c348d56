//! In-memory doubles for the network seams, shared by unit tests.

use crate::models::{ListingRecord, ListingRow, PreferenceRecord, SeenRecord};
use crate::scrapers::traits::{Sleeper, Transport};
use crate::scrapers::types::{OutboundRequest, PageResponse, TransportError};
use crate::storage::{ListingStore, PersistenceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted outcome of a transport call
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    Body(u16, String),
    Encoded(u16, &'static str, Vec<u8>),
    Fail(String),
}

impl Step {
    fn into_result(self, url: &str) -> Result<PageResponse, TransportError> {
        let (status, headers, body) = match self {
            Step::Status(status) => (status, HeaderMap::new(), Vec::new()),
            Step::Body(status, body) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
                (status, headers, body.into_bytes())
            }
            Step::Encoded(status, encoding, body) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
                (status, headers, body)
            }
            Step::Fail(message) => return Err(TransportError::Other(message)),
        };
        Ok(PageResponse {
            url: url.to_string(),
            status: StatusCode::from_u16(status).expect("valid status"),
            headers,
            body,
        })
    }
}

/// Replays steps in order, then repeats the fallback if any
pub struct ScriptedTransport {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok(name: &str, body: &str) -> Self {
        Self {
            fallback: Some(Step::Body(200, body.to_string())),
            ..Self::new(name, Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<PageResponse, TransportError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Step::Fail("script exhausted".to_string()));
        step.into_result(&url)
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

/// Answers by URL; unknown URLs get a 404
#[derive(Default)]
pub struct RoutedTransport {
    routes: Mutex<HashMap<String, Step>>,
    calls: AtomicUsize,
}

impl RoutedTransport {
    pub fn route(&self, url: &str, step: Step) {
        self.routes.lock().unwrap().insert(url.to_string(), step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RoutedTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<PageResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .routes
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or(Step::Status(404));
        step.into_result(&request.url)
    }

    fn label(&self) -> String {
        "routed".to_string()
    }
}

/// Records requested delays without waiting
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Persistence double keeping everything in memory
#[derive(Default)]
pub struct MemoryStore {
    pub preloaded: Mutex<Vec<String>>,
    pub seen: Mutex<Vec<SeenRecord>>,
    pub listings: Mutex<Vec<ListingRecord>>,
    pub preferences: Mutex<Vec<PreferenceRecord>>,
    pub fail_preload: Mutex<bool>,
    pub fail_ids: Mutex<HashSet<String>>,
    pub preload_calls: AtomicUsize,
    pub closed: Mutex<bool>,
}

impl MemoryStore {
    pub fn with_seen(ids: &[&str]) -> Self {
        let store = Self::default();
        *store.preloaded.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        store
    }

    pub fn fail_on(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn recover(&self) {
        self.fail_ids.lock().unwrap().clear();
    }

    pub fn recorded_ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.external_id.clone())
            .collect()
    }
}

fn unavailable(endpoint: &str) -> PersistenceError {
    PersistenceError::Status {
        endpoint: endpoint.to_string(),
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<ListingRow, PersistenceError> {
        let mut listings = self.listings.lock().unwrap();
        listings.retain(|l| l.external_id != listing.external_id);
        listings.push(listing.clone());
        Ok(ListingRow::from(listing))
    }

    async fn record_seen(
        &self,
        external_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<SeenRecord, PersistenceError> {
        tokio::task::yield_now().await;
        if self.fail_ids.lock().unwrap().contains(external_id) {
            return Err(unavailable("memory://seen_listings"));
        }
        let record = SeenRecord {
            external_id: external_id.to_string(),
            seen_at,
        };
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|r| r.external_id != external_id);
        seen.push(record.clone());
        Ok(record)
    }

    async fn fetch_active_preferences(&self) -> Result<Vec<PreferenceRecord>, PersistenceError> {
        let mut active: Vec<PreferenceRecord> = self
            .preferences
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(active)
    }

    async fn fetch_seen_ids(&self) -> Result<Vec<String>, PersistenceError> {
        self.preload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if *self.fail_preload.lock().unwrap() {
            return Err(unavailable("memory://seen_listings"));
        }
        Ok(self.preloaded.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}
