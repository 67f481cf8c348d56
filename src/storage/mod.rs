pub mod rest;

pub use rest::RestStore;

use crate::models::{ListingRecord, ListingRow, PreferenceRecord, SeenRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure talking to the persistence service.
/// Every variant names the endpoint so logs can be traced back.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("{endpoint} returned a malformed payload ({source}): {body}")]
    Payload {
        endpoint: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint} returned no rows")]
    Empty { endpoint: String },
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Durable storage for listings, seen ids and user preferences
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Insert or update a listing keyed by its external id
    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<ListingRow, PersistenceError>;

    /// Mark an id as seen; repeated calls overwrite the timestamp
    async fn record_seen(
        &self,
        external_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<SeenRecord, PersistenceError>;

    /// Active preferences, most recently updated first
    async fn fetch_active_preferences(&self) -> Result<Vec<PreferenceRecord>, PersistenceError>;

    /// Every id ever recorded as seen
    async fn fetch_seen_ids(&self) -> Result<Vec<String>, PersistenceError>;

    async fn close(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
