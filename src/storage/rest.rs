use crate::models::{ListingRecord, ListingRow, PreferenceRecord, SeenRecord};
use crate::storage::{ListingStore, PersistenceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const LISTINGS_TABLE: &str = "listings";
const SEEN_TABLE: &str = "seen_listings";
const PREFERENCES_TABLE: &str = "user_preferences";
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";

#[derive(Debug, Deserialize)]
struct SeenIdRow {
    external_id: String,
}

/// Persistence client speaking PostgREST (Supabase's REST layer)
pub struct RestStore {
    client: Client,
    rest_url: String,
    page_size: usize,
}

impl RestStore {
    pub fn new(base_url: &str, service_key: &str, page_size: usize, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(service_key).context("Service key is not a valid header value")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", service_key))
                .context("Service key is not a valid header value")?,
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create persistence HTTP client")?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
            page_size: page_size.max(1),
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, PersistenceError> {
        let response = request.send().await.map_err(|source| PersistenceError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| PersistenceError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(PersistenceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| PersistenceError::Payload {
            endpoint: endpoint.to_string(),
            body,
            source,
        })
    }

    /// Upserts answer with a one-element array when asked for a representation
    async fn upsert_row<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        conflict_key: &str,
        body: &B,
    ) -> Result<T, PersistenceError> {
        let endpoint = self.endpoint(table);
        let request = self
            .client
            .post(&endpoint)
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", UPSERT_PREFER)
            .json(body);

        let rows: Vec<T> = self.send_json(&endpoint, request).await?;
        rows.into_iter()
            .next()
            .ok_or(PersistenceError::Empty { endpoint })
    }
}

/// Pull pages of `page_size` until a short page arrives.
pub async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Vec<T>, PersistenceError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, PersistenceError>>,
{
    let page_size = page_size.max(1);
    let mut all = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(offset, page_size).await?;
        let count = page.len();
        all.extend(page);
        if count < page_size {
            return Ok(all);
        }
        offset += page_size;
    }
}

#[async_trait]
impl ListingStore for RestStore {
    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<ListingRow, PersistenceError> {
        self.upsert_row(LISTINGS_TABLE, "external_id", &ListingRow::from(listing))
            .await
    }

    async fn record_seen(
        &self,
        external_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<SeenRecord, PersistenceError> {
        let record = SeenRecord {
            external_id: external_id.to_string(),
            seen_at,
        };
        self.upsert_row(SEEN_TABLE, "external_id", &record).await
    }

    async fn fetch_active_preferences(&self) -> Result<Vec<PreferenceRecord>, PersistenceError> {
        let endpoint = self.endpoint(PREFERENCES_TABLE);
        let request = self.client.get(&endpoint).query(&[
            ("select", "*"),
            ("is_active", "eq.true"),
            ("order", "updated_at.desc"),
        ]);
        self.send_json(&endpoint, request).await
    }

    async fn fetch_seen_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let endpoint = self.endpoint(SEEN_TABLE);
        let rows: Vec<SeenIdRow> = collect_pages(self.page_size, |offset, limit| {
            let request = self.client.get(&endpoint).query(&[
                ("select", "external_id".to_string()),
                ("order", "seen_at.asc,external_id.asc".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ]);
            debug!("Loading seen ids {}..{}", offset, offset + limit);
            let endpoint = endpoint.clone();
            async move { self.send_json(&endpoint, request).await }
        })
        .await?;

        Ok(rows.into_iter().map(|row| row.external_id).collect())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        info!("Persistence client for {} closed", self.rest_url);
        Ok(())
    }
}
