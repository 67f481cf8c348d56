use crate::scrapers::backoff::Backoff;
use crate::scrapers::traits::{Sleeper, TokioSleeper, Transport};
use crate::scrapers::types::{OutboundRequest, PageResponse, SessionOptions, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Proxy, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Statuses worth another attempt, typically rate limiting or a flaky upstream
pub const RETRYABLE_STATUSES: [u16; 9] = [403, 408, 409, 425, 429, 500, 502, 503, 504];

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
];

/// Last thing that went wrong before the session gave up
#[derive(Debug, Error)]
pub enum LastFailure {
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),
    #[error("retryable status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{method} {url} failed after {attempts} attempts")]
    Exhausted {
        method: Method,
        url: String,
        attempts: u32,
        #[source]
        last: LastFailure,
    },
    #[error("session manager is closed")]
    Closed,
}

pub fn is_retryable(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Browser-like headers sent with every request
pub fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,de-DE;q=0.8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// One pooled reqwest client, optionally routed through a proxy
pub struct ClientSlot {
    index: usize,
    proxy: Option<String>,
    client: Client,
}

impl ClientSlot {
    pub fn build(index: usize, proxy: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(60))
            .default_headers(base_headers());

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).with_context(|| format!("Invalid proxy address {}", proxy))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            index,
            proxy: proxy.map(str::to_string),
            client,
        })
    }
}

#[async_trait]
impl Transport for ClientSlot {
    async fn execute(&self, request: OutboundRequest) -> Result<PageResponse, TransportError> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .send()
            .await?;

        let url = response.url().to_string();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(PageResponse {
            url,
            status,
            headers,
            body,
        })
    }

    fn label(&self) -> String {
        match &self.proxy {
            Some(proxy) => format!("client-{} via {}", self.index, proxy),
            None => format!("client-{} direct", self.index),
        }
    }
}

/// Pool of HTTP clients with identity rotation and retrying requests
pub struct SessionManager {
    slots: RwLock<Vec<Arc<dyn Transport>>>,
    next_slot: Mutex<usize>,
    next_agent: Mutex<usize>,
    max_attempts: u32,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl SessionManager {
    /// Build `max(concurrency, proxies, 1)` reqwest clients
    pub fn new(options: SessionOptions) -> Result<Self> {
        let size = options.concurrency.max(options.proxies.len()).max(1);
        let mut slots: Vec<Arc<dyn Transport>> = Vec::with_capacity(size);

        for index in 0..size {
            let proxy = if options.proxies.is_empty() {
                None
            } else {
                Some(options.proxies[index % options.proxies.len()].as_str())
            };
            let slot = ClientSlot::build(index, proxy, options.timeout)?;
            debug!("Created {}", slot.label());
            slots.push(Arc::new(slot));
        }

        info!(
            "Session pool ready: {} clients, {} proxies",
            size,
            options.proxies.len()
        );

        Ok(Self::with_transports(
            slots,
            options.max_attempts,
            Backoff::for_session(options.backoff_base_seconds),
        ))
    }

    /// Build a manager over caller-supplied transports
    pub fn with_transports(slots: Vec<Arc<dyn Transport>>, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            slots: RwLock::new(slots),
            next_slot: Mutex::new(0),
            next_agent: Mutex::new(0),
            max_attempts: max_attempts.max(1),
            backoff,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub async fn pool_size(&self) -> usize {
        self.slots.read().await.len()
    }

    #[cfg(test)]
    async fn slot_labels(&self) -> Vec<String> {
        self.slots.read().await.iter().map(|slot| slot.label()).collect()
    }

    pub async fn get(&self, url: &str) -> Result<PageResponse, SessionError> {
        self.request(Method::GET, url, None, None).await
    }

    pub async fn head(&self, url: &str) -> Result<PageResponse, SessionError> {
        self.request(Method::HEAD, url, None, None).await
    }

    /// Send a request, rotating client and user agent on every attempt.
    ///
    /// Transport errors and [`RETRYABLE_STATUSES`] are retried with backoff;
    /// any other status is handed back untouched.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: Option<&HeaderMap>,
        max_attempts: Option<u32>,
    ) -> Result<PageResponse, SessionError> {
        let attempts = max_attempts.unwrap_or(self.max_attempts).max(1);
        let mut attempt = 0;

        loop {
            let slot = self.next_transport().await?;
            let request = OutboundRequest {
                method: method.clone(),
                url: url.to_string(),
                headers: self.build_headers(headers).await,
            };

            let failure = match slot.execute(request).await {
                Ok(response) if !is_retryable(response.status) => return Ok(response),
                Ok(response) => {
                    info!(
                        "Retrying {} {} due to HTTP {} on {} (attempt {}/{})",
                        method,
                        url,
                        response.status.as_u16(),
                        slot.label(),
                        attempt + 1,
                        attempts
                    );
                    LastFailure::Status(response.status)
                }
                Err(e) => {
                    warn!(
                        "HTTP error during {} {} on {} (attempt {}/{}): {}",
                        method,
                        url,
                        slot.label(),
                        attempt + 1,
                        attempts,
                        e
                    );
                    LastFailure::Transport(e)
                }
            };

            if attempt + 1 >= attempts {
                return Err(SessionError::Exhausted {
                    method,
                    url: url.to_string(),
                    attempts,
                    last: failure,
                });
            }

            let delay = self.backoff.delay(attempt);
            debug!("Backing off {:.2}s before next attempt", delay.as_secs_f64());
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Drop every pooled client; later requests fail with [`SessionError::Closed`].
    pub async fn close(&self) {
        let released = std::mem::take(&mut *self.slots.write().await);
        info!("Session manager closed, released {} clients", released.len());
    }

    async fn next_transport(&self) -> Result<Arc<dyn Transport>, SessionError> {
        let slots = self.slots.read().await;
        if slots.is_empty() {
            return Err(SessionError::Closed);
        }
        let mut index = self.next_slot.lock().await;
        let slot = slots[*index % slots.len()].clone();
        *index = (*index + 1) % slots.len();
        Ok(slot)
    }

    async fn build_headers(&self, extra: Option<&HeaderMap>) -> HeaderMap {
        let user_agent = {
            let mut cursor = self.next_agent.lock().await;
            let agent = USER_AGENTS[*cursor];
            *cursor = (*cursor + 1) % USER_AGENTS.len();
            agent
        };

        let mut headers = base_headers();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(user_agent));
        if let Some(extra) = extra {
            for (name, value) in extra {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }
}
