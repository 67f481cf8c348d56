use crate::scrapers::backoff::Backoff;
use crate::scrapers::decode::{decode_body, BrotliSupport, DecodeError};
use crate::scrapers::session::{SessionError, SessionManager};
use crate::scrapers::traits::{Sleeper, TokioSleeper};
use crate::scrapers::types::FetchOptions;
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single fetch attempt failed
#[derive(Debug, Error)]
pub enum FetchAttemptError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {url} after {attempts} attempts")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: FetchAttemptError,
    },
}

/// Retrieves search pages as text, retrying on top of the session layer
pub struct Fetcher {
    session: Arc<SessionManager>,
    max_attempts: u32,
    backoff: Backoff,
    brotli: BrotliSupport,
    sleeper: Arc<dyn Sleeper>,
}

impl Fetcher {
    pub fn new(session: Arc<SessionManager>, options: FetchOptions) -> Self {
        Self {
            session,
            max_attempts: options.max_attempts.max(1),
            backoff: Backoff::for_fetch(options.backoff_base_seconds),
            brotli: BrotliSupport::detect(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_brotli(mut self, brotli: BrotliSupport) -> Self {
        self.brotli = brotli;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Fetch one page and return its decoded markup
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 1;

        loop {
            let failure = match self.fetch_once(url).await {
                Ok(text) => {
                    debug!("Downloaded {} bytes of HTML from {}", text.len(), url);
                    return Ok(text);
                }
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: self.max_attempts,
                    last: failure,
                });
            }

            let delay = self.backoff.delay(attempt - 1);
            warn!(
                "Fetch retry {}/{} for {} due to {}; sleeping {:.2}s",
                attempt,
                self.max_attempts,
                url,
                failure,
                delay.as_secs_f64()
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchAttemptError> {
        let response = self.session.get(url).await?;
        if !response.status.is_success() {
            return Err(FetchAttemptError::Status(response.status));
        }
        Ok(decode_body(&response, self.brotli)?)
    }
}
