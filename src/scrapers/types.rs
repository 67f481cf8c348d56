use crate::config::Settings;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Options for building the session pool
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Proxy endpoints, assigned to pool slots round-robin
    pub proxies: Vec<String>,
    /// Desired number of pooled clients
    pub concurrency: usize,
    /// Fixed per-request timeout
    pub timeout: Duration,
    /// Attempts per request before giving up
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in seconds
    pub backoff_base_seconds: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            concurrency: 3,
            timeout: Duration::from_secs(20),
            max_attempts: 5,
            backoff_base_seconds: 120.0,
        }
    }
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            proxies: settings.proxy_list.clone(),
            concurrency: settings.concurrency,
            timeout: settings.request_timeout,
            max_attempts: settings.session_max_attempts,
            backoff_base_seconds: settings.backoff_base_seconds,
        }
    }
}

/// Options for the page fetcher's own retry layer
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_attempts: u32,
    pub backoff_base_seconds: f64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_seconds: 120.0,
        }
    }
}

impl From<&Settings> for FetchOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.fetch_max_attempts,
            backoff_base_seconds: settings.backoff_base_seconds,
        }
    }
}

/// A fully prepared request handed to one pool slot
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

/// Response with the body still in its transfer encoding
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Failure below the HTTP status level
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}
