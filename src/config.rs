use crate::monitoring::monitor::{DEFAULT_SEARCH_ENDPOINTS, MIN_POLL_INTERVAL};
use crate::scrapers::backoff::MAX_BASE_SECONDS;
use crate::scrapers::parser::DEFAULT_BASE_URL;
use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub proxy_list: Vec<String>,
    pub poll_interval: Duration,
    pub backoff_base_seconds: f64,
    pub concurrency: usize,
    pub session_max_attempts: u32,
    pub fetch_max_attempts: u32,
    pub request_timeout: Duration,
    pub endpoints: Vec<String>,
    pub listing_base_url: String,
    pub seen_page_size: usize,
    pub preload_seen: bool,
    pub upsert_listings: bool,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "service-role-key-placeholder".to_string(),
            proxy_list: Vec::new(),
            poll_interval: Duration::from_secs(30),
            backoff_base_seconds: 120.0,
            concurrency: 3,
            session_max_attempts: 5,
            fetch_max_attempts: 3,
            request_timeout: Duration::from_secs(20),
            endpoints: DEFAULT_SEARCH_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            listing_base_url: DEFAULT_BASE_URL.to_string(),
            seen_page_size: 500,
            preload_seen: true,
            upsert_listings: true,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let poll_seconds: f64 = parse_or(get("MONITOR_POLL_INTERVAL_SECONDS"), "MONITOR_POLL_INTERVAL_SECONDS", 30.0)?;
        let timeout_seconds: f64 = parse_or(get("REQUEST_TIMEOUT_SECONDS"), "REQUEST_TIMEOUT_SECONDS", 20.0)?;
        let poll_interval = Duration::try_from_secs_f64(poll_seconds)
            .context("MONITOR_POLL_INTERVAL_SECONDS must be a non-negative number of seconds")?
            .max(MIN_POLL_INTERVAL);
        let request_timeout = Duration::try_from_secs_f64(timeout_seconds)
            .ok()
            .filter(|t| !t.is_zero())
            .context("REQUEST_TIMEOUT_SECONDS must be a positive number of seconds")?;

        let backoff_base_seconds: f64 =
            parse_or(get("MONITOR_BACKOFF_BASE_SECONDS"), "MONITOR_BACKOFF_BASE_SECONDS", defaults.backoff_base_seconds)?;
        if !(0.0..=MAX_BASE_SECONDS).contains(&backoff_base_seconds) {
            bail!(
                "MONITOR_BACKOFF_BASE_SECONDS must be between 0 and {}, got {}",
                MAX_BASE_SECONDS,
                backoff_base_seconds
            );
        }

        let endpoints = match get("MONITOR_ENDPOINTS") {
            Some(raw) => split_list(&raw),
            None => defaults.endpoints,
        };
        if endpoints.is_empty() {
            bail!("MONITOR_ENDPOINTS must name at least one search page");
        }

        Ok(Self {
            supabase_url: get("SUPABASE_URL").unwrap_or(defaults.supabase_url),
            supabase_service_key: get("SUPABASE_SERVICE_KEY").unwrap_or(defaults.supabase_service_key),
            proxy_list: get("PROXY_LIST").map(|raw| parse_proxy_list(&raw)).unwrap_or_default(),
            poll_interval,
            backoff_base_seconds,
            concurrency: parse_or(get("MONITOR_CONCURRENCY"), "MONITOR_CONCURRENCY", defaults.concurrency)?,
            session_max_attempts: parse_or(get("SESSION_MAX_ATTEMPTS"), "SESSION_MAX_ATTEMPTS", defaults.session_max_attempts)?,
            fetch_max_attempts: parse_or(get("FETCH_MAX_ATTEMPTS"), "FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts)?,
            request_timeout,
            endpoints,
            listing_base_url: get("LISTING_BASE_URL").unwrap_or(defaults.listing_base_url),
            seen_page_size: parse_or(get("SEEN_PAGE_SIZE"), "SEEN_PAGE_SIZE", defaults.seen_page_size)?,
            preload_seen: parse_flag(get("PRELOAD_SEEN"), "PRELOAD_SEEN", defaults.preload_seen)?,
            upsert_listings: parse_flag(get("UPSERT_LISTINGS"), "UPSERT_LISTINGS", defaults.upsert_listings)?,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    pub fn has_proxies(&self) -> bool {
        !self.proxy_list.is_empty()
    }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", name, raw)),
        None => Ok(default),
    }
}

fn parse_flag(raw: Option<String>, name: &str, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => bail!("{} must be a boolean, got {:?}", name, other),
    }
}

/// Accepts a JSON array or a comma separated list
fn parse_proxy_list(raw: &str) -> Vec<String> {
    if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        return items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect();
    }
    split_list(raw)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.poll_interval, Duration::from_secs(30));
        assert_eq!(s.backoff_base_seconds, 120.0);
        assert_eq!(s.session_max_attempts, 5);
        assert_eq!(s.fetch_max_attempts, 3);
        assert_eq!(s.endpoints.len(), 2);
        assert!(!s.has_proxies());
    }

    #[test]
    fn proxy_list_accepts_json_and_csv() {
        let s = settings(&[("PROXY_LIST", r#"["http://a:1", " http://b:2 ", ""]"#)]).unwrap();
        assert_eq!(s.proxy_list, vec!["http://a:1", "http://b:2"]);

        let s = settings(&[("PROXY_LIST", "http://a:1, ,http://b:2")]).unwrap();
        assert_eq!(s.proxy_list, vec!["http://a:1", "http://b:2"]);
    }

    #[test]
    fn poll_interval_is_floored() {
        let s = settings(&[("MONITOR_POLL_INTERVAL_SECONDS", "1")]).unwrap();
        assert_eq!(s.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let s = settings(&[("SUPABASE_URL", "   "), ("PRELOAD_SEEN", "")]).unwrap();
        assert_eq!(s.supabase_url, "http://localhost:54321");
        assert!(s.preload_seen);
    }

    #[test]
    fn invalid_numbers_are_fatal() {
        let err = settings(&[("FETCH_MAX_ATTEMPTS", "three")]).unwrap_err();
        assert!(err.to_string().contains("FETCH_MAX_ATTEMPTS"));
        assert!(settings(&[("PRELOAD_SEEN", "maybe")]).is_err());
        assert!(settings(&[("REQUEST_TIMEOUT_SECONDS", "0")]).is_err());
        assert!(settings(&[("MONITOR_POLL_INTERVAL_SECONDS", "-3")]).is_err());
    }

    #[test]
    fn blank_service_key_uses_placeholder() {
        let s = settings(&[("SUPABASE_SERVICE_KEY", "  ")]).unwrap();
        assert_eq!(s.supabase_service_key, Settings::default().supabase_service_key);
        let s = settings(&[("SUPABASE_SERVICE_KEY", " secret ")]).unwrap();
        assert_eq!(s.supabase_service_key, "secret");
    }

    #[test]
    fn backoff_base_is_bounded() {
        let s = settings(&[("MONITOR_BACKOFF_BASE_SECONDS", "86400")]).unwrap();
        assert_eq!(s.backoff_base_seconds, MAX_BASE_SECONDS);

        let err = settings(&[("MONITOR_BACKOFF_BASE_SECONDS", "1e20")]).unwrap_err();
        assert!(err.to_string().contains("MONITOR_BACKOFF_BASE_SECONDS"));
        assert!(settings(&[("MONITOR_BACKOFF_BASE_SECONDS", "-1")]).is_err());
        assert!(settings(&[("MONITOR_BACKOFF_BASE_SECONDS", "NaN")]).is_err());
        assert!(settings(&[("MONITOR_BACKOFF_BASE_SECONDS", "inf")]).is_err());
    }

    #[test]
    fn endpoints_from_env() {
        let s = settings(&[("MONITOR_ENDPOINTS", "https://a.test/1,https://a.test/2")]).unwrap();
        assert_eq!(s.endpoints, vec!["https://a.test/1", "https://a.test/2"]);
    }
}
