use crate::config::Settings;
use crate::models::ListingRecord;
use crate::monitoring::change_detector::{ChangeDetector, ChangeDetectorError};
use crate::scrapers::fetcher::{FetchError, Fetcher};
use crate::scrapers::parser::ListingParser;
use crate::scrapers::session::SessionManager;
use crate::storage::ListingStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_SEARCH_ENDPOINTS: [&str; 2] = [
    "https://www.immobilienscout24.de/Suche/de/berlin/berlin/wohnung-mieten",
    "https://www.immobilienscout24.de/Suche/de/berlin/berlin/wohnung-mieten?pricetype=rent&sorting=2",
];

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub endpoints: Vec<String>,
    pub poll_interval: Duration,
}

impl MonitorOptions {
    pub fn new(endpoints: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            endpoints,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::new(
            DEFAULT_SEARCH_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(30),
        )
    }
}

impl From<&Settings> for MonitorOptions {
    fn from(settings: &Settings) -> Self {
        Self::new(settings.endpoints.clone(), settings.poll_interval)
    }
}

/// Summary of one pass over every endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub endpoints: usize,
    pub successes: usize,
    pub new_listings: usize,
    pub avg_latency: Duration,
    pub cycle_latency: Duration,
}

impl CycleReport {
    pub fn success_rate(&self) -> f64 {
        if self.endpoints == 0 {
            0.0
        } else {
            self.successes as f64 / self.endpoints as f64
        }
    }
}

#[derive(Debug, Error)]
enum EndpointError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Detect(#[from] ChangeDetectorError),
    #[error("listing consumer went away")]
    ConsumerGone,
}

/// Polls search endpoints forever and streams listings nobody has seen yet
pub struct Monitor {
    fetcher: Fetcher,
    parser: ListingParser,
    detector: Arc<ChangeDetector>,
    store: Arc<dyn ListingStore>,
    session: Arc<SessionManager>,
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(
        fetcher: Fetcher,
        parser: ListingParser,
        detector: Arc<ChangeDetector>,
        store: Arc<dyn ListingStore>,
        options: MonitorOptions,
    ) -> Self {
        let session = fetcher.session().clone();
        Self {
            fetcher,
            parser,
            detector,
            store,
            session,
            options,
        }
    }

    /// Run cycles until `cancel` fires or `listings` is closed, then release
    /// the detector, the store and the session pool.
    ///
    /// Listings are recorded as seen before they are sent. If the run stops
    /// while a batch is still being sent, the unsent rest of that batch is
    /// lost: it is already marked seen, so a later run skips it as well.
    pub async fn run(self, listings: mpsc::Sender<ListingRecord>, cancel: CancellationToken) {
        info!(
            "Monitoring {} endpoints every {}s",
            self.options.endpoints.len(),
            self.options.poll_interval.as_secs_f64()
        );

        loop {
            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle(&listings) => report,
            };

            match report {
                Some(report) => log_report(&report),
                None => {
                    info!("Listing consumer closed, stopping monitor");
                    break;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// One pass over the endpoints, in order.
    ///
    /// Returns `None` when the consumer dropped its receiver.
    pub async fn run_cycle(&self, listings: &mpsc::Sender<ListingRecord>) -> Option<CycleReport> {
        let started = Instant::now();
        let mut successes = 0;
        let mut new_listings = 0;
        let mut latencies = Vec::new();

        for url in &self.options.endpoints {
            let request_started = Instant::now();
            match self.poll_endpoint(url, listings).await {
                Ok(count) => {
                    successes += 1;
                    new_listings += count;
                    latencies.push(request_started.elapsed());
                }
                Err(EndpointError::ConsumerGone) => return None,
                Err(e) => warn!("Monitor failed for {}: {}", url, e),
            }
        }

        let avg_latency = if latencies.is_empty() {
            Duration::ZERO
        } else {
            latencies.iter().sum::<Duration>() / latencies.len() as u32
        };

        Some(CycleReport {
            endpoints: self.options.endpoints.len(),
            successes,
            new_listings,
            avg_latency,
            cycle_latency: started.elapsed(),
        })
    }

    async fn poll_endpoint(
        &self,
        url: &str,
        listings: &mpsc::Sender<ListingRecord>,
    ) -> Result<usize, EndpointError> {
        let html = self.fetcher.fetch(url).await?;
        let parsed = self.parser.parse(&html);
        debug!("Parsed {} listings from {}", parsed.len(), url);

        let fresh = self.detector.filter_new(parsed).await?;
        let count = fresh.len();
        for listing in fresh {
            listings
                .send(listing)
                .await
                .map_err(|_| EndpointError::ConsumerGone)?;
        }
        Ok(count)
    }

    async fn shutdown(&self) {
        self.detector.close().await;
        if let Err(e) = self.store.close().await {
            warn!("Failed to close persistence client: {}", e);
        }
        self.session.close().await;
        info!("Monitor stopped");
    }
}

fn log_report(report: &CycleReport) {
    info!(
        "Monitor cycle complete: endpoints={} success_rate={:.2} new_listings={} avg_latency={:.2}s total_latency={:.2}s",
        report.endpoints,
        report.success_rate(),
        report.new_listings,
        report.avg_latency.as_secs_f64(),
        report.cycle_latency.as_secs_f64()
    );
}
