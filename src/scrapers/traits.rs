use crate::scrapers::types::{OutboundRequest, PageResponse, TransportError};
use async_trait::async_trait;
use std::time::Duration;

/// One pooled way of putting a request on the wire.
/// The session manager only talks to its slots through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request once, no retries
    async fn execute(&self, request: OutboundRequest) -> Result<PageResponse, TransportError>;

    /// Short label for logs, e.g. the proxy in use
    fn label(&self) -> String;
}

/// Where retry layers wait out their backoff
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
