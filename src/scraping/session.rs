use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{DiscoveryError, Result};

/// Transport seam. Production uses [`HttpFetcher`]; tests serve fixtures.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> anyhow::Result<String>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .context("unable to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;
        let response = response
            .error_for_status()
            .with_context(|| format!("non-success status for {url}"))?;
        response
            .text()
            .await
            .with_context(|| format!("unable to read response body for {url}"))
    }
}

#[derive(Debug, Default)]
struct SessionCounts {
    open: AtomicUsize,
    peak: AtomicUsize,
}

/// Shared count of open page sessions. Cloning shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    counts: Arc<SessionCounts>,
}

impl SessionTracker {
    pub fn open(&self) -> usize {
        self.counts.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions seen so far.
    pub fn peak(&self) -> usize {
        self.counts.peak.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        let now = self.counts.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counts.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.counts.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A page session scoped to one preview or scrape call. Released on drop,
/// including when the call fails part-way.
pub struct Session<'a> {
    fetcher: &'a dyn PageFetcher,
    tracker: &'a SessionTracker,
    venue: &'a str,
    timeout: Duration,
    detail_timeout: Duration,
    detail: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn open(
        fetcher: &'a dyn PageFetcher,
        tracker: &'a SessionTracker,
        venue: &'a str,
        timeout: Duration,
        detail_timeout: Duration,
    ) -> Self {
        tracker.acquire();
        debug!(venue, open = tracker.open(), "session opened");
        Self {
            fetcher,
            tracker,
            venue,
            timeout,
            detail_timeout,
            detail: false,
        }
    }

    /// Short-lived session for a single detail page, bounded by the detail timeout.
    pub fn sub_context(&self) -> Session<'a> {
        self.tracker.acquire();
        Session {
            fetcher: self.fetcher,
            tracker: self.tracker,
            venue: self.venue,
            timeout: self.detail_timeout,
            detail_timeout: self.detail_timeout,
            detail: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn load(&self, url: &str) -> Result<String> {
        let fetched = tokio::time::timeout(self.timeout, self.fetcher.fetch(url, self.timeout))
            .await
            .map_err(|_| {
                DiscoveryError::unavailable(
                    self.venue,
                    format!("timed out after {}ms loading {url}", self.timeout.as_millis()),
                )
            })?;
        fetched.map_err(|err| DiscoveryError::unavailable(self.venue, format!("{err:#}")))
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.tracker.release();
        if !self.detail {
            debug!(venue = self.venue, open = self.tracker.open(), "session closed");
        }
    }
}
