use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::NaiveDate;

use super::session::PageFetcher;
use super::ScrapeContext;
use crate::config::Timeouts;
use crate::models::{SourceFamily, VenueConfig};

#[derive(Clone)]
enum Fixture {
    Page(String),
    Fail(String),
    Slow(Duration, String),
    /// Served in order per hit; the last body repeats.
    Sequence(Vec<String>),
}

/// In-memory fetcher that serves, fails, or delays per URL. Unknown URLs 404.
#[derive(Default)]
pub(crate) struct FixtureFetcher {
    fixtures: Mutex<HashMap<String, Fixture>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl FixtureFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with(self, url: &str, fixture: Fixture) -> Self {
        self.fixtures
            .lock()
            .expect("fixtures lock")
            .insert(url.to_string(), fixture);
        self
    }

    pub(crate) fn page(self, url: &str, body: &str) -> Self {
        self.with(url, Fixture::Page(body.to_string()))
    }

    pub(crate) fn failing(self, url: &str, reason: &str) -> Self {
        self.with(url, Fixture::Fail(reason.to_string()))
    }

    pub(crate) fn slow(self, url: &str, delay: Duration, body: &str) -> Self {
        self.with(url, Fixture::Slow(delay, body.to_string()))
    }

    pub(crate) fn sequence(self, url: &str, bodies: &[&str]) -> Self {
        let bodies = bodies.iter().map(|body| body.to_string()).collect();
        self.with(url, Fixture::Sequence(bodies))
    }

    pub(crate) fn hits(&self, url: &str) -> usize {
        self.hits
            .lock()
            .expect("hits lock")
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> anyhow::Result<String> {
        let hit = {
            let mut hits = self.hits.lock().expect("hits lock");
            let count = hits.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let fixture = self.fixtures.lock().expect("fixtures lock").get(url).cloned();
        match fixture {
            Some(Fixture::Page(body)) => Ok(body),
            Some(Fixture::Fail(reason)) => Err(anyhow!("{reason} for {url}")),
            Some(Fixture::Slow(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Some(Fixture::Sequence(bodies)) => bodies
                .get(hit - 1)
                .or_else(|| bodies.last())
                .cloned()
                .ok_or_else(|| anyhow!("empty sequence for {url}")),
            None => Err(anyhow!("404 Not Found for {url}")),
        }
    }
}

pub(crate) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 1).expect("fixture today")
}

pub(crate) fn timeouts() -> Timeouts {
    Timeouts {
        page_load: Duration::from_secs(2),
        data_ready: Duration::from_millis(400),
        detail: Duration::from_millis(150),
        poll_interval: Duration::from_millis(20),
    }
}

pub(crate) fn context(fetcher: Arc<FixtureFetcher>) -> ScrapeContext {
    ScrapeContext::new(fetcher, timeouts(), 3).with_today(today())
}

pub(crate) fn venue(slug: &str, family: SourceFamily, url: &str) -> VenueConfig {
    VenueConfig {
        slug: slug.to_string(),
        display_name: slug.replace('-', " "),
        source_family: family,
        source_url: url.to_string(),
        city: "Boise".to_string(),
        state: "ID".to_string(),
        timezone: Some("America/Boise".to_string()),
    }
}
