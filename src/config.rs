use std::{collections::HashSet, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::VenueConfig;

const DEFAULT_USER_AGENT: &str = concat!("show-discovery/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub page_load_timeout_secs: u64,
    pub data_ready_timeout_secs: u64,
    pub detail_timeout_secs: u64,
    pub poll_interval_millis: u64,
    pub venue_concurrency: usize,
    pub detail_concurrency: usize,
    pub user_agent: String,
    pub import_endpoint: Option<String>,
    pub import_api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_secs: 45,
            data_ready_timeout_secs: 30,
            detail_timeout_secs: 15,
            poll_interval_millis: 1000,
            venue_concurrency: 3,
            detail_concurrency: 8,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            import_endpoint: None,
            import_api_key: None,
        }
    }
}

/// The three timeout granularities plus the data-ready poll cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub page_load: Duration,
    pub data_ready: Duration,
    pub detail: Duration,
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        EngineConfig::default().timeouts()
    }
}

impl EngineConfig {
    /// Reads the config file when it exists, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("unable to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config.clamped())
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SHOW_DISCOVERY_IMPORT_URL") {
            self.import_endpoint = Some(url);
        }
        if let Ok(key) = std::env::var("SHOW_DISCOVERY_IMPORT_KEY") {
            self.import_api_key = Some(key);
        }
        if let Ok(agent) = std::env::var("SHOW_DISCOVERY_USER_AGENT") {
            self.user_agent = agent;
        }
    }

    pub fn clamped(mut self) -> Self {
        self.venue_concurrency = self.venue_concurrency.max(1);
        self.detail_concurrency = self.detail_concurrency.max(1);
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            page_load: Duration::from_secs(self.page_load_timeout_secs),
            data_ready: Duration::from_secs(self.data_ready_timeout_secs),
            detail: Duration::from_secs(self.detail_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_millis),
        }
    }
}

/// Static venue input, looked up by slug.
#[derive(Debug, Clone, Default)]
pub struct VenueRoster {
    venues: Vec<VenueConfig>,
}

impl VenueRoster {
    pub fn new(venues: Vec<VenueConfig>) -> Result<Self> {
        let mut seen = HashSet::new();
        for venue in &venues {
            if !seen.insert(venue.slug.as_str()) {
                return Err(anyhow!("duplicate venue slug: {}", venue.slug));
            }
        }
        Ok(Self { venues })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let venues: Vec<VenueConfig> =
            serde_json::from_str(raw).context("venue roster is not a list of venues")?;
        Self::new(venues)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read venue roster {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn find(&self, slug: &str) -> Option<&VenueConfig> {
        self.venues.iter().find(|venue| venue.slug == slug)
    }

    pub fn venues(&self) -> &[VenueConfig] {
        &self.venues
    }

    pub fn slugs(&self) -> Vec<String> {
        self.venues.iter().map(|venue| venue.slug.clone()).collect()
    }
}
