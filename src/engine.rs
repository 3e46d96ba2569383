use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, instrument, warn};

use crate::config::{EngineConfig, VenueRoster};
use crate::error::{DiscoveryError, Result};
use crate::executor::BatchExecutor;
use crate::models::{BatchPreviewResult, DiscoveredEvent, PreviewEvent, VenueConfig};
use crate::progress::{ProgressFn, ProgressTicker, ScrapePhase};
use crate::scraping::session::{HttpFetcher, SessionTracker};
use crate::scraping::{AdapterRegistry, ScrapeContext, VenueAdapter};

/// Entry point for callers: resolves venues to adapters and runs the
/// preview/scrape phases, alone or batched across venues.
pub struct DiscoveryEngine {
    roster: VenueRoster,
    registry: AdapterRegistry,
    context: ScrapeContext,
    venue_executor: BatchExecutor,
}

impl DiscoveryEngine {
    pub fn new(
        roster: VenueRoster,
        registry: AdapterRegistry,
        context: ScrapeContext,
        venue_concurrency: usize,
    ) -> Self {
        Self {
            roster,
            registry,
            context,
            venue_executor: BatchExecutor::new(venue_concurrency),
        }
    }

    /// Engine over live HTTP with the default adapters.
    pub fn from_config(config: &EngineConfig, roster: VenueRoster) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent)?;
        let context = ScrapeContext::new(
            Arc::new(fetcher),
            config.timeouts(),
            config.detail_concurrency,
        );
        Ok(Self::new(
            roster,
            AdapterRegistry::with_default_adapters(),
            context,
            config.venue_concurrency,
        ))
    }

    pub fn venues(&self) -> &[VenueConfig] {
        self.roster.venues()
    }

    pub fn sessions(&self) -> &SessionTracker {
        self.context.sessions()
    }

    fn resolve(&self, slug: &str) -> Result<(&VenueConfig, &dyn VenueAdapter)> {
        let venue = self
            .roster
            .find(slug)
            .ok_or_else(|| DiscoveryError::Configuration(format!("unknown venue: {slug}")))?;
        let adapter = self.registry.adapter_for(venue.source_family).ok_or_else(|| {
            DiscoveryError::Configuration(format!(
                "no adapter registered for {} (venue {slug})",
                venue.source_family
            ))
        })?;
        Ok((venue, adapter))
    }

    #[instrument(skip(self, slug), fields(venue = %slug))]
    pub async fn preview(&self, slug: &str) -> Result<Vec<PreviewEvent>> {
        let (venue, adapter) = self.resolve(slug)?;
        adapter.preview(venue, &self.context).await
    }

    #[instrument(skip(self, slug, event_ids, progress), fields(venue = %slug, requested = event_ids.len()))]
    pub async fn scrape(
        &self,
        slug: &str,
        event_ids: &[String],
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<DiscoveredEvent>> {
        let (venue, adapter) = self.resolve(slug)?;
        adapter.scrape(venue, &self.context, event_ids, progress).await
    }

    /// Previews several venues with bounded parallelism. One result per slug,
    /// in input order; a failing venue carries its error instead of events.
    pub async fn preview_batch(
        &self,
        slugs: &[String],
        progress: Option<&ProgressFn>,
    ) -> Vec<BatchPreviewResult> {
        let ticker = ProgressTicker::new(progress, slugs.len(), ScrapePhase::Preview);
        let errors: Mutex<HashMap<usize, String>> = Mutex::new(HashMap::new());

        let engine = self;
        let ticker = &ticker;
        let previews = self
            .venue_executor
            .run(
                slugs,
                move |_, slug| async move {
                    let result = engine.preview(slug).await;
                    ticker.tick(slug);
                    result
                },
                |index, slug, err: DiscoveryError| {
                    warn!(venue = %slug, error = %err, "venue preview failed");
                    if let Ok(mut errors) = errors.lock() {
                        errors.insert(index, err.to_string());
                    }
                },
            )
            .await;

        let mut errors = errors.into_inner().unwrap_or_default();
        let results: Vec<BatchPreviewResult> = slugs
            .iter()
            .zip(previews)
            .enumerate()
            .map(|(index, (slug, events))| BatchPreviewResult {
                venue_slug: slug.clone(),
                events: events.unwrap_or_default(),
                error: errors.remove(&index),
            })
            .collect();
        info!(
            venues = results.len(),
            failed = results.iter().filter(|r| r.error.is_some()).count(),
            "batch preview finished"
        );
        results
    }
}
