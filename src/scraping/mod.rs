pub mod base;
pub mod calendar_widget;
pub mod performer_list;
pub mod session;
pub mod sitemap;
pub mod structured_data;
pub mod ticket_widget;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use crate::config::Timeouts;
use crate::error::{DiscoveryError, Result};
use crate::executor::BatchExecutor;
use crate::models::{DiscoveredEvent, EventDraft, PreviewEvent, SourceFamily, VenueConfig};
use crate::normalize::dates;
use crate::progress::{ProgressFn, ProgressTicker, ScrapePhase};

use self::session::{PageFetcher, Session, SessionTracker};

/// Two-phase extraction contract, implemented once per [`SourceFamily`].
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn family(&self) -> SourceFamily;

    /// Cheap listing pass. Zero events is a valid result.
    async fn preview(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<PreviewEvent>>;

    /// Full extraction for the requested IDs still present upstream. IDs that
    /// have disappeared are omitted.
    async fn scrape(
        &self,
        venue: &VenueConfig,
        ctx: &ScrapeContext,
        event_ids: &[String],
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<DiscoveredEvent>>;
}

/// Family key to adapter, built once at startup and passed to the engine.
pub struct AdapterRegistry {
    adapters: HashMap<SourceFamily, Box<dyn VenueAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn with_default_adapters() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(calendar_widget::CalendarWidget));
        registry.register(Box::new(structured_data::StructuredData));
        registry.register(Box::new(sitemap::Sitemap));
        registry.register(Box::new(ticket_widget::TicketWidget));
        registry.register(Box::new(performer_list::PerformerList));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn VenueAdapter>) {
        self.adapters.insert(adapter.family(), adapter);
    }

    pub fn adapter_for(&self, family: SourceFamily) -> Option<&dyn VenueAdapter> {
        self.adapters.get(&family).map(|adapter| adapter.as_ref())
    }

    /// Lookup by family key (`"ticket-widget"`). Unknown keys yield `None`.
    pub fn get_adapter(&self, family: &str) -> Option<&dyn VenueAdapter> {
        let family = family.parse::<SourceFamily>().ok()?;
        self.adapter_for(family)
    }

    pub fn families(&self) -> Vec<SourceFamily> {
        SourceFamily::ALL
            .into_iter()
            .filter(|family| self.adapters.contains_key(family))
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}

/// Shared, read-only state every adapter call runs against.
pub struct ScrapeContext {
    fetcher: Arc<dyn PageFetcher>,
    sessions: SessionTracker,
    timeouts: Timeouts,
    detail_executor: BatchExecutor,
    today: Option<NaiveDate>,
}

impl ScrapeContext {
    pub fn new(fetcher: Arc<dyn PageFetcher>, timeouts: Timeouts, detail_concurrency: usize) -> Self {
        Self {
            fetcher,
            sessions: SessionTracker::default(),
            timeouts,
            detail_executor: BatchExecutor::new(detail_concurrency),
            today: None,
        }
    }

    /// Pins "today" for year inference and upcoming filters.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(dates::today_local)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn detail_executor(&self) -> BatchExecutor {
        self.detail_executor
    }

    pub fn open_session<'a>(&'a self, venue: &'a str) -> Session<'a> {
        Session::open(
            self.fetcher.as_ref(),
            &self.sessions,
            venue,
            self.timeouts.page_load,
            self.timeouts.detail,
        )
    }
}

pub(crate) fn ensure_family(family: SourceFamily, venue: &VenueConfig) -> Result<()> {
    if venue.source_family == family {
        Ok(())
    } else {
        Err(DiscoveryError::Configuration(format!(
            "venue {} is a {} source, not {}",
            venue.slug, venue.source_family, family
        )))
    }
}

/// Loads a single listing page inside its own session.
pub(crate) async fn load_listing(venue: &VenueConfig, ctx: &ScrapeContext) -> Result<String> {
    let session = ctx.open_session(&venue.slug);
    session.load(&venue.source_url).await
}

/// Drops undated drafts and keeps the first draft per ID, preserving page order.
pub(crate) fn unique_drafts(drafts: Vec<EventDraft>) -> Vec<EventDraft> {
    let mut seen = HashSet::new();
    drafts
        .into_iter()
        .filter(|draft| draft.date.is_some() && !draft.title.is_empty())
        .filter(|draft| {
            let fresh = seen.insert(draft.id.clone());
            if !fresh {
                debug!(id = %draft.id, title = %draft.title, "duplicate listing entry skipped");
            }
            fresh
        })
        .collect()
}

pub(crate) fn preview_drafts(drafts: &[EventDraft], venue: &VenueConfig) -> Vec<PreviewEvent> {
    drafts.iter().map(|draft| draft.preview(venue)).collect()
}

pub(crate) fn select_requested(drafts: Vec<EventDraft>, event_ids: &[String]) -> Vec<EventDraft> {
    let wanted: HashSet<&str> = event_ids.iter().map(String::as_str).collect();
    drafts
        .into_iter()
        .filter(|draft| wanted.contains(draft.id.as_str()))
        .collect()
}

/// Finishes drafts for single-page families, where every field came from the
/// listing itself.
pub(crate) fn finish_requested(
    drafts: Vec<EventDraft>,
    venue: &VenueConfig,
    event_ids: &[String],
    progress: Option<&ProgressFn>,
) -> Vec<DiscoveredEvent> {
    let requested = select_requested(drafts, event_ids);
    let ticker = ProgressTicker::new(progress, requested.len(), ScrapePhase::Extracting);
    requested
        .into_iter()
        .map(|draft| {
            ticker.tick(&draft.title);
            draft.finish(venue)
        })
        .collect()
}
