use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::session::Session;
use super::structured_data::extract_events;
use super::{ensure_family, preview_drafts, select_requested, unique_drafts};
use super::{ScrapeContext, VenueAdapter};
use crate::error::{DiscoveryError, PartialExtractionFailure, Result};
use crate::models::{DiscoveredEvent, EventDraft, PreviewEvent, SourceFamily, VenueConfig};
use crate::normalize::text;
use crate::progress::{ProgressFn, ProgressTicker, ScrapePhase};

static LOC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?\s*(.*?)\s*(?:\]\]>)?\s*</loc>").expect("loc regex")
});
static SITEMAP_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<sitemapindex[\s>]").expect("sitemap index regex"));
static URLSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<urlset[\s>]").expect("urlset regex"));
static EVENT_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://[^/]+(?:/[^?#]*)?/events?/([^/?#]+)/?(?:[?#].*)?$")
        .expect("event path regex")
});
static LISTING_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:page|category|categories|tag|tags|list|calendar|month|week|day|feed|search|past|upcoming|archive)$",
    )
    .expect("listing segment regex")
});

/// Venues without a listing page: a sitemap enumerates event detail pages,
/// each carrying the same JSON-LD blocks as the structured-data family.
pub struct Sitemap;

#[async_trait]
impl VenueAdapter for Sitemap {
    fn family(&self) -> SourceFamily {
        SourceFamily::Sitemap
    }

    async fn preview(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<PreviewEvent>> {
        ensure_family(self.family(), venue)?;
        let session = ctx.open_session(&venue.slug);
        let drafts = crawl(venue, ctx, &session, None).await?;
        info!(venue = %venue.slug, events = drafts.len(), "sitemap preview");
        Ok(preview_drafts(&drafts, venue))
    }

    async fn scrape(
        &self,
        venue: &VenueConfig,
        ctx: &ScrapeContext,
        event_ids: &[String],
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<DiscoveredEvent>> {
        ensure_family(self.family(), venue)?;
        let session = ctx.open_session(&venue.slug);
        let drafts = crawl(venue, ctx, &session, progress).await?;
        let events: Vec<DiscoveredEvent> = select_requested(drafts, event_ids)
            .into_iter()
            .map(|draft| draft.finish(venue))
            .collect();
        info!(venue = %venue.slug, requested = event_ids.len(), events = events.len(), "sitemap scrape");
        Ok(events)
    }
}

/// Sitemap discovery followed by a bounded fan-out over candidate pages.
/// Pages without event data are dropped, as are events already past.
async fn crawl(
    venue: &VenueConfig,
    ctx: &ScrapeContext,
    session: &Session<'_>,
    progress: Option<&ProgressFn>,
) -> Result<Vec<EventDraft>> {
    let candidates = discover_candidates(venue, session).await?;
    debug!(venue = %venue.slug, candidates = candidates.len(), "sitemap candidates");

    let today = ctx.today();
    let tz = venue.tz();
    let ticker = ProgressTicker::new(progress, candidates.len(), ScrapePhase::Details);
    let ticker = &ticker;
    let pages = ctx
        .detail_executor()
        .run(
            &candidates,
            move |_, url| async move {
                let page = session.sub_context();
                let loaded = page.load(url).await;
                ticker.tick(url);
                let html = loaded?;
                let mut drafts = extract_events(&html, url, tz, today);
                for draft in &mut drafts {
                    if draft.event_url.is_none() {
                        draft.event_url = Some(url.clone());
                    }
                }
                Ok::<_, DiscoveryError>(drafts)
            },
            |_, url, err: DiscoveryError| {
                let failure = PartialExtractionFailure::new(url.as_str(), err);
                warn!(venue = %venue.slug, %failure, "candidate page skipped");
            },
        )
        .await;

    let drafts: Vec<EventDraft> = pages
        .into_iter()
        .flatten()
        .flatten()
        .filter(|draft| draft.date.map(|date| date >= today).unwrap_or(false))
        .collect();
    Ok(unique_drafts(drafts))
}

async fn discover_candidates(venue: &VenueConfig, session: &Session<'_>) -> Result<Vec<String>> {
    let root = session.load(&venue.source_url).await?;
    let mut locations = Vec::new();
    if SITEMAP_INDEX_RE.is_match(&root) {
        let children = extract_locs(&root);
        let preferred: Vec<String> = children
            .iter()
            .filter(|url| url.to_lowercase().contains("event"))
            .cloned()
            .collect();
        let chosen = if preferred.is_empty() { children } else { preferred };
        for child in chosen {
            match session.load(&child).await {
                Ok(xml) => locations.extend(extract_locs(&xml)),
                Err(err) => warn!(
                    venue = %venue.slug,
                    failure = %PartialExtractionFailure::new(child.as_str(), err),
                    "child sitemap skipped"
                ),
            }
        }
    } else if URLSET_RE.is_match(&root) {
        locations = extract_locs(&root);
    } else {
        return Err(DiscoveryError::parse(&venue.slug, "sitemap is neither a urlset nor a sitemap index"));
    }

    let mut seen = HashSet::new();
    Ok(locations
        .into_iter()
        .filter(|url| is_event_detail_url(url))
        .filter(|url| seen.insert(url.clone()))
        .collect())
}

pub(crate) fn extract_locs(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .map(|caps| text::decode_entities(caps[1].trim()))
        .filter(|loc| !loc.is_empty())
        .collect()
}

/// Detail pages sit one segment under `/event/` or `/events/`; listing,
/// pagination and taxonomy paths do not count.
pub(crate) fn is_event_detail_url(url: &str) -> bool {
    EVENT_PATH_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|segment| !LISTING_SEGMENT_RE.is_match(segment.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::testing::{self, FixtureFetcher};
    use std::sync::Arc;

    const INDEX_URL: &str = "https://knitting.test/sitemap_index.xml";

    const INDEX_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
      <sitemap><loc>https://knitting.test/page-sitemap.xml</loc></sitemap>
      <sitemap><loc>https://knitting.test/event-sitemap.xml</loc></sitemap>
    </sitemapindex>"#;

    const EVENT_SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
      <url><loc>https://knitting.test/events/</loc></url>
      <url><loc>https://knitting.test/events/page/2/</loc></url>
      <url><loc><![CDATA[https://knitting.test/events/oddisee/]]></loc></url>
      <url><loc>https://knitting.test/events/pup/</loc></url>
      <url><loc>https://knitting.test/events/last-year/</loc></url>
      <url><loc>https://knitting.test/events/gift-cards/</loc></url>
      <url><loc>https://knitting.test/events/broken/</loc></url>
      <url><loc>https://knitting.test/events/pup/</loc></url>
    </urlset>"#;

    fn event_page(name: &str, start: &str, ticket: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type":"MusicEvent","name":"{name}","startDate":"{start}",
              "offers":{{"price":"20","url":"{ticket}"}}}}
            </script></head></html>"#
        )
    }

    fn fetcher() -> FixtureFetcher {
        FixtureFetcher::new()
            .page(INDEX_URL, INDEX_XML)
            .page("https://knitting.test/event-sitemap.xml", EVENT_SITEMAP)
            .page(
                "https://knitting.test/events/oddisee/",
                &event_page("Oddisee", "2025-10-09T20:00:00-06:00", "https://www.axs.com/events/556677/oddisee"),
            )
            .page(
                "https://knitting.test/events/pup/",
                &event_page("PUP", "2025-10-12T19:30:00-06:00", "https://tickets.test/pup"),
            )
            .page(
                "https://knitting.test/events/last-year/",
                &event_page("Old Show", "2024-10-12T19:30:00-06:00", "https://tickets.test/old"),
            )
            .page("https://knitting.test/events/gift-cards/", "<html><body>Gift cards</body></html>")
            .failing("https://knitting.test/events/broken/", "500 Internal Server Error")
    }

    fn venue() -> VenueConfig {
        testing::venue("knitting-factory", SourceFamily::Sitemap, INDEX_URL)
    }

    #[test]
    fn recognises_detail_urls() {
        assert!(is_event_detail_url("https://knitting.test/events/oddisee/"));
        assert!(is_event_detail_url("https://knitting.test/event/pup-2025?ref=feed"));
        assert!(is_event_detail_url("https://knitting.test/boise/events/pup"));
        assert!(!is_event_detail_url("https://knitting.test/events/"));
        assert!(!is_event_detail_url("https://knitting.test/events/page/2/"));
        assert!(!is_event_detail_url("https://knitting.test/events/category/"));
        assert!(!is_event_detail_url("https://knitting.test/about/"));
        assert_eq!(
            extract_locs(EVENT_SITEMAP)[2],
            "https://knitting.test/events/oddisee/"
        );
    }

    #[tokio::test]
    async fn crawls_event_sitemap_only() {
        let fetcher = Arc::new(fetcher());
        let ctx = testing::context(fetcher.clone());
        let previews = Sitemap.preview(&venue(), &ctx).await.expect("preview");
        let titles: Vec<&str> = previews.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Oddisee", "PUP"]);
        assert_eq!(previews[0].id, "axs-556677");
        assert_eq!(fetcher.hits("https://knitting.test/page-sitemap.xml"), 0);
        assert_eq!(fetcher.hits("https://knitting.test/events/pup/"), 1);
        assert_eq!(ctx.sessions().open(), 0);
    }

    #[tokio::test]
    async fn scrape_fills_event_url_from_page() {
        let ctx = testing::context(Arc::new(fetcher()));
        let previews = Sitemap.preview(&venue(), &ctx).await.expect("preview");
        let ids = vec![previews[1].id.clone()];
        let (callback, mut rx) = crate::progress::channel();
        let events = Sitemap
            .scrape(&venue(), &ctx, &ids, Some(callback.as_ref()))
            .await
            .expect("scrape");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, ids[0]);
        assert_eq!(events[0].event_url.as_deref(), Some("https://knitting.test/events/pup/"));
        assert_eq!(events[0].show_time.as_deref(), Some("7:30 PM"));
        assert_eq!(events[0].price.as_deref(), Some("$20"));
        assert_eq!(events[0].artists, vec!["PUP"]);

        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 5, "one tick per candidate page");
    }

    #[tokio::test]
    async fn non_xml_root_is_a_parse_error() {
        let fetcher = Arc::new(FixtureFetcher::new().page(INDEX_URL, "<html>Not found</html>"));
        let ctx = testing::context(fetcher);
        let err = Sitemap.preview(&venue(), &ctx).await.expect_err("not a sitemap");
        assert!(matches!(err, DiscoveryError::Parse { .. }));
        assert!(!err.is_retryable());
    }
}
