use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use super::{base, ensure_family, finish_requested, load_listing, preview_drafts, unique_drafts};
use super::{ScrapeContext, VenueAdapter};
use crate::error::Result;
use crate::models::{DiscoveredEvent, EventDraft, PreviewEvent, SourceFamily, VenueConfig};
use crate::normalize::{dates, ids, text};
use crate::progress::ProgressFn;

static CARD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-item").expect("performer list card"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-title").expect("performer list title"));
static TITLE_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-title a, a.event-link").expect("performer list link"));
static DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-date").expect("performer list date"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-time").expect("performer list time"));
static PERFORMER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".performing li").expect("performer list performers"));
static TICKET_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.ticket-link").expect("performer list ticket"));
static PRICE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-price").expect("performer list price"));
static AGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-age").expect("performer list age"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img").expect("performer list image"));
static STATUS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-status").expect("performer list status"));

/// Widget listings with a "performing" block per event. The first performer
/// slot frequently carries series branding or status markers.
pub struct PerformerList;

#[async_trait]
impl VenueAdapter for PerformerList {
    fn family(&self) -> SourceFamily {
        SourceFamily::PerformerList
    }

    async fn preview(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<PreviewEvent>> {
        ensure_family(self.family(), venue)?;
        let html = load_listing(venue, ctx).await?;
        let drafts = unique_drafts(parse_document(&html, venue, ctx.today()));
        info!(venue = %venue.slug, events = drafts.len(), "performer list preview");
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
        let html = load_listing(venue, ctx).await?;
        let drafts = unique_drafts(parse_document(&html, venue, ctx.today()));
        let events = finish_requested(drafts, venue, event_ids, progress);
        info!(venue = %venue.slug, requested = event_ids.len(), events = events.len(), "performer list scrape");
        Ok(events)
    }
}

pub(crate) fn parse_document(html: &str, venue: &VenueConfig, today: NaiveDate) -> Vec<EventDraft> {
    let document = Html::parse_document(html);
    document
        .select(&CARD_SELECTOR)
        .filter_map(|card| {
            let draft = parse_card(&card, venue, today);
            if draft.is_none() {
                debug!(venue = %venue.slug, "skipping card without title or date");
            }
            draft
        })
        .collect()
}

fn parse_card(card: &ElementRef<'_>, venue: &VenueConfig, today: NaiveDate) -> Option<EventDraft> {
    let raw_title = base::first_text(card, &TITLE_SELECTOR)?;
    let (title, title_markers) = text::strip_status_markers(&text::decode_entities(&raw_title));
    if title.is_empty() {
        return None;
    }
    let date = dates::parse_event_date(&base::first_text(card, &DATE_SELECTOR)?, today)?;

    let time_block = base::first_text(card, &TIME_SELECTOR);
    let show_time = time_block.as_deref().and_then(|block| {
        dates::parse_named_time(block, "show").or_else(|| dates::find_first_time(block))
    });
    let doors_time = time_block
        .as_deref()
        .and_then(|block| dates::parse_named_time(block, "door"));

    let (artists, performer_markers) = performers(card, &raw_title);

    let status = base::first_text(card, &STATUS_SELECTOR)
        .unwrap_or_default()
        .to_lowercase();
    let sold_out = title_markers.sold_out
        || performer_markers.sold_out
        || status.contains("sold out")
        || status.contains("soldout");
    let cancelled = title_markers.cancelled
        || performer_markers.cancelled
        || status.contains("cancel");

    let ticket_url =
        base::absolute_url(&venue.source_url, base::first_attr(card, &TICKET_SELECTOR, "href"));
    let event_url =
        base::absolute_url(&venue.source_url, base::first_attr(card, &TITLE_LINK_SELECTOR, "href"));
    let id = ids::derive_event_id([ticket_url.as_deref(), event_url.as_deref()], &title, date);

    Some(EventDraft {
        image_url: base::absolute_url(&venue.source_url, base::image_src(card, &IMAGE_SELECTOR)),
        doors_time,
        show_time,
        ticket_url,
        event_url,
        artists,
        price: base::first_text(card, &PRICE_SELECTOR).and_then(|p| text::normalize_price(&p)),
        age_restriction: base::first_text(card, &AGE_SELECTOR).and_then(|a| text::normalize_age(&a)),
        is_sold_out: Some(sold_out),
        is_cancelled: Some(cancelled),
        ..EventDraft::new(id, title, date)
    })
}

/// Performer names in billing order. Status markers are stripped from the
/// first slot and a series label occupying it is discarded.
fn performers(card: &ElementRef<'_>, raw_title: &str) -> (Vec<String>, text::StatusMarkers) {
    let mut names = base::all_texts(card, &PERFORMER_SELECTOR).into_iter();
    let mut artists = Vec::new();
    let mut markers = text::StatusMarkers::default();

    if let Some(first) = names.next() {
        let (first, first_markers) = text::strip_status_markers(&text::decode_entities(&first));
        markers = first_markers;
        if text::is_series_label(&first, raw_title) {
            debug!(label = %first, "dropping series label from performers");
        } else {
            artists.push(text::title_case(&first));
        }
    }
    artists.extend(
        names
            .map(|name| text::decode_entities(&name))
            .map(|name| text::title_case(&name))
            .filter(|name| !name.is_empty()),
    );
    (artists, markers)
}
