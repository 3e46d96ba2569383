use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info};

use super::{base, ensure_family, finish_requested, load_listing, preview_drafts, unique_drafts};
use super::{ScrapeContext, VenueAdapter};
use crate::error::Result;
use crate::models::{DiscoveredEvent, EventDraft, PreviewEvent, SourceFamily, VenueConfig};
use crate::normalize::{dates, ids, text};
use crate::progress::ProgressFn;

static LD_JSON_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("ld+json selector")
});

/// Listing pages that embed schema.org `Event` objects as JSON-LD.
pub struct StructuredData;

#[async_trait]
impl VenueAdapter for StructuredData {
    fn family(&self) -> SourceFamily {
        SourceFamily::StructuredData
    }

    async fn preview(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<PreviewEvent>> {
        ensure_family(self.family(), venue)?;
        let drafts = self.listing(venue, ctx).await?;
        info!(venue = %venue.slug, events = drafts.len(), "structured data preview");
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
        let drafts = self.listing(venue, ctx).await?;
        let events = finish_requested(drafts, venue, event_ids, progress);
        info!(venue = %venue.slug, requested = event_ids.len(), events = events.len(), "structured data scrape");
        Ok(events)
    }
}

impl StructuredData {
    async fn listing(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<EventDraft>> {
        let html = load_listing(venue, ctx).await?;
        Ok(unique_drafts(extract_events(
            &html,
            &venue.source_url,
            venue.tz(),
            ctx.today(),
        )))
    }
}

/// Every event-typed JSON-LD object on the page, mapped to drafts. Blocks that
/// fail to parse are skipped.
pub fn extract_events(html: &str, page_url: &str, tz: Option<Tz>, today: NaiveDate) -> Vec<EventDraft> {
    let document = Html::parse_document(html);
    let mut nodes = Vec::new();
    for body in base::script_bodies(&document, &LD_JSON_SELECTOR) {
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(value) => collect_event_nodes(value, &mut nodes),
            Err(err) => debug!(page = page_url, error = %err, "skipping malformed ld+json block"),
        }
    }
    nodes
        .iter()
        .filter_map(|node| draft_from_node(node, page_url, tz, today))
        .collect()
}

fn collect_event_nodes(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_event_nodes(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                collect_event_nodes(graph, out);
            }
            let value = Value::Object(map);
            if is_event_type(&value) {
                out.push(value);
            }
        }
        _ => {}
    }
}

fn is_event_type(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(kind)) => kind.ends_with("Event"),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|kind| kind.ends_with("Event")),
        _ => false,
    }
}

fn draft_from_node(node: &Value, page_url: &str, tz: Option<Tz>, today: NaiveDate) -> Option<EventDraft> {
    let raw_name = node.get("name").and_then(Value::as_str)?;
    let (title, markers) = text::strip_status_markers(&text::decode_entities(raw_name));
    if title.is_empty() {
        return None;
    }

    let start = node.get("startDate").and_then(Value::as_str)?;
    let (date, show_time) = dates::split_timestamp(start, tz)
        .or_else(|| dates::parse_event_date(start, today).map(|d| (d, dates::find_first_time(start))))?;

    let doors_time = node.get("doorTime").and_then(Value::as_str).and_then(|raw| {
        dates::split_timestamp(raw, tz)
            .and_then(|(_, time)| time)
            .or_else(|| dates::find_first_time(raw))
    });

    let event_url = base::absolute_url(page_url, first_string(node.get("url")));
    let offers = Offers::from_node(node.get("offers"));
    let ticket_url = base::absolute_url(page_url, offers.url.clone());

    let artists = performer_names(node.get("performer"));
    let cancelled = markers.cancelled
        || node
            .get("eventStatus")
            .and_then(Value::as_str)
            .map(|status| status.ends_with("EventCancelled"))
            .unwrap_or(false);

    let id = ids::derive_event_id(
        [event_url.as_deref(), ticket_url.as_deref()],
        &title,
        date,
    );

    Some(EventDraft {
        image_url: base::absolute_url(page_url, first_string(node.get("image"))),
        doors_time,
        show_time,
        ticket_url,
        event_url,
        artists,
        price: offers.price(),
        age_restriction: node
            .get("typicalAgeRange")
            .and_then(Value::as_str)
            .and_then(age_from_range),
        is_sold_out: Some(markers.sold_out || offers.sold_out),
        is_cancelled: Some(cancelled),
        description: node
            .get("description")
            .and_then(Value::as_str)
            .map(base::fragment_text)
            .filter(|text| !text.is_empty()),
        ..EventDraft::new(id, title, date)
    })
}

/// First string found in a string, array, or `{url}` / `{@id}` object.
fn first_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(|item| first_string(Some(item))),
        Value::Object(map) => first_string(map.get("url")).or_else(|| first_string(map.get("@id"))),
        _ => None,
    }
}

fn performer_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(name)) => vec![text::decode_entities(name)],
        Some(Value::Object(map)) => map
            .get("name")
            .and_then(Value::as_str)
            .map(|name| vec![text::decode_entities(name)])
            .unwrap_or_default(),
        Some(Value::Array(items)) => items
            .iter()
            .flat_map(|item| performer_names(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

/// schema.org ranges come as "21+", "21-" or "18-99".
fn age_from_range(range: &str) -> Option<String> {
    text::normalize_age(range).or_else(|| text::normalize_age(&range.replace('-', "+")))
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Offers {
    low: Option<f64>,
    high: Option<f64>,
    sold_out: bool,
    url: Option<String>,
}

impl Offers {
    fn from_node(value: Option<&Value>) -> Self {
        let mut offers = Offers::default();
        let items: Vec<&Value> = match value {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item) if item.is_object() => vec![item],
            _ => Vec::new(),
        };
        let mut all_sold_out = !items.is_empty();
        for item in items {
            for key in ["price", "lowPrice"] {
                if let Some(amount) = item.get(key).and_then(number) {
                    offers.low = Some(offers.low.map_or(amount, |low| low.min(amount)));
                    offers.high = Some(offers.high.map_or(amount, |high| high.max(amount)));
                }
            }
            if let Some(amount) = item.get("highPrice").and_then(number) {
                offers.high = Some(offers.high.map_or(amount, |high| high.max(amount)));
            }
            let sold = item
                .get("availability")
                .and_then(Value::as_str)
                .map(|availability| availability.ends_with("SoldOut"))
                .unwrap_or(false);
            all_sold_out &= sold;
            if offers.url.is_none() {
                offers.url = first_string(item.get("url"));
            }
        }
        offers.sold_out = all_sold_out;
        offers
    }

    fn price(&self) -> Option<String> {
        text::format_price(self.low?, self.high)
    }
}
