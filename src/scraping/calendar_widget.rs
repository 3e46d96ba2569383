use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::Session;
use super::{base, ensure_family, preview_drafts, select_requested, unique_drafts};
use super::{ScrapeContext, VenueAdapter};
use crate::error::{DiscoveryError, PartialExtractionFailure, Result};
use crate::models::{DiscoveredEvent, EventDraft, PreviewEvent, SourceFamily, VenueConfig};
use crate::normalize::{dates, ids, text};
use crate::progress::{ProgressFn, ProgressTicker, ScrapePhase};

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("script selector"));
static CALENDAR_DATA_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script#calendar-data[type="application/json"]"#)
        .expect("calendar data selector")
});
static ASSIGNMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\ball_events|\bcalendarEvents|__CALENDAR_EVENTS__)\s*[=:]\s*")
        .expect("calendar assignment regex")
});
static SUPPORTING_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".supporting-artists li, .event-artists .artist-name")
        .expect("supporting artists selector")
});
static SUPPORTING_ATTR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-supporting-act]").expect("supporting act attr selector"));
static DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".event-description, .entry-content").expect("description selector")
});

/// Calendar widgets that ship every event in an embedded script payload, with
/// a detail page per event for supporting acts and long descriptions.
pub struct CalendarWidget;

#[async_trait]
impl VenueAdapter for CalendarWidget {
    fn family(&self) -> SourceFamily {
        SourceFamily::CalendarWidget
    }

    async fn preview(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<PreviewEvent>> {
        ensure_family(self.family(), venue)?;
        let session = ctx.open_session(&venue.slug);
        let drafts = listing(venue, ctx, &session).await?;
        info!(venue = %venue.slug, events = drafts.len(), "calendar widget preview");
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
        let requested = select_requested(listing(venue, ctx, &session).await?, event_ids);

        let ticker = ProgressTicker::new(progress, requested.len(), ScrapePhase::Details);
        let session = &session;
        let ticker = &ticker;
        let details = ctx
            .detail_executor()
            .run(
                &requested,
                move |_, draft| async move {
                    let detail = fetch_detail(session, draft).await;
                    ticker.tick(&draft.title);
                    detail
                },
                |_, draft, err: DiscoveryError| {
                    let item = draft.event_url.clone().unwrap_or_else(|| draft.title.clone());
                    let failure = PartialExtractionFailure::new(item, err);
                    warn!(venue = %venue.slug, %failure, "detail page failed, artists fall back to title");
                },
            )
            .await;

        let degraded = details.iter().filter(|detail| detail.is_none()).count();
        let events: Vec<DiscoveredEvent> = requested
            .into_iter()
            .zip(details)
            .map(|(draft, detail)| apply_detail(draft, detail).finish(venue))
            .collect();
        info!(
            venue = %venue.slug,
            requested = event_ids.len(),
            events = events.len(),
            degraded,
            "calendar widget scrape"
        );
        Ok(events)
    }
}

async fn listing(venue: &VenueConfig, ctx: &ScrapeContext, session: &Session<'_>) -> Result<Vec<EventDraft>> {
    let items = wait_for_events(venue, ctx, session).await?;
    let tz = venue.tz();
    let today = ctx.today();
    let drafts = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<CalendarItem>(item) {
            Ok(item) => draft_from_item(item, venue, tz, today),
            Err(err) => {
                debug!(venue = %venue.slug, error = %err, "skipping unreadable calendar item");
                None
            }
        })
        .collect();
    Ok(unique_drafts(drafts))
}

/// Reloads the page until the embedded event list appears or the data-ready
/// timeout elapses.
async fn wait_for_events(venue: &VenueConfig, ctx: &ScrapeContext, session: &Session<'_>) -> Result<Vec<Value>> {
    let timeouts = ctx.timeouts();
    let deadline = Instant::now() + timeouts.data_ready;
    loop {
        let html = session.load(&venue.source_url).await?;
        if let Some(items) = find_embedded_events(&html) {
            return Ok(items);
        }
        if Instant::now() + timeouts.poll_interval > deadline {
            return Err(DiscoveryError::unavailable(
                &venue.slug,
                format!(
                    "calendar data not present after {}ms",
                    timeouts.data_ready.as_millis()
                ),
            ));
        }
        debug!(venue = %venue.slug, "calendar data not ready yet");
        tokio::time::sleep(timeouts.poll_interval).await;
    }
}

/// The embedded event array, if the page has materialized one. A `null`
/// placeholder counts as not yet present; an empty array is a real answer.
pub(crate) fn find_embedded_events(html: &str) -> Option<Vec<Value>> {
    let document = Html::parse_document(html);
    for body in base::script_bodies(&document, &CALENDAR_DATA_SELECTOR) {
        if let Some(items) = first_json_value(body.trim()).and_then(event_list) {
            return Some(items);
        }
    }
    for body in base::script_bodies(&document, &SCRIPT_SELECTOR) {
        for assignment in ASSIGNMENT_RE.find_iter(&body) {
            let rest = &body[assignment.end()..];
            if let Some(items) = first_json_value(rest).and_then(event_list) {
                return Some(items);
            }
        }
    }
    None
}

/// Parses the JSON value at the start of `text`, ignoring whatever script follows it.
fn first_json_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn event_list(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CalendarItem {
    id: Option<Value>,
    #[serde(alias = "name")]
    title: Option<String>,
    #[serde(alias = "startDate", alias = "date", alias = "start_date")]
    start: Option<Value>,
    #[serde(alias = "startTime", alias = "start_time")]
    time: Option<String>,
    #[serde(alias = "doors", alias = "doorTime")]
    doors_time: Option<String>,
    #[serde(alias = "permalink", alias = "link")]
    url: Option<String>,
    #[serde(alias = "imageUrl", alias = "thumbnail")]
    image: Option<String>,
    #[serde(alias = "ticketUrl", alias = "tickets")]
    ticket_url: Option<String>,
    price: Option<Value>,
    #[serde(alias = "ageRestriction", alias = "age_restriction")]
    age: Option<String>,
    #[serde(alias = "soldOut")]
    sold_out: Option<bool>,
    #[serde(alias = "canceled")]
    cancelled: Option<bool>,
    status: Option<String>,
    #[serde(alias = "excerpt")]
    description: Option<String>,
}

impl CalendarItem {
    fn upstream_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    fn schedule(&self, tz: Option<Tz>, today: NaiveDate) -> Option<(NaiveDate, Option<String>)> {
        match self.start.as_ref()? {
            Value::String(raw) => dates::split_timestamp(raw, tz)
                .or_else(|| dates::parse_event_date(raw, today).map(|d| (d, dates::find_first_time(raw)))),
            Value::Number(epoch) => {
                let mut seconds = epoch.as_i64()?;
                if seconds > 100_000_000_000 {
                    seconds /= 1000;
                }
                dates::split_epoch(seconds, tz)
            }
            _ => None,
        }
    }

    fn price(&self) -> Option<String> {
        match self.price.as_ref()? {
            Value::Number(amount) => text::format_price(amount.as_f64()?, None),
            Value::String(raw) => text::normalize_price(raw),
            _ => None,
        }
    }
}

fn draft_from_item(item: CalendarItem, venue: &VenueConfig, tz: Option<Tz>, today: NaiveDate) -> Option<EventDraft> {
    let raw_title = item.title.as_deref()?;
    let (title, markers) = text::strip_status_markers(&text::decode_entities(raw_title));
    if title.is_empty() {
        return None;
    }
    let (date, start_time) = item.schedule(tz, today)?;
    let show_time = start_time.or_else(|| item.time.as_deref().and_then(dates::find_first_time));

    let event_url = base::absolute_url(&venue.source_url, item.url.clone());
    let ticket_url = base::absolute_url(&venue.source_url, item.ticket_url.clone());
    let id = [ticket_url.as_deref(), event_url.as_deref()]
        .into_iter()
        .flatten()
        .find_map(ids::url_event_id)
        .or_else(|| item.upstream_id().map(|id| format!("{}-{}", venue.slug, id)))
        .unwrap_or_else(|| ids::stable_event_id(&title, date));

    let status = item.status.as_deref().unwrap_or_default().to_lowercase();
    let sold_out = markers.sold_out || status.contains("sold");
    let cancelled = markers.cancelled || status.contains("cancel");

    Some(EventDraft {
        image_url: base::absolute_url(&venue.source_url, item.image.clone()),
        doors_time: item.doors_time.as_deref().and_then(dates::find_first_time),
        show_time,
        ticket_url,
        event_url,
        price: item.price(),
        age_restriction: item.age.as_deref().and_then(text::normalize_age),
        is_sold_out: Some(item.sold_out.unwrap_or(false) || sold_out),
        is_cancelled: Some(item.cancelled.unwrap_or(false) || cancelled),
        description: item
            .description
            .as_deref()
            .map(base::fragment_text)
            .filter(|text| !text.is_empty()),
        ..EventDraft::new(id, title, date)
    })
}

#[derive(Debug, Default, Clone, PartialEq)]
struct DetailInfo {
    supporting: Vec<String>,
    description: Option<String>,
}

async fn fetch_detail(session: &Session<'_>, draft: &EventDraft) -> Result<DetailInfo> {
    let Some(url) = draft.event_url.as_deref() else {
        return Ok(DetailInfo::default());
    };
    let detail_session = session.sub_context();
    let html = detail_session.load(url).await?;
    Ok(parse_detail(&html))
}

fn parse_detail(html: &str) -> DetailInfo {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let mut supporting = base::all_texts(&root, &SUPPORTING_SELECTOR);
    for element in document.select(&SUPPORTING_ATTR_SELECTOR) {
        match element.value().attr("data-supporting-act").map(str::trim) {
            Some(listed) if !listed.is_empty() => supporting.extend(text::split_supporting_acts(listed)),
            _ => supporting.push(base::inner_text(element)),
        }
    }
    supporting.retain(|name| !name.is_empty() && !text::is_boilerplate(name));
    DetailInfo {
        supporting,
        description: base::first_text(&root, &DESCRIPTION_SELECTOR),
    }
}

/// Merges detail-page data. Without it (`None`, the page failed) the draft is
/// left alone and its artists fall back to the cleaned title.
fn apply_detail(mut draft: EventDraft, detail: Option<DetailInfo>) -> EventDraft {
    let Some(detail) = detail else {
        return draft;
    };
    if detail.description.is_some() {
        draft.description = detail.description;
    }
    let mut supporting = detail.supporting;
    if supporting.is_empty() {
        supporting = text::extract_with_clause(&draft.title);
    }
    if supporting.is_empty() {
        if let Some(description) = draft.description.as_deref() {
            supporting = text::extract_with_clause(description);
        }
    }
    draft.artists = std::iter::once(text::headliner_from_title(&draft.title))
        .chain(supporting)
        .collect();
    draft
}
