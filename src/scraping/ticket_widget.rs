use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use super::{base, ensure_family, finish_requested, load_listing, preview_drafts, unique_drafts};
use super::{ScrapeContext, VenueAdapter};
use crate::error::Result;
use crate::models::{DiscoveredEvent, EventDraft, PreviewEvent, SourceFamily, VenueConfig};
use crate::normalize::{dates, ids, text};
use crate::progress::ProgressFn;

static CARD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.tw-section").expect("ticket widget card selector"));
static HEADLINER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-name a").expect("ticket widget headliner"));
static OPENER_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".tw-opening-act, .tw-attractions").expect("ticket widget openers")
});
static VENUE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-venue-name").expect("ticket widget venue"));
static DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-event-date").expect("ticket widget date"));
static DOOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.tw-event-door-time").expect("ticket widget door"));
static SHOW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.tw-event-time").expect("ticket widget show"));
static TICKET_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.tw-buy-tix-btn").expect("ticket widget ticket button"));
static PRICE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-price").expect("ticket widget price"));
static AGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-age-restriction").expect("ticket widget age"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-image img").expect("ticket widget image"));
static SOLD_OUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tw-sold-out").expect("ticket widget sold out"));
static DATE_IN_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2})-(\d{2})-(\d{4})").expect("ticket url date regex"));

/// Listings rendered by the third-party ticketing widget (`div.tw-section` cards).
pub struct TicketWidget;

#[async_trait]
impl VenueAdapter for TicketWidget {
    fn family(&self) -> SourceFamily {
        SourceFamily::TicketWidget
    }

    async fn preview(&self, venue: &VenueConfig, ctx: &ScrapeContext) -> Result<Vec<PreviewEvent>> {
        ensure_family(self.family(), venue)?;
        let html = load_listing(venue, ctx).await?;
        let drafts = unique_drafts(parse_document(&html, venue, ctx.today()));
        info!(venue = %venue.slug, events = drafts.len(), "ticket widget preview");
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
        info!(venue = %venue.slug, requested = event_ids.len(), events = events.len(), "ticket widget scrape");
        Ok(events)
    }
}

pub(crate) fn parse_document(html: &str, venue: &VenueConfig, today: NaiveDate) -> Vec<EventDraft> {
    let document = Html::parse_document(html);
    document
        .select(&CARD_SELECTOR)
        .filter(|card| {
            let keep = same_venue(card, &venue.display_name);
            if !keep {
                debug!(venue = %venue.slug, "skipping card for another venue");
            }
            keep
        })
        .filter_map(|card| parse_card(&card, venue, today))
        .collect()
}

/// Widget feeds are often shared between sister venues. A card without a
/// venue label is assumed to be ours.
fn same_venue(card: &ElementRef<'_>, display_name: &str) -> bool {
    let Some(label) = base::first_text(card, &VENUE_SELECTOR) else {
        return true;
    };
    let label = label.to_lowercase();
    let ours = display_name.to_lowercase();
    label.contains(&ours) || ours.contains(&label)
}

fn parse_card(card: &ElementRef<'_>, venue: &VenueConfig, today: NaiveDate) -> Option<EventDraft> {
    let raw_name = base::first_text(card, &HEADLINER_SELECTOR)?;
    let (title, markers) = text::strip_status_markers(&text::decode_entities(&raw_name));
    if title.is_empty() {
        return None;
    }

    let ticket_url =
        base::absolute_url(&venue.source_url, base::first_attr(card, &TICKET_SELECTOR, "href"));
    let event_url =
        base::absolute_url(&venue.source_url, base::first_attr(card, &HEADLINER_SELECTOR, "href"));

    let date_text = base::first_text(card, &DATE_SELECTOR)?;
    let date = determine_date(&date_text, ticket_url.as_deref(), today)?;

    let show_time = base::first_text(card, &SHOW_SELECTOR).and_then(|block| {
        dates::parse_named_time(&block, "show").or_else(|| dates::find_first_time(&block))
    });
    let doors_time = base::first_text(card, &DOOR_SELECTOR).and_then(|block| {
        dates::parse_named_time(&block, "door").or_else(|| dates::find_first_time(&block))
    });

    let mut artists = vec![text::clean_artist_name(&title)];
    for opener_text in base::all_texts(card, &OPENER_SELECTOR) {
        artists.extend(text::split_supporting_acts(&opener_text));
    }

    let button_text = base::first_text(card, &TICKET_SELECTOR)
        .unwrap_or_default()
        .to_lowercase();
    let sold_out =
        markers.sold_out || button_text.contains("sold out") || base::has_match(card, &SOLD_OUT_SELECTOR);
    let cancelled = markers.cancelled || button_text.contains("cancel");

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

/// Card dates usually omit the year; ticket links often embed the full
/// `MM-DD-YYYY` date, which wins when it agrees on month and day.
fn determine_date(date_text: &str, ticket_url: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    let parsed = dates::parse_event_date(date_text, today);
    let from_url = ticket_url
        .and_then(extract_date_from_url)
        .and_then(|(month, day, year)| NaiveDate::from_ymd_opt(year, month, day));
    match (parsed, from_url) {
        (Some(parsed), Some(url_date))
            if parsed.month() == url_date.month() && parsed.day() == url_date.day() =>
        {
            Some(url_date)
        }
        (None, Some(url_date)) => Some(url_date),
        (parsed, _) => parsed,
    }
}

fn extract_date_from_url(url: &str) -> Option<(u32, u32, i32)> {
    let captures = DATE_IN_URL_RE.captures(url)?;
    let month = captures.get(1)?.as_str().parse().ok()?;
    let day = captures.get(2)?.as_str().parse().ok()?;
    let year = captures.get(3)?.as_str().parse().ok()?;
    Some((month, day, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::testing::{self, FixtureFetcher};
    use std::sync::Arc;

    const LISTING_URL: &str = "https://revolution.test/tm-venue/revolution/";

    const SAMPLE_HTML: &str = r#"
    <div class="tw-section">
        <div class="list-view-item event-container">
            <div class="tw-image"><img src="https://revolution.test/img/itm.jpg"></div>
            <div class="event-details">
                <div class="tw-name"><a href="https://revolution.test/tm-event/in-this-moment-2/">In This Moment</a></div>
                <div class="tw-opening-act">with Black Veil Brides, Bad Wolves and special guests</div>
                <div class="tw-venue-details">
                    <span class="tw-venue-name">Revolution Concert House and Event Center</span>
                </div>
                <div class="tw-date-time">
                    <span class="tw-event-date">Tue Oct 7</span>
                </div>
                <div class="tw-event-time">
                    <span class="tw-event-door-time">Doors: 5:30 pm</span>
                    <span class="tw-event-time">Show: 6:30 pm</span>
                </div>
                <div class="tw-price">$39.50 - $65.00</div>
                <div class="tw-age-restriction">All Ages</div>
            </div>
            <section class="ticket-price">
                <a class="button tw-buy-tix-btn" href="https://www.ticketmaster.com/in-this-moment-boise-idaho-10-07-2026/event/1E0062D4A10A4465">Buy Tickets</a>
            </section>
        </div>
    </div>
    <div class="tw-section">
        <div class="list-view-item event-container">
            <div class="event-details">
                <div class="tw-name"><a href="https://revolution.test/tm-event/skydxddy/">SkyDxddy</a></div>
                <div class="tw-venue-details">
                    <span class="tw-venue-name">Revolution Concert House and Event Center</span>
                </div>
                <div class="tw-date-time"><span class="tw-event-date">Wed Oct 8, 2025</span></div>
                <div class="tw-event-time">
                    <span class="tw-event-time">Doors 7:00 pm / Show 8:00 pm</span>
                </div>
            </div>
            <section class="ticket-price">
                <a class="button tw-buy-tix-btn" href="https://revolution.test/tickets/skydxddy">Sold Out</a>
            </section>
        </div>
    </div>
    <div class="tw-section">
        <div class="list-view-item event-container">
            <div class="event-details">
                <div class="tw-name"><a href="https://revolution.test/tm-event/story-pirates/">Story Pirates</a></div>
                <div class="tw-venue-details"><span class="tw-venue-name">Morrison Center</span></div>
                <div class="tw-date-time"><span class="tw-event-date">Tue Oct 21, 2025</span></div>
            </div>
        </div>
    </div>
    "#;

    fn venue() -> VenueConfig {
        let mut venue = testing::venue("revolution", SourceFamily::TicketWidget, LISTING_URL);
        venue.display_name = "Revolution Concert House".to_string();
        venue
    }

    #[test]
    fn parses_cards_for_this_venue_only() {
        let drafts = parse_document(SAMPLE_HTML, &venue(), testing::today());
        assert_eq!(drafts.len(), 2, "sister venue card should be skipped");

        let first = &drafts[0];
        assert_eq!(first.id, "ticketmaster-1E0062D4A10A4465");
        assert_eq!(first.title, "In This Moment");
        assert_eq!(first.date_string(), "2026-10-07", "year comes from the ticket url");
        assert_eq!(first.doors_time.as_deref(), Some("5:30 PM"));
        assert_eq!(first.show_time.as_deref(), Some("6:30 PM"));
        assert_eq!(
            first.artists,
            vec!["In This Moment", "Black Veil Brides", "Bad Wolves"]
        );
        assert_eq!(first.price.as_deref(), Some("$39.50 - $65"));
        assert_eq!(first.age_restriction.as_deref(), Some("All Ages"));
        assert_eq!(first.image_url.as_deref(), Some("https://revolution.test/img/itm.jpg"));
        assert_eq!(first.is_sold_out, Some(false));

        let second = &drafts[1];
        assert_eq!(second.date_string(), "2025-10-08");
        assert_eq!(second.show_time.as_deref(), Some("8:00 PM"));
        assert_eq!(second.is_sold_out, Some(true));
        assert!(second.id.starts_with("evt-"));
    }

    #[test]
    fn headliner_field_is_never_split() {
        let html = r#"
        <div class="tw-section">
            <div class="tw-name"><a href="/tm-event/acdc/">AC/DC</a></div>
            <div class="tw-opening-act">with The Pretty Reckless</div>
            <span class="tw-event-date">Sat Oct 11, 2025</span>
        </div>
        <div class="tw-section">
            <div class="tw-name"><a href="/tm-event/ewf/">Earth, Wind &amp; Fire</a></div>
            <span class="tw-event-date">Sun Oct 12, 2025</span>
        </div>"#;
        let events: Vec<DiscoveredEvent> = parse_document(html, &venue(), testing::today())
            .into_iter()
            .map(|draft| draft.finish(&venue()))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].artists, vec!["AC/DC", "The Pretty Reckless"]);
        assert_eq!(events[1].artists, vec!["Earth, Wind & Fire"]);
    }

    #[test]
    fn url_date_only_applies_when_month_and_day_agree() {
        let today = testing::today();
        let url = Some("https://www.ticketmaster.com/x-boise-idaho-11-02-2026/event/1E00");
        assert_eq!(
            determine_date("Sun Nov 2", url, today),
            NaiveDate::from_ymd_opt(2026, 11, 2)
        );
        assert_eq!(
            determine_date("Sat Oct 4", url, today),
            NaiveDate::from_ymd_opt(2025, 10, 4)
        );
        assert_eq!(determine_date("TBA", url, today), NaiveDate::from_ymd_opt(2026, 11, 2));
    }

    #[tokio::test]
    async fn scrape_returns_requested_cards() {
        let fetcher = Arc::new(FixtureFetcher::new().page(LISTING_URL, SAMPLE_HTML));
        let ctx = testing::context(fetcher);
        let previews = TicketWidget.preview(&venue(), &ctx).await.expect("preview");
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].venue_display_name, "Revolution Concert House");

        let wanted = vec![previews[1].id.clone()];
        let events = TicketWidget
            .scrape(&venue(), &ctx, &wanted, None)
            .await
            .expect("scrape");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, previews[1].id);
        assert_eq!(events[0].artists, vec!["SkyDxddy"]);
        assert_eq!(events[0].venue_slug, "revolution");
    }

    #[tokio::test]
    async fn unreachable_listing_is_source_unavailable() {
        let fetcher = Arc::new(FixtureFetcher::new().failing(LISTING_URL, "503 Service Unavailable"));
        let ctx = testing::context(fetcher);
        let err = TicketWidget.preview(&venue(), &ctx).await.expect_err("should fail");
        assert!(err.is_retryable());
        assert_eq!(ctx.sessions().open(), 0);
    }
}
