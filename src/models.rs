use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{ids, text};

/// The structural family a venue's listing page belongs to. One adapter per variant.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFamily {
    CalendarWidget,
    StructuredData,
    Sitemap,
    TicketWidget,
    PerformerList,
}

impl SourceFamily {
    pub const ALL: [SourceFamily; 5] = [
        SourceFamily::CalendarWidget,
        SourceFamily::StructuredData,
        SourceFamily::Sitemap,
        SourceFamily::TicketWidget,
        SourceFamily::PerformerList,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SourceFamily::CalendarWidget => "calendar-widget",
            SourceFamily::StructuredData => "structured-data",
            SourceFamily::Sitemap => "sitemap",
            SourceFamily::TicketWidget => "ticket-widget",
            SourceFamily::PerformerList => "performer-list",
        }
    }
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SourceFamily {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase().replace('_', "-");
        SourceFamily::ALL
            .into_iter()
            .find(|family| family.key() == wanted)
            .ok_or_else(|| format!("unknown source family: {value}"))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VenueConfig {
    pub slug: String,
    pub display_name: String,
    pub source_family: SourceFamily,
    pub source_url: String,
    pub city: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl VenueConfig {
    pub fn tz(&self) -> Option<chrono_tz::Tz> {
        self.timezone.as_deref().and_then(|name| name.parse().ok())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEvent {
    pub id: String,
    pub title: String,
    pub date: String,
    pub venue_display_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredEvent {
    pub id: String,
    pub title: String,
    pub date: String,
    pub venue_display_name: String,
    pub venue_slug: String,
    pub image_url: Option<String>,
    pub doors_time: Option<String>,
    pub show_time: Option<String>,
    pub ticket_url: Option<String>,
    pub event_url: Option<String>,
    pub artists: Vec<String>, // headliner first
    pub scraped_at: DateTime<Utc>,
    pub price: Option<String>,
    pub age_restriction: Option<String>,
    pub is_sold_out: Option<bool>,
    pub is_cancelled: Option<bool>,
    pub description: Option<String>,
}

impl DiscoveredEvent {
    pub fn headliner(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or(&self.title)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchPreviewResult {
    pub venue_slug: String,
    pub events: Vec<PreviewEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Adapter-side working record. Adapters fill what their source exposes and
/// hand it to [`EventDraft::finish`], which is the only way a
/// [`DiscoveredEvent`] gets built.
#[derive(Clone, Debug, Default)]
pub struct EventDraft {
    pub id: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub image_url: Option<String>,
    pub doors_time: Option<String>,
    pub show_time: Option<String>,
    pub ticket_url: Option<String>,
    pub event_url: Option<String>,
    pub artists: Vec<String>,
    pub price: Option<String>,
    pub age_restriction: Option<String>,
    pub is_sold_out: Option<bool>,
    pub is_cancelled: Option<bool>,
    pub description: Option<String>,
}

impl EventDraft {
    pub fn new(id: impl Into<String>, title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn date_string(&self) -> String {
        self.date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }

    pub fn preview(&self, venue: &VenueConfig) -> PreviewEvent {
        PreviewEvent {
            id: self.id.clone(),
            title: self.title.clone(),
            date: self.date_string(),
            venue_display_name: venue.display_name.clone(),
        }
    }

    pub fn finish(self, venue: &VenueConfig) -> DiscoveredEvent {
        let date = self.date_string();
        let mut artists: Vec<String> = Vec::with_capacity(self.artists.len());
        for name in self.artists {
            let cleaned = text::clean_artist_name(&name);
            if cleaned.is_empty() || text::is_boilerplate(&cleaned) {
                continue;
            }
            if artists.iter().any(|seen| seen.eq_ignore_ascii_case(&cleaned)) {
                continue;
            }
            artists.push(cleaned);
        }
        if artists.is_empty() {
            artists = text::fallback_artists(&self.title);
        }

        DiscoveredEvent {
            id: self.id,
            title: self.title,
            date,
            venue_display_name: venue.display_name.clone(),
            venue_slug: venue.slug.clone(),
            image_url: self.image_url,
            doors_time: self.doors_time,
            show_time: self.show_time,
            ticket_url: self.ticket_url,
            event_url: self.event_url,
            artists,
            scraped_at: ids::next_scraped_at(),
            price: self.price,
            age_restriction: self.age_restriction,
            is_sold_out: self.is_sold_out,
            is_cancelled: self.is_cancelled,
            description: self.description,
        }
    }
}
