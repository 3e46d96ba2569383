use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::text::{decode_entities, strip_status_markers};

struct UrlIdPattern {
    provider: &'static str,
    regex: Regex,
}

static URL_ID_PATTERNS: Lazy<Vec<UrlIdPattern>> = Lazy::new(|| {
    [
        ("ticketmaster", r"(?i)(?:ticketmaster|livenation)\.[a-z.]+/.*?event/([0-9A-F]{16})\b"),
        ("eventbrite", r"(?i)eventbrite\.[a-z.]+/e/[^?#]*?-?tickets-(\d{6,})"),
        ("etix", r"(?i)etix\.com/ticket/[a-z]/(\d+)"),
        ("dice", r"(?i)dice\.fm/event/([a-z0-9]+)-"),
        ("ticketweb", r"(?i)ticketweb\.[a-z.]+/event/[^/?#]+/(\d+)"),
        ("axs", r"(?i)axs\.com/(?:[a-z]{2}/)?events/(\d+)"),
        ("seetickets", r"(?i)seetickets\.[a-z.]+/event/[^/?#]+/[^/?#]+/(\d+)"),
        ("prekindle", r"(?i)prekindle\.com/(?:promo/)?event/(\d+)"),
        ("query", r"(?i)[?&](?:event_?id|eid)=([A-Za-z0-9_-]+)"),
    ]
    .into_iter()
    .map(|(provider, pattern)| UrlIdPattern {
        provider,
        regex: Regex::new(pattern).expect("url id regex"),
    })
    .collect()
});

static NON_ALNUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("non alnum regex"));

/// Canonical ticket-provider ID embedded in a detail or ticket URL, namespaced
/// by provider (`ticketmaster-1E0062D4A10A4465`).
pub fn url_event_id(url: &str) -> Option<String> {
    URL_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .regex
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|id| format!("{}-{}", pattern.provider, id.as_str()))
    })
}

pub fn normalized_title_key(title: &str) -> String {
    let (stripped, _) = strip_status_markers(&decode_entities(title));
    let lowered = stripped.to_lowercase();
    NON_ALNUM_RE
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic ID for events without an upstream identifier. Two listings
/// with the same normalized title on the same date share an ID.
pub fn stable_event_id(title: &str, date: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_title_key(title).as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("evt-{}", &digest[..16])
}

/// URL-embedded ID from the first URL that carries one, else the title+date hash.
pub fn derive_event_id<'a>(
    urls: impl IntoIterator<Item = Option<&'a str>>,
    title: &str,
    date: NaiveDate,
) -> String {
    urls.into_iter()
        .flatten()
        .find_map(url_event_id)
        .unwrap_or_else(|| stable_event_id(title, date))
}

static LAST_STAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Extraction timestamp that strictly increases within the process, even when
/// the wall clock stalls or steps backwards.
pub fn next_scraped_at() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut previous = LAST_STAMP_MICROS.load(Ordering::SeqCst);
    loop {
        let candidate = if now > previous { now } else { previous + 1 };
        match LAST_STAMP_MICROS.compare_exchange(previous, candidate, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                let secs = candidate.div_euclid(1_000_000);
                let nanos = (candidate.rem_euclid(1_000_000) * 1_000) as u32;
                return Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now);
            }
            Err(actual) => previous = actual,
        }
    }
}
