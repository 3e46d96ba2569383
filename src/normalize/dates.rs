use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use super::text::clean_text;

/// Month-day text resolving further than this into the past under the
/// current year is assumed to belong to next year.
const PAST_TOLERANCE_DAYS: i64 = 60;

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso date regex"));
static NUMERIC_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?\b").expect("numeric date regex")
});
static MONTH_FIRST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4}))?",
    )
    .expect("month first regex")
});
static DAY_FIRST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?(?:,?\s+(\d{4}))?",
    )
    .expect("day first regex")
});
static MERIDIEM_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:[:.](\d{2}))?\s*([ap])\.?\s*m\b\.?").expect("time regex")
});
static CLOCK_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").expect("24h time regex"));

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Places a year-less month/day relative to `today`: the current year unless
/// that lands more than ~2 months in the past, in which case next year.
pub fn resolve_year(month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    let cutoff = today - Duration::days(PAST_TOLERANCE_DAYS);
    if let Some(candidate) = NaiveDate::from_ymd_opt(today.year(), month, day) {
        if candidate >= cutoff {
            return Some(candidate);
        }
    }
    NaiveDate::from_ymd_opt(today.year() + 1, month, day)
}

fn with_optional_year(month: u32, day: u32, year: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(raw) => {
            let mut year: i32 = raw.parse().ok()?;
            if raw.len() == 2 {
                year += 2000;
            }
            NaiveDate::from_ymd_opt(year, month, day)
        }
        None => resolve_year(month, day, today),
    }
}

/// Parses listing date text ("Tue Oct 7, 2025", "October 5", "17th Oct",
/// "10/8/2025", "2025-10-08") into a calendar date.
pub fn parse_event_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let cleaned = clean_text(input);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_DATE_RE.captures(&cleaned) {
        let year = caps.get(1)?.as_str().parse().ok()?;
        let month = caps.get(2)?.as_str().parse().ok()?;
        let day = caps.get(3)?.as_str().parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = MONTH_FIRST_RE.captures(&cleaned) {
        let month = month_number(caps.get(1)?.as_str())?;
        let day = caps.get(2)?.as_str().parse().ok()?;
        return with_optional_year(month, day, caps.get(3).map(|m| m.as_str()), today);
    }

    if let Some(caps) = DAY_FIRST_RE.captures(&cleaned) {
        let day = caps.get(1)?.as_str().parse().ok()?;
        let month = month_number(caps.get(2)?.as_str())?;
        return with_optional_year(month, day, caps.get(3).map(|m| m.as_str()), today);
    }

    if let Some(caps) = NUMERIC_DATE_RE.captures(&cleaned) {
        let month = caps.get(1)?.as_str().parse().ok()?;
        let day = caps.get(2)?.as_str().parse().ok()?;
        return with_optional_year(month, day, caps.get(3).map(|m| m.as_str()), today);
    }

    None
}

/// Finds the first clock time in free text and renders it as `H:MM AM/PM`.
pub fn find_first_time(text: &str) -> Option<String> {
    first_naive_time(text).map(format_time)
}

pub fn first_naive_time(text: &str) -> Option<NaiveTime> {
    let cleaned = clean_text(text);
    let lowered = cleaned.to_lowercase();
    if let Some(caps) = MERIDIEM_TIME_RE.captures(&cleaned) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = caps.get(3)?.as_str().eq_ignore_ascii_case("p");
        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        return NaiveTime::from_hms_opt(hour24, minute, 0);
    }
    if let Some(caps) = CLOCK_TIME_RE.captures(&cleaned) {
        let hour = caps.get(1)?.as_str().parse().ok()?;
        let minute = caps.get(2)?.as_str().parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    if lowered.contains("noon") {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    if lowered.contains("midnight") {
        return NaiveTime::from_hms_opt(0, 0, 0);
    }
    None
}

/// Returns the time in the segment of `text` that mentions `keyword`, e.g.
/// `parse_named_time("Doors 7pm / Show 8pm", "show")`.
pub fn parse_named_time(text: &str, keyword: &str) -> Option<String> {
    let lowered = keyword.to_lowercase();
    for segment in text.split(['|', '/', ';', ',', '\n']) {
        let segment_clean = clean_text(segment);
        if segment_clean.is_empty() {
            continue;
        }
        if segment_clean.to_lowercase().contains(&lowered) {
            if let Some(time) = find_first_time(&segment_clean) {
                return Some(time);
            }
        }
    }
    None
}

/// Splits a machine timestamp into a venue-local date and optional
/// `H:MM AM/PM` time. Offset timestamps convert to `tz` when one is known,
/// otherwise their own wall-clock reading is kept.
pub fn split_timestamp(raw: &str, tz: Option<Tz>) -> Option<(NaiveDate, Option<String>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let with_offset = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%z"));
    if let Ok(parsed) = with_offset {
        let local = match tz {
            Some(tz) => parsed.with_timezone(&tz).naive_local(),
            None => parsed.naive_local(),
        };
        return Some((local.date(), Some(format_time(local.time()))));
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some((naive.date(), Some(format_time(naive.time()))));
        }
    }

    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d")
        .ok()
        .map(|date| (date, None))
}

/// Epoch seconds rendered in the venue's zone (UTC when unknown).
pub fn split_epoch(seconds: i64, tz: Option<Tz>) -> Option<(NaiveDate, Option<String>)> {
    let utc = Utc.timestamp_opt(seconds, 0).single()?;
    let local = match tz {
        Some(tz) => utc.with_timezone(&tz).naive_local(),
        None => utc.naive_utc(),
    };
    Some((local.date(), Some(format_time(local.time()))))
}

pub fn today_local() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn parses_listing_shapes_to_iso() {
        let today = day(2025, 9, 20);
        let cases = [
            ("Tue Oct 7, 2025", "2025-10-07"),
            ("October 5", "2025-10-05"),
            ("Fri, Oct 17th", "2025-10-17"),
            ("17 Oct", "2025-10-17"),
            ("Saturday 4th October 2025", "2025-10-04"),
            ("10/8/2025", "2025-10-08"),
            ("10/8/25", "2025-10-08"),
            ("10/8", "2025-10-08"),
            ("2025-11-02", "2025-11-02"),
            ("Sept. 30", "2025-09-30"),
        ];
        for (input, expected) in cases {
            let parsed = parse_event_date(input, today).map(format_date);
            assert_eq!(parsed.as_deref(), Some(expected), "input {input:?}");
        }
    }

    #[test]
    fn rolls_over_when_more_than_two_months_past() {
        let today = day(2025, 12, 10);
        assert_eq!(parse_event_date("Jan 15", today), Some(day(2026, 1, 15)));
        assert_eq!(parse_event_date("Sep 1", today), Some(day(2026, 9, 1)));
        // recently past stays in the current year
        assert_eq!(parse_event_date("Nov 20", today), Some(day(2025, 11, 20)));
    }

    #[test]
    fn resolve_year_skips_invalid_leap_day() {
        let today = day(2027, 2, 1);
        assert_eq!(resolve_year(2, 29, today), Some(day(2028, 2, 29)));
        assert_eq!(resolve_year(2, 30, today), None);
    }

    #[test]
    fn rejects_text_without_a_date() {
        assert_eq!(parse_event_date("TBA", day(2025, 1, 1)), None);
        assert_eq!(parse_event_date("   ", day(2025, 1, 1)), None);
    }

    #[test]
    fn normalizes_clock_strings() {
        assert_eq!(find_first_time("7pm").as_deref(), Some("7:00 PM"));
        assert_eq!(find_first_time("Doors: 6:30 pm").as_deref(), Some("6:30 PM"));
        assert_eq!(find_first_time("8 p.m.").as_deref(), Some("8:00 PM"));
        assert_eq!(find_first_time("12:15am").as_deref(), Some("12:15 AM"));
        assert_eq!(find_first_time("19:30").as_deref(), Some("7:30 PM"));
        assert_eq!(find_first_time("noon matinee").as_deref(), Some("12:00 PM"));
        assert_eq!(find_first_time("all night long"), None);
    }

    #[test]
    fn named_time_picks_the_matching_segment() {
        let block = "Doors 7pm / Show 8:30pm";
        assert_eq!(parse_named_time(block, "show").as_deref(), Some("8:30 PM"));
        assert_eq!(parse_named_time(block, "door").as_deref(), Some("7:00 PM"));
        assert_eq!(parse_named_time(block, "close"), None);
    }

    #[test]
    fn splits_timestamps_with_and_without_offsets() {
        let (date, time) = split_timestamp("2025-10-07T20:00:00-06:00", None).expect("offset");
        assert_eq!(format_date(date), "2025-10-07");
        assert_eq!(time.as_deref(), Some("8:00 PM"));

        let (date, time) =
            split_timestamp("2025-10-08T02:00:00Z", Some(chrono_tz::America::Boise)).expect("utc");
        assert_eq!(format_date(date), "2025-10-07");
        assert_eq!(time.as_deref(), Some("8:00 PM"));

        let (date, time) = split_timestamp("2025-10-07 19:30:00", None).expect("naive");
        assert_eq!(format_date(date), "2025-10-07");
        assert_eq!(time.as_deref(), Some("7:30 PM"));

        let (date, time) = split_timestamp("2025-10-07", None).expect("date only");
        assert_eq!(format_date(date), "2025-10-07");
        assert!(time.is_none());

        assert!(split_timestamp("next tuesday", None).is_none());
    }

    #[test]
    fn splits_epoch_into_venue_time() {
        // 2025-10-08T02:00:00Z
        let (date, time) = split_epoch(1_759_888_800, Some(chrono_tz::America::Boise)).expect("epoch");
        assert_eq!(format_date(date), "2025-10-07");
        assert_eq!(time.as_deref(), Some("8:00 PM"));
    }
}
