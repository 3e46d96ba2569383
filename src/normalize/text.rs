use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#\d+|[a-zA-Z]+);").expect("entity regex"));
static STATUS_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[*\[(]*\s*\b(sold[\s-]?out|cancell?ed)\b\s*[!*\])]*\s*[:|]?")
        .expect("status marker regex")
});
static CONTEXT_PAREN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[(\[][^)\]]*(?:\b(?:album|ep|lp|record|single|release|farewell|tour|show|anniversary|reunion|residency|night|celebration|party|acoustic|set|performance|debut|homecoming|benefit|tribute|matinee|live|ages)\b|\d{2}\s*\+)[^)\]]*[)\]]\s*$",
    )
    .expect("context paren regex")
});
static CONTEXT_DASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+[-–—]\s+[^-–—]*\b(?:album release|record release|ep release|release show|farewell|anniversary|tour)\b.*$",
    )
    .expect("context dash regex")
});
static LEADING_CONNECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:with|featuring|feat|ft|plus)\b\.?|w/|support(?:ing)?(?:\s+acts?)?:|special\s+guests?:)\s*",
    )
    .expect("leading connector regex")
});
static ACT_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[,;]\s*|\s+and\s+|\s+&\s+|\s+\+\s+|\s+w/\s*|\s+with\s+")
        .expect("act separator regex")
});
static BOILERPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:and\s+)?(?:(?:very\s+)?special\s+guests?|more\s+tba|tba|tbd|more|and\s+more|friends|guests?|more\s+to\s+be\s+announced|to\s+be\s+announced|support|local\s+support)$",
    )
    .expect("boilerplate regex")
});
static WITH_CLAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:with|w/|featuring|feat\.|ft\.)\s+([^.\n;!?]+)").expect("with clause regex")
});
static TITLE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(?:w/|with|featuring|feat\.|ft\.)\s+").expect("title split regex")
});
static DANGLING_CONNECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s(?:w/?|with|feat\.?|ft\.?|featuring|presents|and|&)|[:\-–])\s*$")
        .expect("dangling connector regex")
});
static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*(\d+(?:\.\d{1,2})?)").expect("price regex"));
static AGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{2})\s*(?:\+|and\s+over|&\s+over|and\s+up|or\s+older|\s*plus)")
        .expect("age regex")
});

const CONNECTOR_WORDS: [&str; 19] = [
    "a", "an", "and", "as", "at", "but", "by", "for", "from", "in", "nor", "of", "on", "or",
    "the", "to", "with", "w/", "vs.",
];

const FORCED_CASE: [(&str, &str); 8] = [
    ("dj", "DJ"),
    ("mc", "MC"),
    ("vs", "vs."),
    ("vs.", "vs."),
    ("ft.", "ft."),
    ("feat.", "feat."),
    ("w/", "w/"),
    ("djs", "DJs"),
];

pub fn clean_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Decodes named and numeric HTML entities that survive in JSON payloads and
/// attribute values. Unknown names are left as written.
pub fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let raw = &caps[1];
            let decoded = if let Some(hex) = raw.strip_prefix("#x").or_else(|| raw.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = raw.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(raw)
            };
            match decoded {
                Some(ch) => ch.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '–',
        "mdash" => '—',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "hellip" => '…',
        "eacute" => 'é',
        "iacute" => 'í',
        "aacute" => 'á',
        "oacute" => 'ó',
        "uuml" => 'ü',
        "ouml" => 'ö',
        "ntilde" => 'ñ',
        _ => return None,
    };
    Some(ch)
}

/// Word-capitalizes shouted or all-lowercase text. Anything already in mixed
/// case is returned untouched so stylized names survive.
pub fn title_case(input: &str) -> String {
    let cleaned = clean_text(input);
    let has_upper = cleaned.chars().any(char::is_uppercase);
    let has_lower = cleaned.chars().any(char::is_lowercase);
    if has_upper && has_lower {
        return cleaned;
    }

    cleaned
        .split(' ')
        .enumerate()
        .map(|(index, word)| {
            let lower = word.to_lowercase();
            if let Some((_, forced)) = FORCED_CASE.iter().find(|(key, _)| *key == lower) {
                return forced.to_string();
            }
            if index > 0 && CONNECTOR_WORDS.contains(&lower.as_str()) {
                return lower;
            }
            capitalize_first_letter(&lower)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize_first_letter(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut done = false;
    for ch in word.chars() {
        if !done && ch.is_alphabetic() {
            out.extend(ch.to_uppercase());
            done = true;
        } else {
            out.push(ch);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusMarkers {
    pub sold_out: bool,
    pub cancelled: bool,
}

/// Removes inline "*SOLD OUT*" / "CANCELLED:" style markers and reports which
/// were present.
pub fn strip_status_markers(input: &str) -> (String, StatusMarkers) {
    let mut markers = StatusMarkers::default();
    for caps in STATUS_MARKER_RE.captures_iter(input) {
        let word = caps[1].to_lowercase();
        if word.starts_with("sold") {
            markers.sold_out = true;
        } else {
            markers.cancelled = true;
        }
    }
    if !markers.sold_out && !markers.cancelled {
        return (clean_text(input), markers);
    }
    let stripped = STATUS_MARKER_RE.replace_all(input, " ");
    (trim_separators(&clean_text(&stripped)), markers)
}

fn trim_separators(input: &str) -> String {
    input
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—' | ':' | '|' | '*' | ','))
        .to_string()
}

/// Strips parenthetical or dashed event-context suffixes ("(Album Release)",
/// "- Farewell Tour") and status markers from a performer name.
pub fn clean_artist_name(input: &str) -> String {
    let (mut name, _) = strip_status_markers(&decode_entities(input));
    loop {
        let next = CONTEXT_PAREN_RE.replace(&name, "").into_owned();
        let next = CONTEXT_DASH_RE.replace(&next, "").into_owned();
        let next = trim_separators(&clean_text(&next));
        if next == name {
            break;
        }
        name = next;
    }
    name
}

/// Placeholder billing such as "special guests", "TBA" or "and more".
pub fn is_boilerplate(name: &str) -> bool {
    BOILERPLATE_RE.is_match(name.trim())
}

/// Splits a free-text supporting-act line ("with Chase Petra, Deeveaux and
/// special guests") into names, dropping boilerplate.
pub fn split_supporting_acts(text: &str) -> Vec<String> {
    let decoded = clean_text(&decode_entities(text));
    let body = LEADING_CONNECTOR_RE.replace(&decoded, "");
    ACT_SEPARATOR_RE
        .split(&body)
        .map(|part| clean_artist_name(part.trim_start_matches("and ")))
        .filter(|part| !part.is_empty() && !is_boilerplate(part))
        .collect()
}

/// Pulls "with X, Y and Z" / "featuring X" out of prose. Fragments that read
/// like sentences rather than names are discarded.
pub fn extract_with_clause(text: &str) -> Vec<String> {
    let decoded = decode_entities(text);
    let Some(caps) = WITH_CLAUSE_RE.captures(&decoded) else {
        return Vec::new();
    };
    split_supporting_acts(&caps[1])
        .into_iter()
        .filter(|name| {
            let starts_upper = name
                .chars()
                .next()
                .map(|c| c.is_uppercase() || c.is_ascii_digit())
                .unwrap_or(false);
            starts_upper && name.split_whitespace().count() <= 6
        })
        .collect()
}

/// Headlining act implied by a billing title: the part before "w/", "with",
/// "featuring".
pub fn headliner_from_title(title: &str) -> String {
    let (stripped, _) = strip_status_markers(&decode_entities(title));
    let head = TITLE_SPLIT_RE
        .split(&stripped)
        .next()
        .unwrap_or(stripped.as_str())
        .to_string();
    clean_artist_name(&head)
}

/// Last-resort artist list derived from the title; never empty.
pub fn fallback_artists(title: &str) -> Vec<String> {
    let cleaned = clean_artist_name(title);
    if !cleaned.is_empty() {
        return vec![cleaned];
    }
    let raw = clean_text(title);
    if !raw.is_empty() {
        return vec![raw];
    }
    vec!["Unknown Artist".to_string()]
}

/// True when the first performer slot holds event-series branding rather
/// than an act: a label cut off at a dangling connector ("FREE MONDAY w"), or
/// the "Series:" prefix of the title.
pub fn is_series_label(candidate: &str, title: &str) -> bool {
    let candidate = clean_text(candidate);
    if candidate.is_empty() {
        return true;
    }
    if DANGLING_CONNECTOR_RE.is_match(&candidate) {
        return true;
    }
    let (title, _) = strip_status_markers(title);
    match title.split_once(": ") {
        Some((prefix, rest)) if !rest.trim().is_empty() => {
            clean_text(prefix).eq_ignore_ascii_case(&candidate)
        }
        _ => false,
    }
}

pub fn format_price(low: f64, high: Option<f64>) -> Option<String> {
    if !low.is_finite() || low < 0.0 {
        return None;
    }
    let high = high.filter(|h| h.is_finite() && *h > low);
    if low == 0.0 && high.is_none() {
        return Some("Free".to_string());
    }
    let render = |amount: f64| {
        if amount.fract() == 0.0 {
            format!("${amount:.0}")
        } else {
            format!("${amount:.2}")
        }
    };
    Some(match high {
        Some(high) => format!("{} - {}", render(low), render(high)),
        None => render(low),
    })
}

/// "$15 adv / $18 dos" -> "$15 - $18"; "FREE" -> "Free".
pub fn normalize_price(text: &str) -> Option<String> {
    let amounts: Vec<f64> = PRICE_RE
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .collect();
    if amounts.is_empty() {
        return text.to_lowercase().contains("free").then(|| "Free".to_string());
    }
    let low = amounts.iter().cloned().fold(f64::INFINITY, f64::min);
    let high = amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    format_price(low, Some(high))
}

/// Maps age-policy text to "All Ages" or "NN+".
pub fn normalize_age(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if lower.contains("all ages") || lower.contains("all-ages") {
        return Some("All Ages".to_string());
    }
    AGE_RE
        .captures(&lower)
        .map(|caps| format!("{}+", &caps[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(decode_entities("Simon &amp; Garfunkel"), "Simon & Garfunkel");
        assert_eq!(decode_entities("Rock &#8217;n&#x27; Roll"), "Rock ’n' Roll");
        assert_eq!(decode_entities("Caf&eacute; &bogus;"), "Café &bogus;");
    }

    #[test]
    fn title_case_respects_mixed_case_and_exceptions() {
        assert_eq!(title_case("THE WAR ON DRUGS"), "The War on Drugs");
        assert_eq!(title_case("dj shadow vs mc lars"), "DJ Shadow vs. MC Lars");
        assert_eq!(title_case("of monsters and men"), "Of Monsters and Men");
        assert_eq!(title_case("deadmau5 x KAYTRANADA"), "deadmau5 x KAYTRANADA");
        assert_eq!(title_case("CHVRCHES"), "Chvrches");
    }

    #[test]
    fn strips_status_markers_and_reports_them() {
        let (title, markers) = strip_status_markers("*SOLD OUT* Some Band");
        assert_eq!(title, "Some Band");
        assert!(markers.sold_out && !markers.cancelled);

        let (title, markers) = strip_status_markers("CANCELLED: Night Moves");
        assert_eq!(title, "Night Moves");
        assert!(markers.cancelled);

        let (title, markers) = strip_status_markers("Moon Taxi (Sold-Out)");
        assert_eq!(title, "Moon Taxi");
        assert!(markers.sold_out);

        let (title, markers) = strip_status_markers("The Outsiders");
        assert_eq!(title, "The Outsiders");
        assert_eq!(markers, StatusMarkers::default());
    }

    #[test]
    fn artist_cleanup_drops_event_context_suffixes() {
        assert_eq!(clean_artist_name("PUP (Album Release Show)"), "PUP");
        assert_eq!(clean_artist_name("Built to Spill (Farewell Show) (21+)"), "Built to Spill");
        assert_eq!(clean_artist_name("Hop Along - Record Release"), "Hop Along");
        assert_eq!(clean_artist_name("Sunn O))) "), "Sunn O)))");
        assert_eq!(clean_artist_name("Tune-Yards (US)"), "Tune-Yards (US)");
    }

    #[test]
    fn supporting_acts_split_and_filter_boilerplate() {
        assert_eq!(split_supporting_acts("Withered Hand"), vec!["Withered Hand"]);
        assert_eq!(
            split_supporting_acts("with Chase Petra, Deeveaux and special guests"),
            vec!["Chase Petra", "Deeveaux"]
        );
        assert_eq!(
            split_supporting_acts("w/ Skeletal Remains & Tomb Mold + TBA"),
            vec!["Skeletal Remains", "Tomb Mold"]
        );
        assert!(split_supporting_acts("Special Guests").is_empty());
    }

    #[test]
    fn boilerplate_names_are_recognised() {
        for name in ["Special Guests", "TBA", "Tba", " and more ", "Very Special Guest", "local support"] {
            assert!(is_boilerplate(name), "{name}");
        }
        for name in ["Moon Taxi", "The Guest List", "Support Group", "Friends of Dean Martinez"] {
            assert!(!is_boilerplate(name), "{name}");
        }
    }

    #[test]
    fn with_clause_reads_prose() {
        assert_eq!(
            extract_with_clause("An evening with Japanese Breakfast, Ginger Root and friends. Doors at 7."),
            vec!["Japanese Breakfast", "Ginger Root"]
        );
        assert_eq!(
            extract_with_clause("Featuring Nubya Garcia"),
            vec!["Nubya Garcia"]
        );
        assert!(extract_with_clause("come hang out with us for a night of dancing").is_empty());
    }

    #[test]
    fn headliner_and_fallback_come_from_title() {
        assert_eq!(headliner_from_title("Desert Dwellers w/ David Starfire"), "Desert Dwellers");
        assert_eq!(headliner_from_title("*SOLD OUT* Moon Taxi with Kat"), "Moon Taxi");
        assert_eq!(fallback_artists("PUP (Album Release Show)"), vec!["PUP"]);
        assert_eq!(fallback_artists("   "), vec!["Unknown Artist"]);
    }

    #[test]
    fn detects_series_labels() {
        assert!(is_series_label("FREE MONDAY w", "FREE MONDAY w/ Daytrotter Sessions"));
        assert!(is_series_label("Jazz Night:", "Jazz Night: The Trio"));
        assert!(is_series_label("Jazz Night", "Jazz Night: The Trio"));
        assert!(!is_series_label("Band A", "Band A w/ Band B"));
        assert!(!is_series_label("Daytrotter Sessions", "FREE MONDAY w/ Daytrotter Sessions"));
    }

    #[test]
    fn normalizes_prices_and_ages() {
        assert_eq!(normalize_price("$15 adv / $18 dos").as_deref(), Some("$15 - $18"));
        assert_eq!(normalize_price("Tickets: $12.50").as_deref(), Some("$12.50"));
        assert_eq!(normalize_price("FREE SHOW").as_deref(), Some("Free"));
        assert_eq!(normalize_price("Donations"), None);
        assert_eq!(format_price(0.0, None).as_deref(), Some("Free"));
        assert_eq!(format_price(20.0, Some(35.0)).as_deref(), Some("$20 - $35"));

        assert_eq!(normalize_age("All Ages").as_deref(), Some("All Ages"));
        assert_eq!(normalize_age("21+ w/ valid ID").as_deref(), Some("21+"));
        assert_eq!(normalize_age("18 and over").as_deref(), Some("18+"));
        assert_eq!(normalize_age("Seated show"), None);
    }
}
