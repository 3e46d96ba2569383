use scraper::{ElementRef, Html, Selector};

use crate::normalize::text::{clean_text, decode_entities};

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().and_then(|node| {
        let cleaned = inner_text(node);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    })
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of every match, empty ones dropped, in document order.
pub fn all_texts(element: &ElementRef<'_>, selector: &Selector) -> Vec<String> {
    element
        .select(selector)
        .map(inner_text)
        .filter(|text| !text.is_empty())
        .collect()
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn has_match(element: &ElementRef<'_>, selector: &Selector) -> bool {
    element.select(selector).next().is_some()
}

/// Image source, honouring the lazy-loading attributes widgets commonly use.
pub fn image_src(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let img = element.select(selector).next()?;
    ["data-src", "data-lazy-src", "src"]
        .into_iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty() && !value.starts_with("data:"))
        .map(str::to_string)
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(href).ok().map(|u| u.to_string())
}

/// Raw bodies of every element matching `selector`, typically `<script>` tags.
pub fn script_bodies(document: &Html, selector: &Selector) -> Vec<String> {
    document
        .select(selector)
        .map(|script| script.text().collect::<String>())
        .filter(|body| !body.trim().is_empty())
        .collect()
}

/// Visible text of an HTML fragment, entities decoded and whitespace collapsed.
pub fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    clean_text(&decode_entities(&text))
}
