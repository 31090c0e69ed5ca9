//! Element handles and DOM inspection for the instrumented page.
//!
//! A handle is an element's position in document order. Parsing the same HTML
//! always yields the same order, so a host can resolve handles against its own
//! parse of the page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use url::Url;

use super::messages::{ElementType, Rect};
use crate::extract::text::{
    declared_dimensions, element_image_url, element_text, inline_style, is_hidden, parse_selector,
    resolve_url, truncate_chars,
};

/// Tags that never take part in hover or click.
pub const IGNORED_TAGS: &[&str] = &[
    "script", "style", "svg", "path", "meta", "link", "noscript", "head", "br", "hr", "iframe",
    "template", "html", "title", "base", "object", "embed", "canvas", "source", "track",
];

/// Elements declared smaller than this on either side are not selectable.
pub const MIN_SELECTABLE_SIDE: f64 = 10.0;

const PREVIEW_CHARS: usize = 120;

static PRICE_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:[$\u{20AC}\u{00A3}\u{00A5}\u{20B9}]|\b(?:usd|eur|gbp|cad|aud|jpy|inr|chf)\b)\s*\d[\d.,\s]*|\d[\d.,\s]*\s*(?:[$\u{20AC}\u{00A3}\u{00A5}\u{20B9}]|\b(?:usd|eur|gbp|cad|aud|jpy|inr|chf)\b))\s*$",
    )
    .expect("price text regex is valid")
});

static BACKGROUND_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("background url regex is valid")
});

/// Document-order index of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub usize);

/// All elements in document order.
pub fn elements(document: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    document.root_element().descendants().filter_map(ElementRef::wrap)
}

pub fn element_at(document: &Html, handle: ElementHandle) -> Option<ElementRef<'_>> {
    elements(document).nth(handle.0)
}

pub fn handle_of(document: &Html, el: ElementRef<'_>) -> Option<ElementHandle> {
    elements(document).position(|e| e == el).map(ElementHandle)
}

/// Handles of every element matching `css`, in document order.
pub fn find(document: &Html, css: &str) -> Vec<ElementHandle> {
    let Some(sel) = parse_selector(css) else {
        return Vec::new();
    };
    elements(document)
        .enumerate()
        .filter(|(_, el)| sel.matches(el))
        .map(|(i, _)| ElementHandle(i))
        .collect()
}

fn background_image(el: &ElementRef<'_>) -> Option<String> {
    let style = inline_style(el, "background-image").or_else(|| inline_style(el, "background"))?;
    BACKGROUND_URL_RE
        .captures(&style)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn contains_img(el: &ElementRef<'_>) -> bool {
    parse_selector("img").is_some_and(|sel| el.select(&sel).next().is_some())
}

/// Classify an element as image, price or plain text.
pub fn classify(el: &ElementRef<'_>) -> ElementType {
    let name = el.value().name();
    if name == "img" || (name == "a" && contains_img(el)) || background_image(el).is_some() {
        return ElementType::Image;
    }
    let text = element_text(el);
    if text.chars().count() <= 40 && PRICE_TEXT_RE.is_match(&text) {
        ElementType::Price
    } else {
        ElementType::Text
    }
}

/// Whether pointer events on this element are reported at all.
pub fn is_selectable(el: &ElementRef<'_>) -> bool {
    let name = el.value().name();
    if IGNORED_TAGS.contains(&name) || is_hidden(el) {
        return false;
    }
    let (w, h) = declared_dimensions(el);
    if w.is_some_and(|w| w < MIN_SELECTABLE_SIDE) || h.is_some_and(|h| h < MIN_SELECTABLE_SIDE) {
        return false;
    }
    name == "img"
        || !element_text(el).is_empty()
        || contains_img(el)
        || background_image(el).is_some()
}

/// Short human-readable preview: image URL for images, text otherwise.
pub fn preview(el: &ElementRef<'_>, base_url: &Url) -> String {
    match classify(el) {
        ElementType::Image => element_image_url(el)
            .or_else(|| background_image(el))
            .map(|src| resolve_url(base_url, &src))
            .unwrap_or_default(),
        _ => truncate_chars(&element_text(el), PREVIEW_CHARS).to_string(),
    }
}

pub fn rect(el: &ElementRef<'_>) -> Rect {
    let (w, h) = declared_dimensions(el);
    Rect {
        x: 0.0,
        y: 0.0,
        width: w.unwrap_or(0.0),
        height: h.unwrap_or(0.0),
    }
}

/// Element children only.
pub fn child_elements<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

pub fn parent_element<'a>(el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.parent().and_then(ElementRef::wrap)
}
