//! DOM heuristics: common title/price/image selectors, tried in order.
//!
//! Selector lists are embedded at compile time from
//! `heuristic_selectors.json`, so there is no runtime file I/O. This is the
//! weakest strategy and only runs when every structured signal is absent.

use std::sync::LazyLock;

use scraper::{ElementRef, Html};
use serde::Deserialize;
use url::Url;

use super::text::{
    declared_dimensions, detect_currency, element_image_url, element_text, element_value,
    is_hidden, non_empty, normalize_availability, parse_price, parse_selector, resolve_url,
};
use super::PartialRecord;

const SELECTORS_JSON: &str = include_str!("heuristic_selectors.json");

/// Minimum declared width and height for the largest-image fallback.
const MIN_FALLBACK_IMAGE_SIDE: f64 = 200.0;

#[derive(Debug, Default, Deserialize)]
struct HeuristicSelectors {
    title: Vec<String>,
    price: Vec<String>,
    original_price: Vec<String>,
    image: Vec<String>,
    description: Vec<String>,
    brand: Vec<String>,
    availability: Vec<String>,
}

static SELECTORS: LazyLock<HeuristicSelectors> = LazyLock::new(|| {
    serde_json::from_str(SELECTORS_JSON).unwrap_or_else(|e| {
        tracing::error!(error = %e, "heuristic selector table is invalid");
        HeuristicSelectors::default()
    })
});

pub fn extract(document: &Html, page_url: &Url) -> Option<PartialRecord> {
    let cfg = &*SELECTORS;
    let title = first_value(document, &cfg.title, element_text)?;

    let (price, price_text) = first_price(document, &cfg.price).unzip();
    let images = first_value(document, &cfg.image, |el| {
        element_image_url(el).unwrap_or_default()
    })
    .or_else(|| largest_image(document))
    .map(|src| vec![resolve_url(page_url, &src)])
    .unwrap_or_default();

    Some(PartialRecord {
        title: Some(title),
        description: first_value(document, &cfg.description, element_value),
        images,
        price,
        original_price: first_price(document, &cfg.original_price).map(|(p, _)| p),
        currency: price_text.as_deref().and_then(detect_currency),
        availability: first_value(document, &cfg.availability, |el| {
            el.value()
                .attr("href")
                .map(normalize_availability)
                .unwrap_or_else(|| element_value(el))
        }),
        brand: first_value(document, &cfg.brand, element_value),
        sku: None,
        url: None,
    })
}

/// First non-empty value produced by `read` over the selector list.
fn first_value<F>(document: &Html, selectors: &[String], read: F) -> Option<String>
where
    F: Fn(&ElementRef<'_>) -> String,
{
    selectors.iter().find_map(|css| {
        let sel = parse_selector(css)?;
        document
            .select(&sel)
            .filter(|el| !is_hidden(el))
            .find_map(|el| non_empty(read(&el)))
    })
}

/// First parseable price, with the text it came from (for currency).
fn first_price(document: &Html, selectors: &[String]) -> Option<(f64, String)> {
    selectors.iter().find_map(|css| {
        let sel = parse_selector(css)?;
        document.select(&sel).find_map(|el| {
            let text = el
                .value()
                .attr("content")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(&el));
            parse_price(&text).map(|p| (p, text))
        })
    })
}

/// The visible `<img>` with the largest declared area, at least 200×200.
fn largest_image(document: &Html) -> Option<String> {
    let sel = parse_selector("img")?;
    let mut best: Option<(f64, String)> = None;
    for img in document.select(&sel).filter(|el| !is_hidden(el)) {
        let (Some(w), Some(h)) = declared_dimensions(&img) else {
            continue;
        };
        if w < MIN_FALLBACK_IMAGE_SIDE || h < MIN_FALLBACK_IMAGE_SIDE {
            continue;
        }
        let Some(src) = element_image_url(&img) else {
            continue;
        };
        let area = w * h;
        if best.as_ref().map_or(true, |(a, _)| area > *a) {
            best = Some((area, src));
        }
    }
    best.map(|(_, src)| src)
}
