//! OpenGraph / product meta tag extraction.

use std::collections::HashMap;

use scraper::Html;
use url::Url;

use super::text::{
    collapse_whitespace, non_empty, normalize_availability, normalize_currency, parse_price,
    parse_selector, resolve_url,
};
use super::PartialRecord;

/// Read OpenGraph and `product:` meta tags. Only accepted when `og:title`
/// is present.
pub fn extract(document: &Html, page_url: &Url) -> Option<PartialRecord> {
    let tags = collect_meta(document);
    let title = tags.get("og:title").and_then(non_empty)?;

    let first = |keys: &[&str]| keys.iter().find_map(|k| tags.get(*k).and_then(non_empty));

    Some(PartialRecord {
        title: Some(title),
        description: first(&["og:description"]),
        images: first(&["og:image", "og:image:url", "og:image:secure_url"])
            .map(|src| vec![resolve_url(page_url, &src)])
            .unwrap_or_default(),
        price: first(&["product:price:amount", "og:price:amount"]).and_then(|p| parse_price(&p)),
        original_price: first(&["product:original_price:amount"]).and_then(|p| parse_price(&p)),
        currency: first(&["product:price:currency", "og:price:currency"])
            .and_then(|c| normalize_currency(&c)),
        availability: first(&["product:availability", "og:availability"])
            .map(|a| normalize_availability(&a)),
        brand: first(&["product:brand", "og:brand"]),
        sku: first(&["product:retailer_item_id"]),
        url: first(&["og:url"]).map(|u| resolve_url(page_url, &u)),
    })
}

/// First `content` per `property` (or `name`) key, lowercased.
fn collect_meta(document: &Html) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    let Some(sel) = parse_selector("meta[property], meta[name]") else {
        return tags;
    };
    for el in document.select(&sel) {
        let v = el.value();
        let Some(key) = v.attr("property").or_else(|| v.attr("name")) else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        if !(key.starts_with("og:") || key.starts_with("product:")) {
            continue;
        }
        if let Some(content) = v.attr("content") {
            tags.entry(key)
                .or_insert_with(|| collapse_whitespace(content));
        }
    }
    tags
}
