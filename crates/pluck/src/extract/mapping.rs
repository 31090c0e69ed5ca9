//! Apply a crowd-taught [`SiteMapping`] to a document.
//!
//! Missing fields are simply omitted. When the mapping carries a `row`
//! selector the other selectors are relative to a row element.

use scraper::{ElementRef, Html};
use url::Url;

use super::text::{
    detect_currency, element_image_url, element_text, element_value, non_empty,
    normalize_availability, normalize_currency, parse_price, parse_selector, resolve_url,
};
use super::PartialRecord;
use crate::types::{FieldName, SelectorValue, SiteMapping};

/// Apply the mapping to the whole page, or to the first row when the mapping
/// is a catalog mapping.
pub fn extract(document: &Html, page_url: &Url, mapping: &SiteMapping) -> Option<PartialRecord> {
    let scope = match mapping.selectors.get(&FieldName::Row) {
        Some(row) => first_match(document.root_element(), row)?,
        None => document.root_element(),
    };
    Some(apply(scope, page_url, mapping))
}

/// Every row element of a catalog mapping, each read with the relative
/// selectors. Empty when the mapping has no `row` selector.
pub fn extract_rows(document: &Html, page_url: &Url, mapping: &SiteMapping) -> Vec<PartialRecord> {
    let Some(row) = mapping.selectors.get(&FieldName::Row) else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    for css in row.as_slice() {
        let Some(sel) = parse_selector(css) else {
            continue;
        };
        rows.extend(document.select(&sel));
    }
    rows.into_iter()
        .map(|row_el| apply(row_el, page_url, mapping))
        .collect()
}

fn first_match<'a>(scope: ElementRef<'a>, value: &SelectorValue) -> Option<ElementRef<'a>> {
    value.as_slice().iter().find_map(|css| {
        let sel = parse_selector(css)?;
        scope.select(&sel).next()
    })
}

/// All matches of every selector, in selector order.
fn all_matches<'a>(scope: ElementRef<'a>, value: &SelectorValue) -> Vec<ElementRef<'a>> {
    value
        .as_slice()
        .iter()
        .filter_map(|css| parse_selector(css))
        .flat_map(|sel| scope.select(&sel).collect::<Vec<_>>())
        .collect()
}

fn apply(scope: ElementRef<'_>, page_url: &Url, mapping: &SiteMapping) -> PartialRecord {
    let mut record = PartialRecord::default();
    let mut price_text = None;

    for (field, value) in &mapping.selectors {
        match field {
            FieldName::Row => {}
            FieldName::Image => {
                for el in all_matches(scope, value) {
                    if let Some(src) = element_image_url(&el) {
                        let resolved = resolve_url(page_url, &src);
                        if !record.images.contains(&resolved) {
                            record.images.push(resolved);
                        }
                    }
                }
            }
            FieldName::Price => {
                if let Some((price, text)) = first_price(scope, value) {
                    record.price = Some(price);
                    price_text = Some(text);
                }
            }
            FieldName::OriginalPrice => {
                record.original_price = first_price(scope, value).map(|(p, _)| p);
            }
            FieldName::Title => record.title = text_of(scope, value),
            FieldName::Description => record.description = text_of(scope, value),
            FieldName::Brand => record.brand = text_of(scope, value),
            FieldName::Sku => record.sku = text_of(scope, value),
            FieldName::Availability => {
                record.availability = text_of(scope, value).map(|a| normalize_availability(&a));
            }
            FieldName::Currency => {
                record.currency = text_of(scope, value).and_then(|c| normalize_currency(&c));
            }
        }
    }

    if record.currency.is_none() {
        record.currency = price_text.as_deref().and_then(detect_currency);
    }
    record
}

fn text_of(scope: ElementRef<'_>, value: &SelectorValue) -> Option<String> {
    all_matches(scope, value)
        .iter()
        .find_map(|el| non_empty(element_value(el)))
}

fn first_price(scope: ElementRef<'_>, value: &SelectorValue) -> Option<(f64, String)> {
    all_matches(scope, value).iter().find_map(|el| {
        let text = el
            .value()
            .attr("content")
            .map(str::to_string)
            .unwrap_or_else(|| element_text(el));
        parse_price(&text).map(|p| (p, text))
    })
}
