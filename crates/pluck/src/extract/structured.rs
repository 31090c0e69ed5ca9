//! JSON-LD (schema.org `Product`) extraction.
//!
//! Every `<script type="application/ld+json">` block is parsed on its own; a
//! malformed block is skipped and the search continues with the next one.

use scraper::Html;
use serde_json::Value;
use url::Url;

use super::text::{
    non_empty, normalize_availability, normalize_currency, parse_price, parse_selector,
    resolve_url,
};
use super::PartialRecord;

/// Find the first `Product` item across all JSON-LD blocks.
pub fn extract(document: &Html, page_url: &Url) -> Option<PartialRecord> {
    let sel = parse_selector(r#"script[type="application/ld+json"]"#)?;
    for (index, script) in document.select(&sel).enumerate() {
        let text: String = script.text().collect();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let value = match serde_json::from_str::<Value>(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(block = index, error = %e, "skipping malformed JSON-LD block");
                continue;
            }
        };

        let mut items = Vec::new();
        flatten(&value, &mut items);
        if let Some(product) = items.into_iter().find(|item| is_product(item)) {
            return Some(parse_product(product, page_url));
        }
    }
    None
}

/// Collect candidate objects: top-level arrays and `@graph` lists are
/// flattened, recursively.
fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                flatten(graph, out);
            }
            out.push(value);
        }
        _ => {}
    }
}

/// schema.org `Product` and its subtypes. `ProductGroup` is a set of
/// variants, not an offer with a price.
const PRODUCT_TYPES: &[&str] = &["Product", "IndividualProduct", "ProductModel", "SomeProducts"];

fn is_product(value: &Value) -> bool {
    let is_product_type = |t: &str| {
        let name = t.rsplit('/').next().unwrap_or(t);
        PRODUCT_TYPES.contains(&name)
    };
    match value.get("@type") {
        Some(Value::String(t)) => is_product_type(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(is_product_type),
        _ => false,
    }
}

fn parse_product(v: &Value, page_url: &Url) -> PartialRecord {
    let offer = v.get("offers").and_then(|o| match o {
        Value::Array(list) => list.first(),
        other => Some(other),
    });

    let price = offer.and_then(|o| {
        o.get("price")
            .or_else(|| o.get("lowPrice"))
            .and_then(number_value)
    });
    let currency = offer
        .and_then(|o| o.get("priceCurrency"))
        .and_then(Value::as_str)
        .and_then(normalize_currency);
    let availability = offer
        .and_then(|o| o.get("availability"))
        .and_then(Value::as_str)
        .map(normalize_availability)
        .and_then(non_empty);

    let brand = v
        .get("brand")
        .and_then(|b| b.get("name").and_then(Value::as_str).or_else(|| b.as_str()))
        .and_then(non_empty);

    let images = image_value(v.get("image"))
        .map(|src| vec![resolve_url(page_url, &src)])
        .unwrap_or_default();

    PartialRecord {
        title: string_field(v, "name"),
        description: string_field(v, "description"),
        images,
        price,
        original_price: None,
        currency,
        availability,
        brand,
        sku: v.get("sku").and_then(scalar_string),
        url: string_field(v, "url").map(|u| resolve_url(page_url, &u)),
    }
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).and_then(non_empty)
}

/// Strings and numbers both appear for identifiers like `sku`.
fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|p| *p >= 0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p >= 0.0)
            .or_else(|| parse_price(s)),
        _ => None,
    }
}

/// `image` may be a string, an array (first wins), or an `ImageObject`.
fn image_value(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => non_empty(s),
        Value::Array(list) => image_value(list.first()),
        obj @ Value::Object(_) => obj
            .get("url")
            .or_else(|| obj.get("contentUrl"))
            .and_then(Value::as_str)
            .and_then(non_empty),
        _ => None,
    }
}
