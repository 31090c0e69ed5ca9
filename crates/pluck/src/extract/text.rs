//! Small DOM and text helpers shared by the extraction strategies.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d,]+\.?\d*").expect("price regex is valid"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Parse a CSS selector, logging and returning `None` if it is invalid.
pub fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::debug!(selector = css, error = ?e, "skipping invalid selector");
            None
        }
    }
}

/// Visible text of an element with whitespace collapsed.
pub fn element_text(el: &ElementRef<'_>) -> String {
    let raw: String = el.text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&raw)
}

pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").into_owned()
}

/// The value an element carries: `content` for meta-like elements, else text.
pub fn element_value(el: &ElementRef<'_>) -> String {
    if let Some(content) = el.value().attr("content") {
        let content = collapse_whitespace(content);
        if !content.is_empty() {
            return content;
        }
    }
    element_text(el)
}

/// `Some(trimmed)` when the string has visible content.
pub fn non_empty(s: impl AsRef<str>) -> Option<String> {
    let t = s.as_ref().trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Parse the first numeric substring of `text` as a price.
///
/// Thousands separators are stripped; negative or non-finite results are
/// discarded.
pub fn parse_price(text: &str) -> Option<f64> {
    PRICE_RE
        .find_iter(text)
        .filter(|m| m.as_str().chars().any(|c| c.is_ascii_digit()))
        .find_map(|m| {
            let cleaned = m.as_str().replace(',', "");
            cleaned.trim_end_matches('.').parse::<f64>().ok()
        })
        .filter(|p| p.is_finite() && *p >= 0.0)
}

/// Guess an ISO 4217 code from a currency symbol or code in `text`.
pub fn detect_currency(text: &str) -> Option<String> {
    const SYMBOLS: &[(&str, &str)] = &[
        ("US$", "USD"),
        ("C$", "CAD"),
        ("A$", "AUD"),
        ("$", "USD"),
        ("\u{20AC}", "EUR"),
        ("\u{00A3}", "GBP"),
        ("\u{00A5}", "JPY"),
        ("\u{20B9}", "INR"),
    ];
    const CODES: &[&str] = &["USD", "EUR", "GBP", "CAD", "AUD", "JPY", "INR", "CHF", "SEK"];

    let upper = text.to_ascii_uppercase();
    if let Some(code) = upper
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|word| CODES.contains(word))
    {
        return Some(code.to_string());
    }
    SYMBOLS
        .iter()
        .find(|(sym, _)| text.contains(sym))
        .map(|(_, code)| (*code).to_string())
}

/// Normalize a currency value to a three-letter uppercase code if possible.
pub fn normalize_currency(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.len() == 3 && t.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(t.to_ascii_uppercase());
    }
    detect_currency(t)
}

/// Strip the schema.org vocabulary prefix from an availability value.
pub fn normalize_availability(raw: &str) -> String {
    let t = raw.trim();
    for prefix in ["https://schema.org/", "http://schema.org/", "schema:"] {
        if let Some(rest) = t.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    t.to_string()
}

/// Resolve a possibly relative URL against the page URL.
pub fn resolve_url(base: &Url, raw: &str) -> String {
    let raw = raw.trim();
    base.join(raw)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Best image URL an element points at: `src`, lazy-load attributes,
/// the first `srcset` candidate, `content`, or `href`.
pub fn element_image_url(el: &ElementRef<'_>) -> Option<String> {
    let v = el.value();
    for attr in ["src", "data-src", "data-lazy-src", "data-original"] {
        if let Some(val) = v.attr(attr).and_then(non_empty) {
            if !val.starts_with("data:") {
                return Some(val);
            }
        }
    }
    if let Some(first) = v
        .attr("srcset")
        .and_then(|s| s.split(',').next())
        .and_then(|c| c.split_whitespace().next())
    {
        return Some(first.to_string());
    }
    if let Some(val) = v.attr("content").and_then(non_empty) {
        return Some(val);
    }
    if v.name() != "img" {
        let img_sel = parse_selector("img")?;
        if let Some(img) = el.select(&img_sel).next() {
            return element_image_url(&img);
        }
    }
    v.attr("href").and_then(non_empty)
}

/// Value of one property in an inline `style` attribute, lowercased.
pub fn inline_style(el: &ElementRef<'_>, property: &str) -> Option<String> {
    let style = el.value().attr("style")?;
    style.split(';').find_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(property) {
            Some(value.trim().to_ascii_lowercase())
        } else {
            None
        }
    })
}

fn parse_pixels(raw: &str) -> Option<f64> {
    let t = raw.trim().trim_end_matches("px").trim();
    t.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Width and height declared on the element itself, from the `width` /
/// `height` attributes or inline pixel styles. There is no layout engine, so
/// undeclared sizes are `None`.
pub fn declared_dimensions(el: &ElementRef<'_>) -> (Option<f64>, Option<f64>) {
    let dim = |attr: &str| {
        el.value()
            .attr(attr)
            .and_then(parse_pixels)
            .or_else(|| inline_style(el, attr).as_deref().and_then(parse_pixels))
    };
    (dim("width"), dim("height"))
}

/// Hidden via the `hidden` attribute or inline `display:none` /
/// `visibility:hidden`.
pub fn is_hidden(el: &ElementRef<'_>) -> bool {
    el.value().attr("hidden").is_some()
        || inline_style(el, "display").as_deref() == Some("none")
        || inline_style(el, "visibility").as_deref() == Some("hidden")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_parse_price_variants() {
        assert_eq!(parse_price("$19.99"), Some(19.99));
        assert_eq!(parse_price("USD 1,299.00"), Some(1299.0));
        assert_eq!(parse_price("Price, now only 5"), Some(5.0));
        assert_eq!(parse_price("42."), Some(42.0));
        assert_eq!(parse_price("free"), None);
    }

    #[test]
    fn test_detect_currency() {
        assert_eq!(detect_currency("\u{20AC}12,00").as_deref(), Some("EUR"));
        assert_eq!(detect_currency("\u{00A3}5").as_deref(), Some("GBP"));
        assert_eq!(detect_currency("$5").as_deref(), Some("USD"));
        assert_eq!(detect_currency("12").as_deref(), None);
        assert_eq!(normalize_currency("eur").as_deref(), Some("EUR"));
    }

    #[test]
    fn test_normalize_availability() {
        assert_eq!(normalize_availability("https://schema.org/InStock"), "InStock");
        assert_eq!(normalize_availability("http://schema.org/OutOfStock"), "OutOfStock");
        assert_eq!(normalize_availability("Ships in 3 days"), "Ships in 3 days");
    }

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://shop.com/p/1").unwrap();
        assert_eq!(resolve_url(&base, "/img/a.jpg"), "https://shop.com/img/a.jpg");
        assert_eq!(resolve_url(&base, "https://cdn.com/b.png"), "https://cdn.com/b.png");
    }

    #[test]
    fn test_element_image_url_prefers_real_src() {
        let doc = Html::parse_fragment(
            r#"<div><img src="data:image/gif;base64,R0l" data-src="/real.jpg"></div>"#,
        );
        let sel = Selector::parse("img").unwrap();
        let img = doc.select(&sel).next().unwrap();
        assert_eq!(element_image_url(&img).as_deref(), Some("/real.jpg"));
    }

    #[test]
    fn test_truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("h\u{00e9}llo", 2), "h\u{00e9}");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
