//! Prepare fetched HTML for display inside the teaching sandbox.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static BASE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<base\b[^>]*>").expect("base tag regex is valid"));

static META_REFRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\b[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*>"#)
        .expect("meta refresh regex is valid")
});

static HEAD_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<head\b[^>]*>").expect("head regex is valid"));

static HTML_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<html\b[^>]*>").expect("html regex is valid"));

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Point relative assets at `base_url` and drop meta refreshes.
///
/// Any existing `<base>` is replaced so the page cannot redirect its own
/// asset resolution elsewhere.
pub fn prepare(html: &str, base_url: &Url) -> String {
    let without_refresh = META_REFRESH_RE.replace_all(html, "");
    let cleaned = BASE_TAG_RE.replace_all(&without_refresh, "");
    let base_tag = format!(r#"<base href="{}">"#, escape_attr(base_url.as_str()));

    let anchor = HEAD_OPEN_RE
        .find(&cleaned)
        .map(|m| (m.end(), false))
        .or_else(|| HTML_OPEN_RE.find(&cleaned).map(|m| (m.end(), true)));

    match anchor {
        Some((at, needs_head)) => {
            let tag = if needs_head {
                format!("<head>{base_tag}</head>")
            } else {
                base_tag
            };
            let mut out = String::with_capacity(cleaned.len() + tag.len());
            out.push_str(&cleaned[..at]);
            out.push_str(&tag);
            out.push_str(&cleaned[at..]);
            out
        }
        None => format!("{base_tag}{cleaned}"),
    }
}
