//! Generic HTML meta tags: `meta[name=title]`, `meta[name=description]`,
//! `link[rel=image_src]`.

use scraper::Html;
use url::Url;

use super::text::{element_text, non_empty, parse_selector, resolve_url};
use super::PartialRecord;

/// Only accepted when the derived title differs from the raw `<title>`; a
/// bare document title is too weak a signal.
pub fn extract(document: &Html, page_url: &Url) -> Option<PartialRecord> {
    let doc_title = first_text(document, "title");
    let meta_title = first_attr(document, r#"meta[name="title"]"#, "content");
    let title = meta_title.or_else(|| doc_title.clone())?;
    if Some(&title) == doc_title.as_ref() {
        return None;
    }

    Some(PartialRecord {
        title: Some(title),
        description: first_attr(document, r#"meta[name="description"]"#, "content"),
        images: first_attr(document, r#"link[rel="image_src"]"#, "href")
            .map(|src| vec![resolve_url(page_url, &src)])
            .unwrap_or_default(),
        ..PartialRecord::default()
    })
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = parse_selector(css)?;
    document
        .select(&sel)
        .next()
        .and_then(|el| non_empty(element_text(&el)))
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = parse_selector(css)?;
    document
        .select(&sel)
        .find_map(|el| el.value().attr(attr).and_then(non_empty))
}
