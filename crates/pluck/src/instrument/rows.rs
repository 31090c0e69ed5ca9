//! Catalog row detection: find the repeating element around a click.

use scraper::{ElementRef, Html};

use super::dom::{child_elements, parent_element, rect};
use super::messages::CatalogRow;
use super::selector::{generate, is_stable_class};
use crate::extract::text::{element_text, parse_selector, truncate_chars};

/// Tags treated as rows with a single same-tag sibling.
const NATURAL_ROW_TAGS: &[&str] = &["tr", "li", "article"];

/// Same-tag siblings required for a generic container to count as a row.
const MIN_SIMILAR_SIBLINGS: usize = 2;

const ROW_PREVIEW_CHARS: usize = 160;

/// Walk up from `clicked` to the nearest element that repeats as a row.
pub fn detect_row<'a>(clicked: ElementRef<'a>) -> Option<ElementRef<'a>> {
    let mut current = Some(clicked);
    while let Some(node) = current {
        let name = node.value().name();
        if matches!(name, "body" | "html") {
            return None;
        }
        let Some(parent) = parent_element(node) else {
            return None;
        };
        let own_children = child_elements(node).count();
        let same_tag: Vec<ElementRef<'a>> = child_elements(parent)
            .filter(|s| *s != node && s.value().name() == name)
            .collect();
        let similar = same_tag
            .iter()
            .filter(|s| child_elements(**s).count().abs_diff(own_children) <= 1)
            .count();

        if similar >= MIN_SIMILAR_SIBLINGS
            || (NATURAL_ROW_TAGS.contains(&name) && !same_tag.is_empty())
        {
            return Some(node);
        }
        current = Some(parent);
    }
    None
}

/// Selector that matches `row` and its repeating siblings: the parent's
/// unique selector, then the row tag with the classes every sibling shares.
pub fn row_selector(document: &Html, row: ElementRef<'_>) -> String {
    let name = row.value().name();
    let siblings: Vec<ElementRef<'_>> = parent_element(row)
        .map(|p| {
            child_elements(p)
                .filter(|s| s.value().name() == name)
                .collect()
        })
        .unwrap_or_default();

    let shared: Vec<&str> = row
        .value()
        .classes()
        .filter(|c| is_stable_class(c))
        .filter(|c| siblings.iter().all(|s| s.value().classes().any(|sc| sc == *c)))
        .take(2)
        .collect();
    let mut tail = name.to_string();
    for class in shared {
        tail.push('.');
        tail.push_str(class);
    }

    match parent_element(row) {
        Some(parent) if !matches!(parent.value().name(), "body" | "html") => {
            format!("{} > {tail}", generate(document, parent))
        }
        _ => tail,
    }
}

/// Detect the row around `clicked` and describe it for the host.
pub fn describe_row(document: &Html, clicked: ElementRef<'_>) -> Option<CatalogRow> {
    let row = detect_row(clicked)?;
    let selector = row_selector(document, row);
    let sibling_count = parse_selector(&selector)
        .map_or(0, |sel| document.select(&sel).count());
    if sibling_count == 0 {
        tracing::debug!(selector = %selector, "row selector does not match its own row");
        return None;
    }
    Some(CatalogRow {
        row_selector: selector,
        preview: truncate_chars(&element_text(&row), ROW_PREVIEW_CHARS).to_string(),
        sibling_count,
        rect: rect(&row),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        let sel = parse_selector(css).unwrap();
        doc.select(&sel).next().unwrap()
    }

    #[test]
    fn test_table_rows() {
        let doc = Html::parse_document(
            r#"<table id="results"><tbody>
                <tr><td class="n">Apple</td><td>$1</td></tr>
                <tr><td class="n">Pear</td><td>$2</td></tr>
            </tbody></table>"#,
        );
        let cell = first(&doc, "td.n");
        let row = describe_row(&doc, cell).unwrap();
        assert_eq!(row.row_selector, "tbody > tr");
        assert_eq!(row.sibling_count, 2);
        assert!(row.preview.contains("Apple"));
    }

    #[test]
    fn test_generic_cards_need_two_similar_siblings() {
        let doc = Html::parse_document(
            r#"<body><section id="grid">
                <div class="card product"><h3>A</h3><span>$1</span></div>
                <div class="card product featured"><h3>B</h3><span>$2</span><em>new</em></div>
                <div class="card product"><h3>C</h3><span>$3</span></div>
            </section></body>"#,
        );
        let title = first(&doc, "h3");
        let row = describe_row(&doc, title).unwrap();
        assert_eq!(row.row_selector, "#grid > div.card.product");
        assert_eq!(row.sibling_count, 3);
    }

    #[test]
    fn test_single_block_is_not_a_row() {
        let doc = Html::parse_document(
            r#"<body><div class="product"><h1>Only</h1><p>Desc</p></div></body>"#,
        );
        assert!(describe_row(&doc, first(&doc, "h1")).is_none());
    }

    #[test]
    fn test_dissimilar_siblings_are_not_rows() {
        let doc = Html::parse_document(
            r#"<body><main>
                <div class="a"><span>x</span></div>
                <div class="b"><p>1</p><p>2</p><p>3</p><p>4</p></div>
                <div class="c"><p>1</p><p>2</p><p>3</p><p>4</p><p>5</p><p>6</p></div>
            </main></body>"#,
        );
        assert!(detect_row(first(&doc, "div.a span")).is_none());
    }
}
