//! CSS selector generation for a clicked element.
//!
//! Strategies are tried in order and the first selector that matches exactly
//! the clicked element (and nothing else) wins:
//!
//! 1. `#id`, when the id looks stable.
//! 2. A stable data attribute such as `[data-testid="..."]`.
//! 3. An ancestor walk of `tag.class:nth-child(n)` segments joined by ` > `.
//!
//! Relative selectors for catalog rows use only the walk, bounded by the row.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use super::dom::{child_elements, parent_element};
use crate::extract::text::parse_selector;

/// Data attributes that usually identify a product element.
pub const STABLE_DATA_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-product-id",
    "data-sku",
    "data-item-id",
    "data-name",
];

/// Ancestor levels the walk climbs above the clicked element.
pub const MAX_ANCESTOR_LEVELS: usize = 7;

/// Classes kept per path segment.
const MAX_CLASSES_PER_SEGMENT: usize = 2;

const STATE_CLASSES: &[&str] = &[
    "active", "hover", "focus", "focused", "selected", "open", "opened", "closed", "hidden",
    "visible", "disabled", "show", "shown", "collapsed", "expanded", "current", "loading",
    "loaded",
];

const STATE_PREFIXES: &[&str] = &["is-", "has-", "js-", "ng-", "v-", "state-"];

static CSS_IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?[_a-zA-Z][_a-zA-Z0-9-]*$").expect("css identifier regex is valid")
});

// Utility-first frameworks: spacing, sizing, colours, layout.
static UTILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:-?[mp][trblxyse]?-\S+|[wh]-\S+|(?:min|max)-[wh]-\S+|text-\S+|bg-\S+|border(?:-\S+)?|rounded(?:-\S+)?|shadow(?:-\S+)?|flex(?:-\S+)?|grid(?:-\S+)?|col-\S+|row-\S+|gap-\S+|items-\S+|justify-\S+|font-\S+|leading-\S+|tracking-\S+|z-\S+|opacity-\S+|block|inline|inline-block|relative|absolute|fixed|sticky|container|clearfix|sr-only|d-\S+|order-\S+|overflow-\S+|cursor-\S+)$",
    )
    .expect("utility class regex is valid")
});

// CSS-in-JS and CSS modules output.
static HASHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:css|sc|jsx|emotion|styled)-[a-zA-Z0-9]+$").expect("hashed class regex is valid")
});

/// Whether a class is worth putting into a selector.
pub fn is_stable_class(class: &str) -> bool {
    if !CSS_IDENT_RE.is_match(class) {
        return false;
    }
    let lower = class.to_ascii_lowercase();
    if STATE_CLASSES.contains(&lower.as_str())
        || STATE_PREFIXES.iter().any(|p| lower.starts_with(p))
        || UTILITY_RE.is_match(&lower)
        || HASHED_RE.is_match(class)
    {
        return false;
    }
    // Random-looking chunks mixing letters and digits, e.g. `a1b2c3`.
    !class.split(['-', '_']).any(|chunk| {
        chunk.len() >= 5
            && chunk.chars().any(|c| c.is_ascii_digit())
            && chunk.chars().any(|c| c.is_ascii_alphabetic())
    })
}

fn is_stable_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with(|c: char| c.is_ascii_digit())
        && !id.contains([':', '[', ']'])
        && CSS_IDENT_RE.is_match(id)
}

/// Generate a selector that uniquely identifies `el` within the document.
pub fn generate(document: &Html, el: ElementRef<'_>) -> String {
    let scope = document.root_element();
    if let Some(id) = el.value().id() {
        if is_stable_id(id) {
            let candidate = format!("#{id}");
            if matches_only(scope, &candidate, el, true) {
                return candidate;
            }
        }
    }

    for attr in STABLE_DATA_ATTRIBUTES {
        let Some(value) = el.value().attr(attr) else {
            continue;
        };
        if value.is_empty() || value.contains(['"', '\\']) {
            continue;
        }
        let candidate = format!(r#"[{attr}="{value}"]"#);
        if matches_only(scope, &candidate, el, true) {
            return candidate;
        }
    }

    walk(scope, el, true)
}

/// Generate a selector for `el` relative to the enclosing `row`. Returns
/// `None` when `el` is the row itself or lies outside it.
pub fn generate_relative(row: ElementRef<'_>, el: ElementRef<'_>) -> Option<String> {
    if el == row || !el.ancestors().any(|a| a == *row) {
        return None;
    }
    Some(walk(row, el, false))
}

/// Ancestor walk: add one segment per level until the path is unique within
/// `scope`, or the level limit or the scope boundary is hit.
fn walk(scope: ElementRef<'_>, el: ElementRef<'_>, scope_inclusive: bool) -> String {
    let mut segments = Vec::new();
    let mut current = Some(el);
    let mut levels = 0;
    while let Some(node) = current {
        if node == scope || node.value().name() == "html" {
            break;
        }
        segments.push(segment(node));
        let candidate = join(&segments);
        if matches_only(scope, &candidate, el, scope_inclusive) {
            return candidate;
        }
        if levels == MAX_ANCESTOR_LEVELS {
            break;
        }
        levels += 1;
        current = parent_element(node);
    }
    join(&segments)
}

fn join(segments: &[String]) -> String {
    segments
        .iter()
        .rev()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" > ")
}

/// `tag.class1.class2`, plus `:nth-child(n)` when a sibling would collide.
fn segment(el: ElementRef<'_>) -> String {
    let tag = el.value().name().to_ascii_lowercase();
    let classes: Vec<&str> = el
        .value()
        .classes()
        .filter(|c| is_stable_class(c))
        .take(MAX_CLASSES_PER_SEGMENT)
        .collect();
    let mut seg = tag.clone();
    for class in &classes {
        seg.push('.');
        seg.push_str(class);
    }

    if let Some(parent) = parent_element(el) {
        let siblings: Vec<ElementRef<'_>> = child_elements(parent).collect();
        let collides = siblings.iter().any(|s| {
            *s != el
                && s.value().name().eq_ignore_ascii_case(&tag)
                && classes.iter().all(|c| s.value().classes().any(|sc| sc == *c))
        });
        if collides {
            if let Some(pos) = siblings.iter().position(|s| *s == el) {
                seg.push_str(&format!(":nth-child({})", pos + 1));
            }
        }
    }
    seg
}

/// True when `css` parses and, within `scope`, matches `el` and nothing else.
/// `scope_inclusive` also tests the scope element itself.
fn matches_only(scope: ElementRef<'_>, css: &str, el: ElementRef<'_>, scope_inclusive: bool) -> bool {
    let Some(sel) = parse_selector(css) else {
        return false;
    };
    let mut found = scope.select(&sel);
    let first = found.next();
    let self_match = scope_inclusive && sel.matches(&scope);
    match (self_match, first, found.next()) {
        (false, Some(only), None) => only == el,
        _ => false,
    }
}

/// Count of elements `css` matches in the whole document.
pub fn match_count(document: &Html, css: &str) -> usize {
    parse_selector(css).map_or(0, |sel| document.select(&sel).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        let sel = parse_selector(css).unwrap();
        doc.select(&sel).next().unwrap()
    }

    fn assert_unique(doc: &Html, css: &str, el: ElementRef<'_>) {
        let sel = parse_selector(css).unwrap_or_else(|| panic!("unparseable selector {css}"));
        let matched: Vec<_> = doc.select(&sel).collect();
        assert_eq!(matched.len(), 1, "{css} matched {}", matched.len());
        assert!(matched[0] == el, "{css} matched the wrong element");
    }

    #[test]
    fn test_id_strategy() {
        let doc = Html::parse_document(r#"<div><span id="price-main">$5</span></div>"#);
        let el = first(&doc, "span");
        assert_eq!(generate(&doc, el), "#price-main");
    }

    #[test]
    fn test_unstable_ids_fall_through() {
        let doc = Html::parse_document(
            r#"<div><span id="123abc">a</span><b id="a:b">b</b><i id="x[1]">c</i></div>"#,
        );
        for css in ["span", "b", "i"] {
            let el = first(&doc, css);
            let sel = generate(&doc, el);
            assert!(!sel.starts_with('#'), "{sel}");
            assert_unique(&doc, &sel, el);
        }
    }

    #[test]
    fn test_data_attribute_strategy() {
        let doc = Html::parse_document(
            r#"<div><h2 data-testid="product-title">Mug</h2><h2>Other</h2></div>"#,
        );
        let el = first(&doc, "h2");
        assert_eq!(generate(&doc, el), r#"[data-testid="product-title"]"#);
    }

    #[test]
    fn test_walk_uses_classes_and_nth_child() {
        let doc = Html::parse_document(
            r#"<body><main class="product">
                <div class="info"><span class="label">Price</span><span class="label">$9</span></div>
                <div class="info"><span class="label">Size</span></div>
            </main></body>"#,
        );
        let sel = parse_selector("span.label").unwrap();
        let el = doc.select(&sel).nth(1).unwrap();
        let css = generate(&doc, el);
        assert!(css.contains(":nth-child(2)"), "{css}");
        assert_unique(&doc, &css, el);
    }

    #[test]
    fn test_utility_and_hashed_classes_skipped() {
        for class in ["mt-4", "px-2", "text-lg", "flex", "is-active", "active", "css-1x2y3z", "sc-bdVaJa", "Button__a8f3k", "x9f2kq1"] {
            assert!(!is_stable_class(class), "{class} should be skipped");
        }
        for class in ["product-title", "price", "gallery", "item_name", "card__title"] {
            assert!(is_stable_class(class), "{class} should be kept");
        }
    }

    #[test]
    fn test_relative_selector_within_row() {
        let doc = Html::parse_document(
            r#"<ul>
                <li class="card"><a href="/1"><span class="name">A</span></a><span class="cost">$1</span></li>
                <li class="card"><a href="/2"><span class="name">B</span></a><span class="cost">$2</span></li>
            </ul>"#,
        );
        let rows_sel = parse_selector("li.card").unwrap();
        let row = doc.select(&rows_sel).nth(1).unwrap();
        let name = first_in(row, "span.name");
        let css = generate_relative(row, name).unwrap();
        assert_eq!(css, "span.name");
        for r in doc.select(&rows_sel) {
            let sel = parse_selector(&css).unwrap();
            assert_eq!(r.select(&sel).count(), 1);
        }
        assert_eq!(generate_relative(row, row), None);
        let other_row = doc.select(&rows_sel).next().unwrap();
        assert_eq!(generate_relative(other_row, name), None);
    }

    fn first_in<'a>(scope: ElementRef<'a>, css: &str) -> ElementRef<'a> {
        let sel = parse_selector(css).unwrap();
        scope.select(&sel).next().unwrap()
    }

    #[test]
    fn test_full_path_when_never_unique() {
        // Identical deep structures; nothing distinguishes them but position.
        let block = "<div><div><div><div><div><div><div><div><p>x</p></div></div></div></div></div></div></div></div>";
        let doc = Html::parse_document(&format!("<body>{block}{block}</body>"));
        let sel = parse_selector("p").unwrap();
        let el = doc.select(&sel).nth(1).unwrap();
        let css = generate(&doc, el);
        assert_eq!(css.matches(" > ").count(), MAX_ANCESTOR_LEVELS);
    }
}
