//! Multi-strategy product extraction.
//!
//! Strategies are tried in a fixed priority order and the first one that
//! produces a non-empty title wins. Later strategies are never consulted once
//! an earlier one succeeds.

mod heuristics;
mod mapping;
mod meta;
mod social;
mod structured;
pub mod text;

use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{ExtractionSource, ProductRecord, SiteMapping, DEFAULT_CURRENCY};

/// Maximum number of characters of raw HTML returned with a failed outcome.
pub const HTML_EXCERPT_LIMIT: usize = 100_000;

/// Fields recovered by one strategy before confidence and defaults are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub price: Option<f64>,
    pub original_price: Option<f64>,
    pub currency: Option<String>,
    pub availability: Option<String>,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub url: Option<String>,
}

impl PartialRecord {
    fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Finish the record: attach source and confidence, default the currency
    /// and fall back to the page URL.
    pub fn into_record(
        self,
        source: ExtractionSource,
        confidence: f64,
        page_url: &Url,
    ) -> ProductRecord {
        ProductRecord {
            source,
            confidence: confidence.clamp(0.0, 1.0),
            title: self.title,
            description: self.description,
            images: self.images,
            price: self.price.filter(|p| *p >= 0.0),
            original_price: self.original_price.filter(|p| *p >= 0.0),
            currency: self
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            availability: self.availability,
            brand: self.brand,
            sku: self.sku,
            url: self.url.unwrap_or_else(|| page_url.to_string()),
        }
    }
}

/// Per-request inputs besides the HTML itself.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    /// Normalized domain of the page.
    pub domain: String,
    /// Best-ranked mapping for this domain and path, if any.
    pub site_mapping: Option<SiteMapping>,
}

impl ExtractionContext {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            site_mapping: None,
        }
    }

    pub fn with_mapping(mut self, mapping: Option<SiteMapping>) -> Self {
        self.site_mapping = mapping;
        self
    }
}

/// One extraction strategy. The chain is a closed set driven by [`extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    StructuredData,
    SocialMeta,
    SiteMapping,
    GenericMeta,
    DomHeuristic,
}

impl Strategy {
    /// The chain in priority order.
    pub const CHAIN: [Strategy; 5] = [
        Strategy::StructuredData,
        Strategy::SocialMeta,
        Strategy::SiteMapping,
        Strategy::GenericMeta,
        Strategy::DomHeuristic,
    ];

    pub fn name(self) -> &'static str {
        self.source().as_str()
    }

    pub fn source(self) -> ExtractionSource {
        match self {
            Self::StructuredData => ExtractionSource::StructuredData,
            Self::SocialMeta => ExtractionSource::SocialMeta,
            Self::SiteMapping => ExtractionSource::SiteMapping,
            Self::GenericMeta => ExtractionSource::GenericMeta,
            Self::DomHeuristic => ExtractionSource::DomHeuristic,
        }
    }

    /// Fixed confidence; a site mapping reports its own stored confidence.
    pub fn confidence(self, ctx: &ExtractionContext) -> f64 {
        match self {
            Self::StructuredData => 0.95,
            Self::SocialMeta => 0.8,
            Self::SiteMapping => ctx.site_mapping.as_ref().map_or(0.0, |m| m.confidence),
            Self::GenericMeta => 0.5,
            Self::DomHeuristic => 0.3,
        }
    }

    /// Whether this strategy runs at all for the given context.
    pub fn applies(self, ctx: &ExtractionContext) -> bool {
        self != Self::SiteMapping || ctx.site_mapping.is_some()
    }

    pub fn try_extract(
        self,
        document: &Html,
        page_url: &Url,
        ctx: &ExtractionContext,
    ) -> Option<PartialRecord> {
        match self {
            Self::StructuredData => structured::extract(document, page_url),
            Self::SocialMeta => social::extract(document, page_url),
            Self::SiteMapping => ctx
                .site_mapping
                .as_ref()
                .and_then(|m| mapping::extract(document, page_url, m)),
            Self::GenericMeta => meta::extract(document, page_url),
            Self::DomHeuristic => heuristics::extract(document, page_url),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of running the chain over one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductRecord>,
    pub suggest_teaching: bool,
    pub strategies_attempted: Vec<Strategy>,
    /// Leading slice of the raw HTML, only on failure.
    #[serde(rename = "html", skip_serializing_if = "Option::is_none")]
    pub html_excerpt: Option<String>,
}

impl ExtractionOutcome {
    pub fn source(&self) -> ExtractionSource {
        self.product
            .as_ref()
            .map_or(ExtractionSource::None, |p| p.source)
    }
}

/// Run the strategy chain over `html` fetched from `page_url`.
pub fn extract(html: &str, page_url: &Url, ctx: &ExtractionContext) -> ExtractionOutcome {
    let document = Html::parse_document(html);
    let mut attempted = Vec::new();

    for strategy in Strategy::CHAIN {
        if !strategy.applies(ctx) {
            continue;
        }
        attempted.push(strategy);
        let Some(partial) = strategy.try_extract(&document, page_url, ctx) else {
            tracing::debug!(strategy = %strategy, url = %page_url, "strategy found nothing");
            continue;
        };
        if !partial.has_title() {
            tracing::debug!(strategy = %strategy, url = %page_url, "strategy found no title");
            continue;
        }

        let weak = matches!(strategy, Strategy::GenericMeta | Strategy::DomHeuristic);
        let product = partial.into_record(strategy.source(), strategy.confidence(ctx), page_url);
        tracing::debug!(
            strategy = %strategy,
            confidence = product.confidence,
            url = %page_url,
            "extracted product"
        );
        return ExtractionOutcome {
            success: true,
            product: Some(product),
            suggest_teaching: weak && ctx.site_mapping.is_none(),
            strategies_attempted: attempted,
            html_excerpt: None,
        };
    }

    ExtractionOutcome {
        success: false,
        product: None,
        suggest_teaching: true,
        strategies_attempted: attempted,
        html_excerpt: Some(text::truncate_chars(html, HTML_EXCERPT_LIMIT).to_string()),
    }
}

/// Apply a catalog mapping to every row on the page.
///
/// Returns one record per row that yields a title. A mapping without a `row`
/// selector produces nothing here; use [`extract`] for single products.
pub fn extract_catalog(html: &str, page_url: &Url, mapping: &SiteMapping) -> Vec<ProductRecord> {
    let document = Html::parse_document(html);
    mapping::extract_rows(&document, page_url, mapping)
        .into_iter()
        .filter(PartialRecord::has_title)
        .map(|row| row.into_record(ExtractionSource::SiteMapping, mapping.confidence, page_url))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldName, SelectorValue, Selectors};
    use chrono::Utc;
    use uuid::Uuid;

    fn url() -> Url {
        Url::parse("https://shop.com/p/42").unwrap()
    }

    fn ctx() -> ExtractionContext {
        ExtractionContext::new("shop.com")
    }

    fn mapping(selectors: Selectors, confidence: f64) -> SiteMapping {
        SiteMapping {
            id: Uuid::new_v4(),
            domain: "shop.com".into(),
            path_pattern: "*".into(),
            selectors,
            confidence,
            upvotes: 5,
            downvotes: 1,
            created_by: "u1".into(),
            created_at: Utc::now(),
            last_verified_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_page_fails_with_excerpt() {
        let out = extract("<html><body><p>nothing</p></body></html>", &url(), &ctx());
        assert!(!out.success);
        assert!(out.suggest_teaching);
        assert_eq!(out.source(), ExtractionSource::None);
        assert!(out.html_excerpt.unwrap().contains("nothing"));
        assert_eq!(
            out.strategies_attempted,
            vec![
                Strategy::StructuredData,
                Strategy::SocialMeta,
                Strategy::GenericMeta,
                Strategy::DomHeuristic
            ]
        );
    }

    #[test]
    fn test_excerpt_is_capped() {
        let html = "x".repeat(HTML_EXCERPT_LIMIT + 50);
        let out = extract(&html, &url(), &ctx());
        assert_eq!(out.html_excerpt.unwrap().chars().count(), HTML_EXCERPT_LIMIT);
    }

    #[test]
    fn test_mapping_outranks_generic_meta_but_not_social() {
        let html = r#"<head><title>Shop</title><meta name="title" content="Meta Title"></head>
            <body><h2 class="t">Mapped Title</h2></body>"#;
        let mut selectors = Selectors::new();
        selectors.insert(FieldName::Title, SelectorValue::Single("h2.t".into()));
        let ctx = ctx().with_mapping(Some(mapping(selectors.clone(), 0.61)));
        let out = extract(html, &url(), &ctx);
        let product = out.product.unwrap();
        assert_eq!(product.source, ExtractionSource::SiteMapping);
        assert_eq!(product.title.as_deref(), Some("Mapped Title"));
        assert_eq!(product.confidence, 0.61);
        assert!(!out.suggest_teaching);

        let with_og = format!(r#"<meta property="og:title" content="OG">{html}"#);
        let ctx = ExtractionContext::new("shop.com").with_mapping(Some(mapping(selectors, 0.61)));
        let out = extract(&with_og, &url(), &ctx);
        assert_eq!(out.source(), ExtractionSource::SocialMeta);
        assert_eq!(
            out.strategies_attempted,
            vec![Strategy::StructuredData, Strategy::SocialMeta]
        );
    }

    #[test]
    fn test_weak_strategy_suggests_teaching() {
        let out = extract("<body><h1>Just A Heading</h1></body>", &url(), &ctx());
        assert!(out.success);
        assert_eq!(out.source(), ExtractionSource::DomHeuristic);
        assert!(out.suggest_teaching);
        let product = out.product.unwrap();
        assert_eq!(product.currency, "USD");
        assert_eq!(product.url, "https://shop.com/p/42");
    }

    #[test]
    fn test_outcome_json_shape() {
        let out = extract("<p>x</p>", &url(), &ctx());
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["suggestTeaching"], true);
        assert_eq!(json["strategiesAttempted"][0], "structured-data");
        assert!(json["html"].is_string());
        assert!(json.get("product").is_none());
    }

    #[test]
    fn test_catalog_extraction() {
        let html = r#"<ul>
            <li class="item"><span class="n">A</span><span class="p">$1</span></li>
            <li class="item"><span class="n">B</span><span class="p">$2</span></li>
            <li class="item"><span class="p">$3</span></li>
        </ul>"#;
        let mut selectors = Selectors::new();
        selectors.insert(FieldName::Row, SelectorValue::Single("li.item".into()));
        selectors.insert(FieldName::Title, SelectorValue::Single("span.n".into()));
        selectors.insert(FieldName::Price, SelectorValue::Single("span.p".into()));
        let records = extract_catalog(html, &url(), &mapping(selectors, 0.4));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].title.as_deref(), Some("B"));
        assert_eq!(records[1].price, Some(2.0));
        assert!(records.iter().all(|r| r.source == ExtractionSource::SiteMapping));
    }
}
