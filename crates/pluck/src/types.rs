//! Core data types for extracted products and crowd-taught site mappings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Currency assumed when a page does not declare one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Which strategy produced a [`ProductRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionSource {
    StructuredData,
    SocialMeta,
    SiteMapping,
    GenericMeta,
    DomHeuristic,
    None,
}

impl ExtractionSource {
    /// Rank used to order sources; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::StructuredData => 5,
            Self::SocialMeta => 4,
            Self::SiteMapping => 3,
            Self::GenericMeta => 2,
            Self::DomHeuristic => 1,
            Self::None => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructuredData => "structured-data",
            Self::SocialMeta => "social-meta",
            Self::SiteMapping => "site-mapping",
            Self::GenericMeta => "generic-meta",
            Self::DomHeuristic => "dom-heuristic",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized result of one extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub source: ExtractionSource,
    pub confidence: f64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub price: Option<f64>,
    pub original_price: Option<f64>,
    pub currency: String,
    pub availability: Option<String>,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub url: String,
}

/// Logical product fields a site mapping can bind a selector to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    Title,
    Price,
    OriginalPrice,
    Image,
    Description,
    Brand,
    Sku,
    Availability,
    Currency,
    /// Catalog row selector; the other selectors are relative to it.
    Row,
}

impl FieldName {
    pub const ALL: [FieldName; 10] = [
        FieldName::Title,
        FieldName::Price,
        FieldName::OriginalPrice,
        FieldName::Image,
        FieldName::Description,
        FieldName::Brand,
        FieldName::Sku,
        FieldName::Availability,
        FieldName::Currency,
        FieldName::Row,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Price => "price",
            Self::OriginalPrice => "originalPrice",
            Self::Image => "image",
            Self::Description => "description",
            Self::Brand => "brand",
            Self::Sku => "sku",
            Self::Availability => "availability",
            Self::Currency => "currency",
            Self::Row => "row",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = PluckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldName::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| PluckError::InvalidSelectors(format!("unknown field name: {s}")))
    }
}

/// One CSS selector, or an ordered list for multi-valued fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorValue {
    Single(String),
    Multiple(Vec<String>),
}

impl SelectorValue {
    /// The selectors in application order.
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(s) => std::slice::from_ref(s),
            Self::Multiple(list) => list,
        }
    }
}

/// Field name → selector(s). A `BTreeMap` keeps serialization order stable.
pub type Selectors = BTreeMap<FieldName, SelectorValue>;

/// A crowd-taught extraction recipe for one domain and path pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMapping {
    pub id: Uuid,
    pub domain: String,
    pub path_pattern: String,
    pub selectors: Selectors,
    pub confidence: f64,
    pub upvotes: u32,
    pub downvotes: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
}

impl SiteMapping {
    pub fn total_votes(&self) -> u32 {
        self.upvotes.saturating_add(self.downvotes)
    }
}

/// Direction of a mapping vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl FromStr for VoteDirection {
    type Err = PluckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(PluckError::InvalidInput(format!(
                "vote must be 'up' or 'down', got '{other}'"
            ))),
        }
    }
}

/// Whether an upsert created a new mapping or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Errors that can occur in the core library.
#[derive(thiserror::Error, Debug)]
pub enum PluckError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL not allowed: {0}")]
    DisallowedUrl(String),

    #[error("Invalid selectors: {0}")]
    InvalidSelectors(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mapping not found: {0}")]
    MappingNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Instrumentation error: {0}")]
    Instrument(String),
}

impl PluckError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::DisallowedUrl(_)
                | Self::InvalidSelectors(_)
                | Self::InvalidDomain(_)
                | Self::InvalidInput(_)
        )
    }
}

/// Convenience result type.
pub type PluckResult<T> = Result<T, PluckError>;
