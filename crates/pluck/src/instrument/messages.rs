//! Wire protocol between an instrumented page and its host.
//!
//! Every message travels inside an [`Envelope`] tagged with [`NAMESPACE`];
//! either side drops envelopes from any other namespace.

use serde::{Deserialize, Serialize};

/// Namespace stamped on every envelope.
pub const NAMESPACE: &str = "pluck-instrument";

/// A namespaced message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub namespace: String,
    #[serde(flatten)]
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(message: T) -> Self {
        Self {
            namespace: NAMESPACE.to_string(),
            message,
        }
    }

    /// The payload, or `None` for a foreign namespace.
    pub fn open(self) -> Option<T> {
        if self.namespace == NAMESPACE {
            Some(self.message)
        } else {
            tracing::debug!(namespace = %self.namespace, "ignoring foreign message");
            None
        }
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Decode a JSON envelope; malformed or foreign messages yield `None`.
    pub fn from_json(raw: &str) -> Option<T> {
        match serde_json::from_str::<Envelope<T>>(raw) {
            Ok(env) => env.open(),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed message");
                None
            }
        }
    }
}

/// Coarse kind of a selected element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Image,
    Price,
    Text,
}

/// Element box. Without a layout engine only declared sizes are known and
/// the position is always the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hover {
    pub tag_name: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub selector: String,
    pub preview: String,
    pub element_type: ElementType,
    pub tag_name: String,
    pub rect: Rect,
    /// Set when the selector is relative to a catalog row.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_relative: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRow {
    pub row_selector: String,
    pub preview: String,
    pub sibling_count: usize,
    pub rect: Rect,
}

/// Page → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageMessage {
    Ready,
    Hover(Hover),
    Select(Selection),
    CatalogRow(CatalogRow),
}

/// Host → page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    ClearSelection,
    HighlightSelector {
        selector: String,
    },
    DetectRowPattern {
        #[serde(rename = "clickedSelector")]
        clicked_selector: String,
    },
    EnterRowMode {
        #[serde(rename = "rowSelector")]
        row_selector: String,
    },
    ExitRowMode,
}
