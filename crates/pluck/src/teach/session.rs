//! The teaching session state machine.
//!
//! `Input → Selecting → Complete → Saved`. The session consumes page messages
//! and user actions one at a time and never touches storage; `save` only
//! produces the submission for the caller to persist.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::fields::{default_fields, FieldDescriptor};
use crate::instrument::messages::{ElementType, HostMessage, PageMessage, Selection};
use crate::store::DEFAULT_PATH_PATTERN;
use crate::types::{FieldName, SelectorValue, Selectors};
use crate::url_gate::{self, UrlVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Input,
    Selecting,
    Complete,
    Saved,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Selecting => "selecting",
            Self::Complete => "complete",
            Self::Saved => "saved",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TeachingError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    #[error("Field '{0}' is required and cannot be skipped")]
    CannotSkipRequired(FieldName),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Field '{0}' takes a single selector")]
    NotMultiValued(FieldName),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Selector must not be empty")]
    EmptySelector,
}

/// One clicked element recorded for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSelection {
    pub selector: String,
    pub preview: String,
    pub element_type: ElementType,
}

impl From<Selection> for FieldSelection {
    fn from(sel: Selection) -> Self {
        Self {
            selector: sel.selector,
            preview: sel.preview,
            element_type: sel.element_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldMapping {
    One(FieldSelection),
    Many(Vec<FieldSelection>),
}

impl FieldMapping {
    pub fn selections(&self) -> &[FieldSelection] {
        match self {
            Self::One(sel) => std::slice::from_ref(sel),
            Self::Many(list) => list,
        }
    }
}

/// What the caller should do after feeding the session a page message.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Message dropped: wrong state, stale, or a duplicate.
    Ignored,
    PageReady,
    Hover { tag_name: String, preview: String },
    /// Single-valued field stored. Call `advance_after_display(field_index)`
    /// once the preview has been shown.
    Recorded {
        field: FieldName,
        field_index: usize,
        preview: String,
    },
    /// Selection appended to a multi-valued field.
    Appended { field: FieldName, count: usize },
    /// The page proposed a catalog row; confirm it with `confirm_row`.
    RowDetected {
        row_selector: String,
        preview: String,
        sibling_count: usize,
    },
}

/// The result of a successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingSubmission {
    pub domain: String,
    pub path_pattern: String,
    pub selectors: Selectors,
}

#[derive(Debug, Clone)]
pub struct TeachingSession {
    fields: Vec<FieldDescriptor>,
    state: SessionState,
    url: Option<Url>,
    domain: String,
    path_pattern: String,
    current_field_index: usize,
    mappings: BTreeMap<FieldName, FieldMapping>,
    /// Field index whose auto-advance is scheduled but not yet run.
    pending_advance: Option<usize>,
    row_selector: Option<String>,
}

impl Default for TeachingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TeachingSession {
    pub fn new() -> Self {
        Self::with_fields(default_fields())
    }

    pub fn with_fields(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            state: SessionState::Input,
            url: None,
            domain: String::new(),
            path_pattern: DEFAULT_PATH_PATTERN.to_string(),
            current_field_index: 0,
            mappings: BTreeMap::new(),
            pending_advance: None,
            row_selector: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn current_field_index(&self) -> usize {
        self.current_field_index
    }

    pub fn current_field(&self) -> Option<&FieldDescriptor> {
        match self.state {
            SessionState::Selecting => self.fields.get(self.current_field_index),
            _ => None,
        }
    }

    pub fn mappings(&self) -> &BTreeMap<FieldName, FieldMapping> {
        &self.mappings
    }

    pub fn row_selector(&self) -> Option<&str> {
        self.row_selector.as_deref()
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn set_path_pattern(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        self.path_pattern = if pattern.trim().is_empty() {
            DEFAULT_PATH_PATTERN.to_string()
        } else {
            pattern
        };
    }

    /// Begin teaching `raw_url`. Only valid from `Input`.
    pub fn start(&mut self, raw_url: &str) -> Result<(), TeachingError> {
        self.require(SessionState::Input, "start")?;
        let url = match url_gate::classify(raw_url) {
            UrlVerdict::Allowed(url) => url,
            UrlVerdict::Rejected(reason) => return Err(TeachingError::InvalidUrl(reason.to_string())),
        };
        self.domain = url_gate::domain_of(&url).unwrap_or_default();
        self.url = Some(url);
        self.reset_progress();
        self.state = SessionState::Selecting;
        tracing::debug!(domain = %self.domain, "teaching session started");
        Ok(())
    }

    pub fn on_page_message(&mut self, msg: PageMessage) -> SessionEffect {
        match msg {
            PageMessage::Ready => SessionEffect::PageReady,
            PageMessage::Hover(hover) if self.state == SessionState::Selecting => {
                SessionEffect::Hover {
                    tag_name: hover.tag_name,
                    preview: hover.preview,
                }
            }
            PageMessage::Hover(_) => SessionEffect::Ignored,
            PageMessage::CatalogRow(row) if self.state == SessionState::Selecting => {
                SessionEffect::RowDetected {
                    row_selector: row.row_selector,
                    preview: row.preview,
                    sibling_count: row.sibling_count,
                }
            }
            PageMessage::CatalogRow(_) => SessionEffect::Ignored,
            PageMessage::Select(selection) => self.on_selection(selection),
        }
    }

    fn on_selection(&mut self, selection: Selection) -> SessionEffect {
        if self.state != SessionState::Selecting {
            tracing::debug!(state = %self.state, "selection outside selecting dropped");
            return SessionEffect::Ignored;
        }
        if self.pending_advance.is_some() {
            tracing::debug!("stale selection dropped before auto-advance");
            return SessionEffect::Ignored;
        }
        if selection.is_relative != self.row_selector.is_some() {
            tracing::debug!(
                relative = selection.is_relative,
                "selection does not match row mode"
            );
            return SessionEffect::Ignored;
        }
        let Some(field) = self.fields.get(self.current_field_index).cloned() else {
            return SessionEffect::Ignored;
        };

        if field.allows_multiple {
            let entry = self
                .mappings
                .entry(field.id)
                .or_insert_with(|| FieldMapping::Many(Vec::new()));
            let FieldMapping::Many(list) = entry else {
                return SessionEffect::Ignored;
            };
            if list.iter().any(|s| s.selector == selection.selector) {
                return SessionEffect::Ignored;
            }
            list.push(selection.into());
            SessionEffect::Appended {
                field: field.id,
                count: list.len(),
            }
        } else {
            let preview = selection.preview.clone();
            self.mappings
                .insert(field.id, FieldMapping::One(selection.into()));
            self.pending_advance = Some(self.current_field_index);
            SessionEffect::Recorded {
                field: field.id,
                field_index: self.current_field_index,
                preview,
            }
        }
    }

    /// Run the auto-advance scheduled by a single-valued selection. Ignored
    /// unless the session is still on `field_index` with that advance pending.
    pub fn advance_after_display(&mut self, field_index: usize) -> bool {
        if self.state != SessionState::Selecting
            || self.pending_advance != Some(field_index)
            || self.current_field_index != field_index
        {
            return false;
        }
        self.advance();
        true
    }

    /// Finish a multi-valued field.
    pub fn finish_field(&mut self) -> Result<(), TeachingError> {
        self.require(SessionState::Selecting, "finish a field")?;
        let field = self.field_at_cursor()?;
        if !field.allows_multiple {
            return Err(TeachingError::NotMultiValued(field.id));
        }
        if field.required && !self.mappings.contains_key(&field.id) {
            return Err(TeachingError::CannotSkipRequired(field.id));
        }
        self.advance();
        Ok(())
    }

    /// Skip an optional field, discarding anything selected for it.
    pub fn skip(&mut self) -> Result<(), TeachingError> {
        self.require(SessionState::Selecting, "skip")?;
        let field = self.field_at_cursor()?;
        if field.required {
            return Err(TeachingError::CannotSkipRequired(field.id));
        }
        self.mappings.remove(&field.id);
        self.advance();
        Ok(())
    }

    /// Step back one field and forget its mapping.
    pub fn undo(&mut self) -> Result<(), TeachingError> {
        if !matches!(self.state, SessionState::Selecting | SessionState::Complete) {
            return Err(TeachingError::InvalidTransition {
                from: self.state,
                action: "undo",
            });
        }
        if self.current_field_index == 0 {
            return Err(TeachingError::NothingToUndo);
        }
        self.current_field_index -= 1;
        let field = self.fields[self.current_field_index].id;
        self.mappings.remove(&field);
        self.pending_advance = None;
        self.state = SessionState::Selecting;
        Ok(())
    }

    /// Switch to catalog mode. Returns the message to forward to the page.
    ///
    /// Selectors recorded so far are page-absolute and would match nothing
    /// inside a row, so they are dropped and the walk restarts at the first
    /// field.
    pub fn confirm_row(&mut self, row_selector: &str) -> Result<HostMessage, TeachingError> {
        self.require(SessionState::Selecting, "confirm a row")?;
        let row_selector = row_selector.trim();
        if row_selector.is_empty() {
            return Err(TeachingError::EmptySelector);
        }
        if !self.mappings.is_empty() || self.current_field_index > 0 {
            tracing::debug!(
                dropped = self.mappings.len(),
                "row confirmed mid-session; rewinding to first field"
            );
        }
        self.reset_progress();
        self.row_selector = Some(row_selector.to_string());
        Ok(HostMessage::EnterRowMode {
            row_selector: row_selector.to_string(),
        })
    }

    /// Abandon the session. Nothing is kept.
    pub fn cancel(&mut self) {
        let fields = std::mem::take(&mut self.fields);
        *self = Self::with_fields(fields);
    }

    /// Start over on the same page.
    pub fn restart(&mut self) {
        if self.url.is_none() {
            self.cancel();
            return;
        }
        self.reset_progress();
        self.state = SessionState::Selecting;
    }

    /// Produce the submission. Every required field must be mapped; fields
    /// not yet visited are all optional by then and are left out.
    pub fn save(&mut self) -> Result<TeachingSubmission, TeachingError> {
        if !matches!(self.state, SessionState::Selecting | SessionState::Complete) {
            return Err(TeachingError::InvalidTransition {
                from: self.state,
                action: "save",
            });
        }
        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.required && !self.mappings.contains_key(&f.id))
            .map(|f| f.id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TeachingError::MissingRequiredFields(missing));
        }

        let mut selectors = Selectors::new();
        for field in &self.fields {
            let Some(mapping) = self.mappings.get(&field.id) else {
                continue;
            };
            let list: Vec<String> = mapping
                .selections()
                .iter()
                .map(|s| s.selector.clone())
                .collect();
            if list.is_empty() {
                continue;
            }
            let value = if field.allows_multiple {
                SelectorValue::Multiple(list)
            } else {
                SelectorValue::Single(list.into_iter().next().unwrap_or_default())
            };
            selectors.insert(field.id, value);
        }
        if let Some(row) = &self.row_selector {
            selectors.insert(FieldName::Row, SelectorValue::Single(row.clone()));
        }

        self.state = SessionState::Saved;
        Ok(TeachingSubmission {
            domain: self.domain.clone(),
            path_pattern: self.path_pattern.clone(),
            selectors,
        })
    }

    fn require(&self, expected: SessionState, action: &'static str) -> Result<(), TeachingError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TeachingError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }

    fn field_at_cursor(&self) -> Result<FieldDescriptor, TeachingError> {
        self.fields
            .get(self.current_field_index)
            .cloned()
            .ok_or(TeachingError::InvalidTransition {
                from: self.state,
                action: "edit a field",
            })
    }

    fn advance(&mut self) {
        self.pending_advance = None;
        self.current_field_index += 1;
        if self.current_field_index >= self.fields.len() {
            self.current_field_index = self.fields.len();
            self.state = SessionState::Complete;
        }
    }

    fn reset_progress(&mut self) {
        self.current_field_index = 0;
        self.mappings.clear();
        self.pending_advance = None;
        self.row_selector = None;
    }
}
