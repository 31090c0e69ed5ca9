//! Fields a teaching session walks through.

use serde::{Deserialize, Serialize};

use crate::types::FieldName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: FieldName,
    pub label: String,
    pub required: bool,
    pub allows_multiple: bool,
}

impl FieldDescriptor {
    pub fn new(id: FieldName, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            required: false,
            allows_multiple: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.allows_multiple = true;
        self
    }
}

/// Title and price are required; image accepts several selectors.
pub fn default_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new(FieldName::Title, "Product title").required(),
        FieldDescriptor::new(FieldName::Price, "Price").required(),
        FieldDescriptor::new(FieldName::OriginalPrice, "Original price"),
        FieldDescriptor::new(FieldName::Image, "Images").multiple(),
        FieldDescriptor::new(FieldName::Description, "Description"),
        FieldDescriptor::new(FieldName::Brand, "Brand"),
    ]
}
