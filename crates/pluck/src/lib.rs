//! Pluck: product extraction from retailer pages, with crowd-taught site
//! mappings for the pages that resist it.

pub mod extract;
pub mod instrument;
pub mod scoring;
pub mod store;
pub mod teach;
pub mod types;
pub mod url_gate;

pub use extract::{
    extract, extract_catalog, ExtractionContext, ExtractionOutcome, Strategy, HTML_EXCERPT_LIMIT,
};
pub use scoring::{best_mapping_for, rank_mappings, wilson_lower_bound};
pub use store::{MappingStore, MemoryMappingStore};
pub use teach::{TeachingError, TeachingSession, TeachingSubmission};
pub use types::*;
pub use url_gate::{classify, RejectReason, UrlVerdict};
