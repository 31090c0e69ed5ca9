//! Human-in-the-loop site teaching.

pub mod fields;
pub mod session;

pub use fields::{default_fields, FieldDescriptor};
pub use session::{
    FieldMapping, FieldSelection, SessionEffect, SessionState, TeachingError, TeachingSession,
    TeachingSubmission,
};
