//! Validation errors raised before any state change

use thiserror::Error;

/// Input that was rejected before anything was applied or persisted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("tag name is empty")]
    EmptyTagName,

    #[error("tag name is {len} characters long (max {max})")]
    TagNameTooLong { len: usize, max: usize },

    #[error("tag name contains non-printable characters")]
    NonPrintableTagName,

    #[error("text content is empty")]
    EmptyContent,

    #[error("confidence {0} is outside [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),

    #[error("unknown assignment source: {0}")]
    UnknownSource(String),

    #[error("unsupported document format: expected '{expected}', found {found:?}")]
    UnknownFormat {
        expected: &'static str,
        found: Option<String>,
    },

    #[error("malformed document: {0}")]
    MalformedDocument(String),
}
