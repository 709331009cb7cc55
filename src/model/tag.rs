//! Tags: named entries of a user's glossary

use super::error::ValidationError;
use super::ids::TagId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum tag name length, in characters, after trimming
pub const MAX_TAG_NAME_LEN: usize = 50;

/// A tag in a user's glossary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    /// Display name, stored with its original casing
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// Create a tag with a fresh id. The name must already be normalized.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TagId::new(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(id: TagId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at,
        }
    }

    /// Case-insensitive name comparison, as used by import lookups.
    pub fn name_matches(&self, other: &str) -> bool {
        fold_name(&self.name) == fold_name(other)
    }
}

/// Trim and validate a raw tag name.
///
/// Rules: 1 to 50 characters after trimming, no control characters.
pub fn normalize_tag_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTagName);
    }
    let len = trimmed.chars().count();
    if len > MAX_TAG_NAME_LEN {
        return Err(ValidationError::TagNameTooLong {
            len,
            max: MAX_TAG_NAME_LEN,
        });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::NonPrintableTagName);
    }
    Ok(trimmed.to_string())
}

/// Case-folded form of a tag name for case-insensitive lookups.
pub fn fold_name(name: &str) -> String {
    name.trim().to_lowercase()
}
