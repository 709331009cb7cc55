//! Texts: the short entries of a user's collection

use super::error::ValidationError;
use super::ids::TextId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A text in a user's collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub id: TextId,
    pub content: String,
    /// Governs listing order (newest first)
    pub created_at: DateTime<Utc>,
}

impl Text {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: TextId::new(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(id: TextId, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            content: content.into(),
            created_at,
        }
    }
}

/// Trim and validate text content.
pub fn normalize_content(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(trimmed.to_string())
}
