//! The portable document schema

use crate::model::{
    check_confidence, normalize_tag_name, Source, ValidationError, DEFAULT_AI_CONFIDENCE,
    MANUAL_CONFIDENCE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of the `format` field this crate reads and writes
pub const FORMAT_ID: &str = "tagkeep-export/v1";

/// A whole exported collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableDocument {
    pub format: String,
    pub exported_at: DateTime<Utc>,
    pub account: String,
    #[serde(default)]
    pub tag_glossary: Vec<GlossaryName>,
    #[serde(default)]
    pub texts: Vec<PortableText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableText {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<PortableTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A tag reference inside a text entry. Three input shapes are accepted:
///
/// - `"Work"`: manual, confidence 1.0
/// - `{"name": "Work", "confidence": 0.7}`: AI, confidence defaults to 0.5
/// - `{"name": "Work", "confidence": 0.7, "source": "ai"}`: the given source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortableTag {
    Name(String),
    Detailed(DetailedTag),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A tag reference after defaulting and validation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTag {
    pub name: String,
    pub confidence: f64,
    pub source: Source,
}

impl PortableTag {
    pub fn name(&self) -> &str {
        match self {
            PortableTag::Name(name) => name,
            PortableTag::Detailed(d) => &d.name,
        }
    }

    /// Apply the defaulting rules and validate the result
    pub fn resolve(&self) -> Result<ResolvedTag, ValidationError> {
        let name = normalize_tag_name(self.name())?;
        let (confidence, source) = match self {
            PortableTag::Name(_) => (MANUAL_CONFIDENCE, Source::Manual),
            PortableTag::Detailed(d) => {
                let source = match d.source.as_deref() {
                    None => Source::Ai,
                    Some(raw) => raw.parse()?,
                };
                match source {
                    Source::Manual => (MANUAL_CONFIDENCE, Source::Manual),
                    Source::Ai => (
                        check_confidence(d.confidence.unwrap_or(DEFAULT_AI_CONFIDENCE))?,
                        Source::Ai,
                    ),
                }
            }
        };
        Ok(ResolvedTag {
            name,
            confidence,
            source,
        })
    }
}
