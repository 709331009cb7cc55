//! Assignments: the (text, tag, confidence, source) relationship
//!
//! The (text, tag) pair is the natural key; at most one assignment exists per
//! pair. Manual assignments always carry confidence 1.0.

use super::error::ValidationError;
use super::ids::{TagId, TextId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Confidence carried by every manual assignment
pub const MANUAL_CONFIDENCE: f64 = 1.0;

/// Confidence used for AI assignments imported without one
pub const DEFAULT_AI_CONFIDENCE: f64 = 0.5;

/// Provenance of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Produced by the classifier
    Ai,
    /// Asserted by the user
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ai => "ai",
            Source::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Source::Ai),
            "manual" => Ok(Source::Manual),
            other => Err(ValidationError::UnknownSource(other.to_string())),
        }
    }
}

/// Natural key of an assignment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub text_id: TextId,
    pub tag_id: TagId,
}

impl AssignmentKey {
    pub fn new(text_id: TextId, tag_id: TagId) -> Self {
        Self { text_id, tag_id }
    }
}

impl std::fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.text_id, self.tag_id)
    }
}

/// A tag assigned to a text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub text_id: TextId,
    pub tag_id: TagId,
    pub confidence: f64,
    pub source: Source,
}

impl Assignment {
    /// A user-asserted assignment (confidence 1.0)
    pub fn manual(text_id: TextId, tag_id: TagId) -> Self {
        Self {
            text_id,
            tag_id,
            confidence: MANUAL_CONFIDENCE,
            source: Source::Manual,
        }
    }

    /// A classifier-produced assignment
    pub fn ai(text_id: TextId, tag_id: TagId, confidence: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            text_id,
            tag_id,
            confidence: check_confidence(confidence)?,
            source: Source::Ai,
        })
    }

    /// Build an assignment from untrusted parts. Manual sources are forced to
    /// confidence 1.0; AI confidences are range-checked.
    pub fn from_parts(
        text_id: TextId,
        tag_id: TagId,
        confidence: f64,
        source: Source,
    ) -> Result<Self, ValidationError> {
        match source {
            Source::Manual => Ok(Self::manual(text_id, tag_id)),
            Source::Ai => Self::ai(text_id, tag_id, confidence),
        }
    }

    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.text_id.clone(), self.tag_id.clone())
    }

    pub fn is_manual(&self) -> bool {
        self.source == Source::Manual
    }

    /// Convert in place to a manual assignment for the same pair
    pub fn into_manual(self) -> Self {
        Self::manual(self.text_id, self.tag_id)
    }

    /// True when the manual ⇒ 1.0 invariant and the range invariant hold
    pub fn is_well_formed(&self) -> bool {
        let in_range = (0.0..=1.0).contains(&self.confidence);
        match self.source {
            Source::Manual => self.confidence == MANUAL_CONFIDENCE,
            Source::Ai => in_range,
        }
    }
}

/// Reject NaN and values outside [0.0, 1.0]
pub fn check_confidence(confidence: f64) -> Result<f64, ValidationError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ValidationError::ConfidenceOutOfRange(confidence))
    }
}
