//! Reconciliation of classifier output with existing assignments
//!
//! Manual assignments are never removed or downgraded by re-classification.
//! Every previous AI assignment is replaced by the new candidate set.

use crate::classifier::Candidate;
use crate::model::{check_confidence, Assignment, Source, TagId, TextId};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("assignment for text {found} passed while reconciling text {expected}")]
    ForeignAssignment { expected: TextId, found: TextId },

    #[error("candidate {tag_id} has confidence {confidence} outside [0.0, 1.0]")]
    ConfidenceOutOfRange { tag_id: TagId, confidence: f64 },
}

/// The reconciled assignment set of one text
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Manual assignments followed by the surviving AI candidates
    pub assignments: Vec<Assignment>,
    /// AI assignments that existed before and were discarded as stale
    pub discarded_ai: usize,
    /// Candidates dropped because the tag is already manual on this text
    pub shadowed: Vec<TagId>,
}

impl Reconciliation {
    pub fn manual_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_manual()).count()
    }

    pub fn ai_count(&self) -> usize {
        self.assignments.len() - self.manual_count()
    }
}

/// Merge fresh classifier candidates into the current assignments of a text.
///
/// Zero candidates is not an error; the result is the manual set alone.
pub fn reconcile(
    text_id: &TextId,
    current: &[Assignment],
    candidates: &[Candidate],
) -> Result<Reconciliation, ReconcileError> {
    if let Some(foreign) = current.iter().find(|a| &a.text_id != text_id) {
        return Err(ReconcileError::ForeignAssignment {
            expected: text_id.clone(),
            found: foreign.text_id.clone(),
        });
    }

    let (manual, stale): (Vec<&Assignment>, Vec<&Assignment>) =
        current.iter().partition(|a| a.source == Source::Manual);
    let manual_tags: BTreeSet<&TagId> = manual.iter().map(|a| &a.tag_id).collect();

    // Highest confidence wins among duplicate candidate ids
    let mut best: BTreeMap<&TagId, f64> = BTreeMap::new();
    let mut order: Vec<&TagId> = Vec::new();
    let mut shadowed: Vec<TagId> = Vec::new();
    for candidate in candidates {
        let confidence = check_confidence(candidate.confidence).map_err(|_| {
            ReconcileError::ConfidenceOutOfRange {
                tag_id: candidate.tag_id.clone(),
                confidence: candidate.confidence,
            }
        })?;
        if manual_tags.contains(&candidate.tag_id) {
            if !shadowed.contains(&candidate.tag_id) {
                shadowed.push(candidate.tag_id.clone());
            }
            continue;
        }
        match best.get_mut(&candidate.tag_id) {
            Some(existing) => *existing = existing.max(confidence),
            None => {
                best.insert(&candidate.tag_id, confidence);
                order.push(&candidate.tag_id);
            }
        }
    }

    let mut assignments: Vec<Assignment> = manual.into_iter().cloned().collect();
    for tag_id in order {
        assignments.push(Assignment {
            text_id: text_id.clone(),
            tag_id: tag_id.clone(),
            confidence: best[tag_id],
            source: Source::Ai,
        });
    }

    Ok(Reconciliation {
        assignments,
        discarded_ai: stale.len(),
        shadowed,
    })
}

/// Result of asserting a manual tag on a text
#[derive(Debug, Clone, PartialEq)]
pub enum ManualUpsert {
    /// No assignment existed for the pair
    Inserted(Assignment),
    /// An AI assignment was converted in place
    Converted { from: Assignment, to: Assignment },
    /// The pair was already manual; nothing changes
    AlreadyManual(Assignment),
}

impl ManualUpsert {
    /// The assignment the pair ends up with
    pub fn assignment(&self) -> &Assignment {
        match self {
            ManualUpsert::Inserted(a) | ManualUpsert::AlreadyManual(a) => a,
            ManualUpsert::Converted { to, .. } => to,
        }
    }

    pub fn changes_anything(&self) -> bool {
        !matches!(self, ManualUpsert::AlreadyManual(_))
    }
}

/// Upsert a manual assignment for (text, tag), keyed by the pair.
/// Applying it twice yields the same state as applying it once.
pub fn convert_to_manual(text_id: &TextId, tag_id: &TagId, current: &[Assignment]) -> ManualUpsert {
    let existing = current
        .iter()
        .find(|a| &a.text_id == text_id && &a.tag_id == tag_id);
    match existing {
        None => ManualUpsert::Inserted(Assignment::manual(text_id.clone(), tag_id.clone())),
        Some(a) if a.is_manual() => ManualUpsert::AlreadyManual(a.clone()),
        Some(a) => ManualUpsert::Converted {
            from: a.clone(),
            to: a.clone().into_manual(),
        },
    }
}
