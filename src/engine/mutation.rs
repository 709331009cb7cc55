//! Mutation records, their state machine, and engine events

use crate::model::{TagId, TextId};
use crate::persistence::PersistenceError;
use crate::store::{Applied, RollbackOutcome, Table};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The user-initiated changes that go through the optimistic path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    AddManualTag { text_id: TextId, tag_id: TagId },
    RemoveTag { text_id: TextId, tag_id: TagId },
    DeleteText { text_id: TextId },
    DeleteTag { tag_id: TagId },
    RenameTag { tag_id: TagId, name: String },
    Reclassify { text_id: TextId },
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::AddManualTag { text_id, tag_id } => {
                write!(f, "add-manual-tag({}, {})", text_id, tag_id)
            }
            MutationKind::RemoveTag { text_id, tag_id } => {
                write!(f, "remove-tag({}, {})", text_id, tag_id)
            }
            MutationKind::DeleteText { text_id } => write!(f, "delete-text({})", text_id),
            MutationKind::DeleteTag { tag_id } => write!(f, "delete-tag({})", tag_id),
            MutationKind::RenameTag { tag_id, name } => {
                write!(f, "rename-tag({}, {:?})", tag_id, name)
            }
            MutationKind::Reclassify { text_id } => write!(f, "reclassify({})", text_id),
        }
    }
}

impl MutationKind {
    /// Whether confirming the mutation takes more than one persistence
    /// call. A failure part-way may leave some of them applied.
    pub fn writes_in_steps(&self) -> bool {
        matches!(self, MutationKind::Reclassify { .. })
    }
}

/// Lifecycle of an optimistic mutation.
///
/// `Pending` and `RolledBack` carry the pre-mutation snapshot.
#[derive(Debug, Clone)]
pub enum MutationState {
    Pending(Arc<Table>),
    Committed,
    RolledBack(Arc<Table>),
}

/// One optimistic mutation and where it ended up
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Store version the optimistic delta produced
    pub version: u64,
    /// Number of keys the delta touched; zero for a no-op
    pub touched: usize,
    state: MutationState,
}

impl Mutation {
    pub(crate) fn pending(kind: MutationKind, applied: &Applied) -> Self {
        Self {
            kind,
            version: applied.version,
            touched: applied.touched.len(),
            state: MutationState::Pending(applied.previous.clone()),
        }
    }

    /// Pending → Committed
    pub(crate) fn commit(&mut self) {
        if let MutationState::Pending(_) = self.state {
            self.state = MutationState::Committed;
        }
    }

    /// Pending → RolledBack, keeping the snapshot
    pub(crate) fn roll_back(&mut self) {
        let state = std::mem::replace(&mut self.state, MutationState::Committed);
        self.state = match state {
            MutationState::Pending(snapshot) => MutationState::RolledBack(snapshot),
            other => other,
        };
    }

    pub fn state(&self) -> &MutationState {
        &self.state
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state, MutationState::Committed)
    }

    pub fn is_noop(&self) -> bool {
        self.touched == 0
    }

    /// The pre-mutation snapshot of a rolled-back mutation
    pub fn snapshot(&self) -> Option<&Arc<Table>> {
        match &self.state {
            MutationState::Pending(s) | MutationState::RolledBack(s) => Some(s),
            MutationState::Committed => None,
        }
    }
}

/// A remote failure that caused a rollback
#[derive(Debug, Error)]
#[error("{} failed: {cause}", .mutation.kind)]
pub struct MutationError {
    /// The mutation, in state `RolledBack`
    pub mutation: Mutation,
    #[source]
    pub cause: PersistenceError,
    pub rollback: RollbackOutcome,
}

impl MutationError {
    pub fn kind(&self) -> &MutationKind {
        &self.mutation.kind
    }

    /// True when the remote rejected a rename because the name is taken
    pub fn is_conflict(&self) -> bool {
        matches!(self.cause, PersistenceError::DuplicateTagName(_))
    }
}

/// Signals emitted by the engine. Failures are surfaced here as well as in
/// the returned error.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Committed {
        kind: MutationKind,
        version: u64,
    },
    RolledBack {
        kind: MutationKind,
        outcome: RollbackOutcome,
        error: String,
    },
    ClassifierFailed {
        text_id: TextId,
        error: String,
    },
    Resynced {
        version: u64,
        changed: usize,
    },
}
