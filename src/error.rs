//! Crate-level error type

use crate::classifier::ClassifierError;
use crate::engine::MutationError;
use crate::model::{TagId, TextId, ValidationError};
use crate::persistence::PersistenceError;
use crate::reconcile::ReconcileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagkeepError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("a tag named '{0}' already exists")]
    DuplicateTagName(String),

    #[error("text not found: {0}")]
    TextNotFound(TextId),

    #[error("tag not found: {0}")]
    TagNotFound(TagId),

    #[error("persistence error: {0}")]
    Persistence(PersistenceError),

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Mutation(#[from] Box<MutationError>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PersistenceError> for TagkeepError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::DuplicateTagName(name) => TagkeepError::DuplicateTagName(name),
            PersistenceError::TextNotFound(id) => TagkeepError::TextNotFound(id),
            PersistenceError::TagNotFound(id) => TagkeepError::TagNotFound(id),
            other => TagkeepError::Persistence(other),
        }
    }
}

impl From<MutationError> for TagkeepError {
    fn from(err: MutationError) -> Self {
        TagkeepError::Mutation(Box::new(err))
    }
}

impl TagkeepError {
    /// The rollback-carrying error, if this is one
    pub fn as_mutation(&self) -> Option<&MutationError> {
        match self {
            TagkeepError::Mutation(m) => Some(m),
            _ => None,
        }
    }
}

pub type TagkeepResult<T> = Result<T, TagkeepError>;
