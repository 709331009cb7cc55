//! Persistence trait definitions

use crate::model::{Assignment, Source, Tag, TagId, Text, TextId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("duplicate tag name: {0}")]
    DuplicateTagName(String),

    #[error("Text not found: {0}")]
    TextNotFound(TextId),

    #[error("Tag not found: {0}")]
    TagNotFound(TagId),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Everything persisted for one user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSnapshot {
    pub texts: Vec<Text>,
    pub tags: Vec<Tag>,
    pub assignments: Vec<Assignment>,
}

/// The durable owner of record for texts, tags, and assignments.
///
/// Every call is scoped to one user; rows of other users are never visible
/// (row-level isolation). Implementations must be Send + Sync so a single
/// backend can serve several sessions.
#[async_trait]
pub trait Persistence: Send + Sync {
    // === Texts ===

    /// Create a text. `created_at` defaults to now.
    async fn create_text(
        &self,
        user: &UserId,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> PersistenceResult<Text>;

    /// Delete a text and its assignments. Returns false if it did not exist.
    async fn delete_text(&self, user: &UserId, id: &TextId) -> PersistenceResult<bool>;

    /// All texts, newest first
    async fn list_texts(&self, user: &UserId) -> PersistenceResult<Vec<Text>>;

    // === Tags ===

    /// Create a tag. Fails with `DuplicateTagName` on an exact name clash.
    async fn create_tag(&self, user: &UserId, name: &str) -> PersistenceResult<Tag>;

    /// Rename a tag. Fails with `DuplicateTagName` on an exact name clash.
    async fn rename_tag(&self, user: &UserId, id: &TagId, name: &str) -> PersistenceResult<Tag>;

    /// Delete a tag and its assignments. Returns false if it did not exist.
    async fn delete_tag(&self, user: &UserId, id: &TagId) -> PersistenceResult<bool>;

    /// All tags, ordered by name
    async fn list_tags(&self, user: &UserId) -> PersistenceResult<Vec<Tag>>;

    // === Assignments ===

    async fn list_assignments(
        &self,
        user: &UserId,
        text_id: &TextId,
    ) -> PersistenceResult<Vec<Assignment>>;

    async fn list_all_assignments(&self, user: &UserId) -> PersistenceResult<Vec<Assignment>>;

    /// Insert or replace the assignment for its (text, tag) pair
    async fn upsert_assignment(
        &self,
        user: &UserId,
        assignment: &Assignment,
    ) -> PersistenceResult<()>;

    async fn delete_assignment(
        &self,
        user: &UserId,
        text_id: &TextId,
        tag_id: &TagId,
    ) -> PersistenceResult<bool>;

    /// Delete every assignment of a text with the given source. Returns the
    /// number of rows removed.
    async fn delete_assignments_where(
        &self,
        user: &UserId,
        text_id: &TextId,
        source: Source,
    ) -> PersistenceResult<usize>;

    /// Usage count of a tag
    async fn count_assignments_by_tag(
        &self,
        user: &UserId,
        tag_id: &TagId,
    ) -> PersistenceResult<usize>;

    // === Bulk ===

    /// Load the user's full state
    async fn load_snapshot(&self, user: &UserId) -> PersistenceResult<UserSnapshot> {
        Ok(UserSnapshot {
            texts: self.list_texts(user).await?,
            tags: self.list_tags(user).await?,
            assignments: self.list_all_assignments(user).await?,
        })
    }
}
