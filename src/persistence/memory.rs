//! In-memory persistence backend

use super::traits::{Persistence, PersistenceError, PersistenceResult};
use crate::model::{Assignment, AssignmentKey, Source, Tag, TagId, Text, TextId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct UserRows {
    texts: BTreeMap<TextId, Text>,
    tags: BTreeMap<TagId, Tag>,
    assignments: BTreeMap<AssignmentKey, Assignment>,
}

impl UserRows {
    fn name_taken(&self, name: &str, except: Option<&TagId>) -> bool {
        self.tags
            .values()
            .any(|t| t.name == name && Some(&t.id) != except)
    }
}

/// Persistence backed by process memory, partitioned per user.
///
/// Enforces the same constraints as the SQLite backend: exact-name tag
/// uniqueness, cascades, and referential checks on assignment upserts.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    users: DashMap<UserId, UserRows>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn create_text(
        &self,
        user: &UserId,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> PersistenceResult<Text> {
        let text = Text::with_id(TextId::new(), content, created_at.unwrap_or_else(Utc::now));
        self.users
            .entry(user.clone())
            .or_default()
            .texts
            .insert(text.id.clone(), text.clone());
        Ok(text)
    }

    async fn delete_text(&self, user: &UserId, id: &TextId) -> PersistenceResult<bool> {
        let Some(mut rows) = self.users.get_mut(user) else {
            return Ok(false);
        };
        let existed = rows.texts.remove(id).is_some();
        rows.assignments.retain(|k, _| &k.text_id != id);
        Ok(existed)
    }

    async fn list_texts(&self, user: &UserId) -> PersistenceResult<Vec<Text>> {
        let mut texts: Vec<Text> = self
            .users
            .get(user)
            .map(|rows| rows.texts.values().cloned().collect())
            .unwrap_or_default();
        texts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(texts)
    }

    async fn create_tag(&self, user: &UserId, name: &str) -> PersistenceResult<Tag> {
        let mut rows = self.users.entry(user.clone()).or_default();
        if rows.name_taken(name, None) {
            return Err(PersistenceError::DuplicateTagName(name.to_string()));
        }
        let tag = Tag::new(name);
        rows.tags.insert(tag.id.clone(), tag.clone());
        Ok(tag)
    }

    async fn rename_tag(&self, user: &UserId, id: &TagId, name: &str) -> PersistenceResult<Tag> {
        let mut rows = self
            .users
            .get_mut(user)
            .ok_or_else(|| PersistenceError::TagNotFound(id.clone()))?;
        if rows.name_taken(name, Some(id)) {
            return Err(PersistenceError::DuplicateTagName(name.to_string()));
        }
        let tag = rows
            .tags
            .get_mut(id)
            .ok_or_else(|| PersistenceError::TagNotFound(id.clone()))?;
        tag.name = name.to_string();
        Ok(tag.clone())
    }

    async fn delete_tag(&self, user: &UserId, id: &TagId) -> PersistenceResult<bool> {
        let Some(mut rows) = self.users.get_mut(user) else {
            return Ok(false);
        };
        let existed = rows.tags.remove(id).is_some();
        rows.assignments.retain(|k, _| &k.tag_id != id);
        Ok(existed)
    }

    async fn list_tags(&self, user: &UserId) -> PersistenceResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self
            .users
            .get(user)
            .map(|rows| rows.tags.values().cloned().collect())
            .unwrap_or_default();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn list_assignments(
        &self,
        user: &UserId,
        text_id: &TextId,
    ) -> PersistenceResult<Vec<Assignment>> {
        Ok(self
            .users
            .get(user)
            .map(|rows| {
                rows.assignments
                    .values()
                    .filter(|a| &a.text_id == text_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_all_assignments(&self, user: &UserId) -> PersistenceResult<Vec<Assignment>> {
        Ok(self
            .users
            .get(user)
            .map(|rows| rows.assignments.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_assignment(
        &self,
        user: &UserId,
        assignment: &Assignment,
    ) -> PersistenceResult<()> {
        if !assignment.is_well_formed() {
            return Err(PersistenceError::InvalidRow(format!(
                "assignment {} violates confidence/source constraints",
                assignment.key()
            )));
        }
        let mut rows = self
            .users
            .get_mut(user)
            .ok_or_else(|| PersistenceError::TextNotFound(assignment.text_id.clone()))?;
        if !rows.texts.contains_key(&assignment.text_id) {
            return Err(PersistenceError::TextNotFound(assignment.text_id.clone()));
        }
        if !rows.tags.contains_key(&assignment.tag_id) {
            return Err(PersistenceError::TagNotFound(assignment.tag_id.clone()));
        }
        rows.assignments.insert(assignment.key(), assignment.clone());
        Ok(())
    }

    async fn delete_assignment(
        &self,
        user: &UserId,
        text_id: &TextId,
        tag_id: &TagId,
    ) -> PersistenceResult<bool> {
        let Some(mut rows) = self.users.get_mut(user) else {
            return Ok(false);
        };
        let key = AssignmentKey::new(text_id.clone(), tag_id.clone());
        Ok(rows.assignments.remove(&key).is_some())
    }

    async fn delete_assignments_where(
        &self,
        user: &UserId,
        text_id: &TextId,
        source: Source,
    ) -> PersistenceResult<usize> {
        let Some(mut rows) = self.users.get_mut(user) else {
            return Ok(0);
        };
        let before = rows.assignments.len();
        rows.assignments
            .retain(|k, a| !(&k.text_id == text_id && a.source == source));
        Ok(before - rows.assignments.len())
    }

    async fn count_assignments_by_tag(
        &self,
        user: &UserId,
        tag_id: &TagId,
    ) -> PersistenceResult<usize> {
        Ok(self
            .users
            .get(user)
            .map(|rows| rows.assignments.keys().filter(|k| &k.tag_id == tag_id).count())
            .unwrap_or(0))
    }
}
