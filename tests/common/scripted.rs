//! Persistence wrapper whose writes can be failed or held open
//!
//! Every write call (assignment upserts and deletes, text and tag deletes,
//! renames) consumes the next step of a script. Creates and reads pass
//! straight through so fixtures can be built without touching the script,
//! except for tag names marked with `reject_tag` and a snapshot load armed
//! with `fail_snapshot`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tagkeep::{
    Assignment, MemoryPersistence, Persistence, PersistenceError, PersistenceResult, Source, Tag,
    TagId, Text, TextId, UserId, UserSnapshot,
};
use tokio::sync::oneshot;

enum Step {
    Pass,
    Fail,
    /// Wait for the test to decide: `true` lets the write through
    Hold(oneshot::Receiver<bool>),
}

#[derive(Default)]
pub struct ScriptedPersistence {
    inner: MemoryPersistence,
    script: Mutex<VecDeque<Step>>,
    snapshot_hold: Mutex<Option<oneshot::Receiver<()>>>,
    snapshot_fail: AtomicBool,
    rejected_tags: Mutex<HashSet<String>>,
    writes: AtomicUsize,
}

impl ScriptedPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, step: Step) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }

    /// Let the next write through
    pub fn pass_next(&self) {
        self.push(Step::Pass);
    }

    /// Fail the next write
    pub fn fail_next(&self) {
        self.push(Step::Fail);
    }

    /// Hold the next write until the returned sender resolves it
    pub fn hold_next(&self) -> oneshot::Sender<bool> {
        let (tx, rx) = oneshot::channel();
        self.push(Step::Hold(rx));
        tx
    }

    /// Make the next snapshot load read its rows, then wait before
    /// answering. The answer is stale by the time it arrives.
    pub fn hold_snapshot(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self
            .snapshot_hold
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(rx);
        tx
    }

    /// Fail the next snapshot load
    pub fn fail_snapshot(&self) {
        self.snapshot_fail.store(true, Ordering::SeqCst);
    }

    /// Fail every attempt to create a tag with this exact name
    pub fn reject_tag(&self, name: &str) {
        self.rejected_tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Number of write calls that reached the script
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> PersistenceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Step::Pass);
        match step {
            Step::Pass => Ok(()),
            Step::Fail => Err(PersistenceError::Unavailable("scripted failure".into())),
            Step::Hold(rx) => match rx.await {
                Ok(true) => Ok(()),
                _ => Err(PersistenceError::Unavailable("held write failed".into())),
            },
        }
    }
}

#[async_trait]
impl Persistence for ScriptedPersistence {
    async fn create_text(
        &self,
        user: &UserId,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> PersistenceResult<Text> {
        self.inner.create_text(user, content, created_at).await
    }

    async fn delete_text(&self, user: &UserId, id: &TextId) -> PersistenceResult<bool> {
        self.gate().await?;
        self.inner.delete_text(user, id).await
    }

    async fn list_texts(&self, user: &UserId) -> PersistenceResult<Vec<Text>> {
        self.inner.list_texts(user).await
    }

    async fn create_tag(&self, user: &UserId, name: &str) -> PersistenceResult<Tag> {
        let rejected = self
            .rejected_tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);
        if rejected {
            return Err(PersistenceError::Unavailable("tag create rejected".into()));
        }
        self.inner.create_tag(user, name).await
    }

    async fn rename_tag(&self, user: &UserId, id: &TagId, name: &str) -> PersistenceResult<Tag> {
        self.gate().await?;
        self.inner.rename_tag(user, id, name).await
    }

    async fn delete_tag(&self, user: &UserId, id: &TagId) -> PersistenceResult<bool> {
        self.gate().await?;
        self.inner.delete_tag(user, id).await
    }

    async fn list_tags(&self, user: &UserId) -> PersistenceResult<Vec<Tag>> {
        self.inner.list_tags(user).await
    }

    async fn list_assignments(
        &self,
        user: &UserId,
        text_id: &TextId,
    ) -> PersistenceResult<Vec<Assignment>> {
        self.inner.list_assignments(user, text_id).await
    }

    async fn list_all_assignments(&self, user: &UserId) -> PersistenceResult<Vec<Assignment>> {
        self.inner.list_all_assignments(user).await
    }

    async fn upsert_assignment(
        &self,
        user: &UserId,
        assignment: &Assignment,
    ) -> PersistenceResult<()> {
        self.gate().await?;
        self.inner.upsert_assignment(user, assignment).await
    }

    async fn delete_assignment(
        &self,
        user: &UserId,
        text_id: &TextId,
        tag_id: &TagId,
    ) -> PersistenceResult<bool> {
        self.gate().await?;
        self.inner.delete_assignment(user, text_id, tag_id).await
    }

    async fn delete_assignments_where(
        &self,
        user: &UserId,
        text_id: &TextId,
        source: Source,
    ) -> PersistenceResult<usize> {
        self.gate().await?;
        self.inner.delete_assignments_where(user, text_id, source).await
    }

    async fn count_assignments_by_tag(
        &self,
        user: &UserId,
        tag_id: &TagId,
    ) -> PersistenceResult<usize> {
        self.inner.count_assignments_by_tag(user, tag_id).await
    }

    async fn load_snapshot(&self, user: &UserId) -> PersistenceResult<UserSnapshot> {
        let hold = self
            .snapshot_hold
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.snapshot_fail.swap(false, Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("snapshot load failed".into()));
        }
        let snapshot = self.inner.load_snapshot(user).await?;
        if let Some(rx) = hold {
            let _ = rx.await;
        }
        Ok(snapshot)
    }
}
