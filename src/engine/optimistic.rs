//! OptimisticEngine: apply locally, confirm remotely, roll back on failure

use super::mutation::{EngineEvent, Mutation, MutationError, MutationKind};
use crate::classifier::{
    classify_with_timeout, validate_candidates, Candidate, ClassifierGateway, GlossaryEntry,
};
use crate::error::{TagkeepError, TagkeepResult};
use crate::model::{
    normalize_content, normalize_tag_name, Assignment, Source, Tag, TagId, Text, TextId, UserId,
};
use crate::persistence::{Persistence, PersistenceResult};
use crate::reconcile::{convert_to_manual, reconcile};
use crate::store::{AssignmentStore, ResyncOutcome, Table};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on a single classifier call
    pub classifier_timeout: Duration,
    /// Reload from persistence after every committed mutation
    pub resync_after_commit: bool,
    /// Classify new texts as soon as they are added
    pub classify_on_create: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_secs(30),
            resync_after_commit: true,
            classify_on_create: true,
        }
    }
}

/// Result of adding a text
#[derive(Debug, Clone)]
pub struct TextAdded {
    pub text: Text,
    /// The classification mutation, when classification ran and succeeded
    pub classification: Option<Mutation>,
}

/// Summary of a bulk re-classification
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<TextId>,
    pub failed: Vec<(TextId, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Drives every user-initiated change through the optimistic protocol:
/// validate, supersede resyncs, apply locally, confirm remotely, and either
/// commit or roll back.
pub struct OptimisticEngine {
    store: Arc<AssignmentStore>,
    persistence: Arc<dyn Persistence>,
    classifier: Arc<dyn ClassifierGateway>,
    options: EngineOptions,
    events: broadcast::Sender<EngineEvent>,
}

impl OptimisticEngine {
    pub fn new(
        store: Arc<AssignmentStore>,
        persistence: Arc<dyn Persistence>,
        classifier: Arc<dyn ClassifierGateway>,
        options: EngineOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            persistence,
            classifier,
            options,
            events,
        }
    }

    pub fn store(&self) -> &Arc<AssignmentStore> {
        &self.store
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn user(&self) -> &UserId {
        self.store.user()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // === Optimistic mutations ===

    /// Assert a manual tag on a text. Converts an AI assignment in place.
    pub async fn add_manual_tag(&self, text_id: &TextId, tag_id: &TagId) -> TagkeepResult<Mutation> {
        let table = self.store.snapshot();
        require_text(&table, text_id)?;
        require_tag(&table, tag_id)?;

        let kind = MutationKind::AddManualTag {
            text_id: text_id.clone(),
            tag_id: tag_id.clone(),
        };
        let (t, g) = (text_id.clone(), tag_id.clone());
        let assignment = Assignment::manual(text_id.clone(), tag_id.clone());
        self.run(
            kind,
            move |table| {
                require_text(table, &t)?;
                require_tag(table, &g)?;
                let upsert = convert_to_manual(&t, &g, &table.assignments_for(&t));
                let mut next = table.clone();
                next.insert_assignment(upsert.assignment().clone());
                Ok(next)
            },
            move |_| async move {
                self.persistence
                    .upsert_assignment(self.user(), &assignment)
                    .await
            },
        )
        .await
    }

    /// Remove a tag from a text, whatever its source. Removing an absent
    /// assignment is a no-op.
    pub async fn remove_tag(&self, text_id: &TextId, tag_id: &TagId) -> TagkeepResult<Mutation> {
        require_text(&self.store.snapshot(), text_id)?;

        let kind = MutationKind::RemoveTag {
            text_id: text_id.clone(),
            tag_id: tag_id.clone(),
        };
        let (t, g) = (text_id.clone(), tag_id.clone());
        let (rt, rg) = (text_id.clone(), tag_id.clone());
        self.run(
            kind,
            move |table| {
                let mut next = table.clone();
                next.remove_assignment(&t, &g);
                Ok(next)
            },
            move |_| async move {
                self.persistence
                    .delete_assignment(self.user(), &rt, &rg)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// Delete a text and its assignments
    pub async fn delete_text(&self, text_id: &TextId) -> TagkeepResult<Mutation> {
        require_text(&self.store.snapshot(), text_id)?;

        let kind = MutationKind::DeleteText {
            text_id: text_id.clone(),
        };
        let t = text_id.clone();
        let rt = text_id.clone();
        self.run(
            kind,
            move |table| {
                let mut next = table.clone();
                next.remove_text(&t);
                Ok(next)
            },
            move |_| async move {
                self.persistence
                    .delete_text(self.user(), &rt)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// Delete a tag and every assignment that uses it
    pub async fn delete_tag(&self, tag_id: &TagId) -> TagkeepResult<Mutation> {
        require_tag(&self.store.snapshot(), tag_id)?;

        let kind = MutationKind::DeleteTag {
            tag_id: tag_id.clone(),
        };
        let g = tag_id.clone();
        let rg = tag_id.clone();
        self.run(
            kind,
            move |table| {
                let mut next = table.clone();
                next.remove_tag(&g);
                Ok(next)
            },
            move |_| async move {
                self.persistence
                    .delete_tag(self.user(), &rg)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// Rename a tag. An exact clash with another tag's name is a conflict.
    pub async fn rename_tag(&self, tag_id: &TagId, raw_name: &str) -> TagkeepResult<Mutation> {
        let name = normalize_tag_name(raw_name)?;
        let table = self.store.snapshot();
        require_tag(&table, tag_id)?;
        if table.tag_named(&name, Some(tag_id)).is_some() {
            return Err(TagkeepError::DuplicateTagName(name));
        }

        let kind = MutationKind::RenameTag {
            tag_id: tag_id.clone(),
            name: name.clone(),
        };
        let g = tag_id.clone();
        let rg = tag_id.clone();
        let local_name = name.clone();
        self.run(
            kind,
            move |table| {
                let existing = require_tag(table, &g)?;
                if table.tag_named(&local_name, Some(&g)).is_some() {
                    return Err(TagkeepError::DuplicateTagName(local_name));
                }
                let renamed = Tag::with_id(g.clone(), local_name, existing.created_at);
                let mut next = table.clone();
                next.insert_tag(renamed);
                Ok(next)
            },
            move |_| async move {
                self.persistence
                    .rename_tag(self.user(), &rg, &name)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }

    /// Re-run the classifier on a text and reconcile the result.
    ///
    /// The classifier is called before anything changes; if it fails or times
    /// out the text keeps its current assignments.
    pub async fn reclassify(&self, text_id: &TextId) -> TagkeepResult<Mutation> {
        let table = self.store.snapshot();
        let content = require_text(&table, text_id)?.content.clone();
        let glossary: Vec<GlossaryEntry> = table
            .tags_by_name()
            .into_iter()
            .map(|t| GlossaryEntry::new(t.id.clone(), t.name.clone()))
            .collect();

        let raw = match classify_with_timeout(
            self.classifier.as_ref(),
            &content,
            &glossary,
            self.options.classifier_timeout,
        )
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(text_id = %text_id, error = %e, "classification failed; assignments unchanged");
                self.emit(EngineEvent::ClassifierFailed {
                    text_id: text_id.clone(),
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };
        let candidates = validate_candidates(raw, &glossary);
        tracing::debug!(text_id = %text_id, candidates = candidates.len(), "classifier answered");

        let kind = MutationKind::Reclassify {
            text_id: text_id.clone(),
        };
        let t = text_id.clone();
        let rt = text_id.clone();
        self.run(
            kind,
            move |table| {
                require_text(table, &t)?;
                // Tags deleted while the classifier was running are dropped
                let live: Vec<Candidate> = candidates
                    .into_iter()
                    .filter(|c| table.tag(&c.tag_id).is_some())
                    .collect();
                let reconciled = reconcile(&t, &table.assignments_for(&t), &live)?;
                let mut next = table.clone();
                next.replace_assignments_for(&t, reconciled.assignments);
                Ok(next)
            },
            move |current| async move {
                let user = self.user();
                self.persistence
                    .delete_assignments_where(user, &rt, Source::Ai)
                    .await?;
                for assignment in current
                    .assignments_for(&rt)
                    .into_iter()
                    .filter(|a| a.source == Source::Ai)
                {
                    self.persistence.upsert_assignment(user, &assignment).await?;
                }
                Ok(())
            },
        )
        .await
    }

    async fn run<M, R, Fut>(&self, kind: MutationKind, mutate: M, remote: R) -> TagkeepResult<Mutation>
    where
        M: FnOnce(&Table) -> TagkeepResult<Table>,
        R: FnOnce(Arc<Table>) -> Fut,
        Fut: Future<Output = PersistenceResult<()>>,
    {
        self.store.begin_mutation();
        let applied = match self.store.try_apply_delta(mutate) {
            Ok(applied) => applied,
            Err(e) => {
                self.settle(false).await;
                return Err(e);
            }
        };

        let mut mutation = Mutation::pending(kind, &applied);
        if applied.is_noop() {
            tracing::debug!(kind = %mutation.kind, "no-op mutation; nothing to confirm");
            mutation.commit();
            self.settle(false).await;
            return Ok(mutation);
        }

        match remote(applied.current.clone()).await {
            Ok(()) => {
                mutation.commit();
                tracing::debug!(kind = %mutation.kind, version = applied.version, "mutation committed");
                self.emit(EngineEvent::Committed {
                    kind: mutation.kind.clone(),
                    version: applied.version,
                });
                self.settle(self.options.resync_after_commit).await;
                Ok(mutation)
            }
            Err(cause) => {
                let outcome = self.store.roll_back(&applied);
                mutation.roll_back();
                tracing::warn!(
                    kind = %mutation.kind,
                    error = %cause,
                    ?outcome,
                    "mutation failed; rolled back"
                );
                self.emit(EngineEvent::RolledBack {
                    kind: mutation.kind.clone(),
                    outcome,
                    error: cause.to_string(),
                });
                // A stepwise remote may have landed some writes; only a
                // resync brings the table back in line with them
                let diverged = !outcome.is_complete() || mutation.kind.writes_in_steps();
                self.settle(diverged).await;
                Err(MutationError {
                    mutation,
                    cause,
                    rollback: outcome,
                }
                .into())
            }
        }
    }

    /// Resolve a mutation; the last one to resolve runs any deferred resync.
    async fn settle(&self, wants_resync: bool) {
        if self.store.end_mutation(wants_resync) {
            if let Err(e) = self.resync().await {
                tracing::warn!(error = %e, "resync after mutation failed");
            }
        }
    }

    // === Non-optimistic operations ===

    /// Replace the table with the source of record.
    ///
    /// The result is dropped if a mutation starts while the load is in
    /// flight, and deferred while mutations are pending.
    pub async fn resync(&self) -> TagkeepResult<ResyncOutcome> {
        let ticket = self.store.begin_resync();
        let snapshot = self.persistence.load_snapshot(self.user()).await?;
        let outcome = self.store.finish_resync(&ticket, snapshot);
        if let ResyncOutcome::Applied { version, changed } = outcome {
            self.emit(EngineEvent::Resynced { version, changed });
        }
        tracing::debug!(user = %self.user(), ?outcome, "resync finished");
        Ok(outcome)
    }

    /// Add a text. Persistence assigns the id; the text is then inserted and,
    /// if configured, classified. A classifier failure does not fail the add.
    pub async fn add_text(&self, raw_content: &str) -> TagkeepResult<TextAdded> {
        let content = normalize_content(raw_content)?;
        let text = self
            .persistence
            .create_text(self.user(), &content, None)
            .await?;
        let inserted = text.clone();
        self.store.apply_delta(move |table| {
            let mut next = table.clone();
            next.insert_text(inserted);
            next
        });
        tracing::info!(user = %self.user(), text_id = %text.id, "text added");

        let classification = if self.options.classify_on_create {
            match self.reclassify(&text.id).await {
                Ok(mutation) => Some(mutation),
                Err(e) => {
                    tracing::warn!(text_id = %text.id, error = %e, "classification on create failed");
                    None
                }
            }
        } else {
            None
        };
        Ok(TextAdded {
            text,
            classification,
        })
    }

    /// Create a tag. An exact name clash is a conflict; a case variant is not.
    pub async fn create_tag(&self, raw_name: &str) -> TagkeepResult<Tag> {
        let name = normalize_tag_name(raw_name)?;
        if self.store.snapshot().tag_named(&name, None).is_some() {
            return Err(TagkeepError::DuplicateTagName(name));
        }
        let tag = self.persistence.create_tag(self.user(), &name).await?;
        let inserted = tag.clone();
        self.store.apply_delta(move |table| {
            let mut next = table.clone();
            next.insert_tag(inserted);
            next
        });
        tracing::info!(user = %self.user(), tag = %tag.name, "tag created");
        Ok(tag)
    }

    /// Create each default tag that has no case-insensitive match yet.
    /// Returns the tags actually created.
    pub async fn seed_default_tags(&self, names: &[String]) -> TagkeepResult<Vec<Tag>> {
        let mut created = Vec::new();
        for raw in names {
            let name = normalize_tag_name(raw)?;
            if self.store.snapshot().tag_named_folded(&name).is_some() {
                continue;
            }
            match self.create_tag(&name).await {
                Ok(tag) => created.push(tag),
                Err(TagkeepError::DuplicateTagName(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        tracing::info!(user = %self.user(), created = created.len(), "default tags seeded");
        Ok(created)
    }

    /// Re-classify several texts, one after another
    pub async fn reclassify_many(&self, text_ids: &[TextId]) -> BatchReport {
        let mut report = BatchReport::default();
        for id in text_ids {
            match self.reclassify(id).await {
                Ok(_) => report.succeeded.push(id.clone()),
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }
        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk re-classification finished"
        );
        report
    }

    /// Number of texts the tag is assigned to, per the source of record
    pub async fn tag_usage(&self, tag_id: &TagId) -> TagkeepResult<usize> {
        Ok(self
            .persistence
            .count_assignments_by_tag(self.user(), tag_id)
            .await?)
    }
}

fn require_text<'a>(table: &'a Table, id: &TextId) -> TagkeepResult<&'a Text> {
    table
        .text(id)
        .ok_or_else(|| TagkeepError::TextNotFound(id.clone()))
}

fn require_tag<'a>(table: &'a Table, id: &TagId) -> TagkeepResult<&'a Tag> {
    table
        .tag(id)
        .ok_or_else(|| TagkeepError::TagNotFound(id.clone()))
}
