//! Transport-independent API layer.
//!
//! `TagkeepApi` is the single entry point for one user session. Frontends
//! (the CLI, an embedding application, tests) call `TagkeepApi` methods;
//! they never reach into the store, engine, or codec directly.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::classifier::ClassifierGateway;
use crate::config::TagkeepConfig;
use crate::engine::{BatchReport, EngineEvent, Mutation, OptimisticEngine, TextAdded};
use crate::error::TagkeepResult;
use crate::model::{fold_name, Assignment, Tag, TagId, TextId, UserId};
use crate::persistence::Persistence;
use crate::portability::{self, ImportReport, PortableDocument};
use crate::search::SearchQuery;
use crate::store::{AssignmentStore, ResyncOutcome, ScopeKey, ScopeView};

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct TagkeepApi {
    engine: Arc<OptimisticEngine>,
    default_tags: Vec<String>,
}

impl TagkeepApi {
    /// Wire a session without loading anything
    pub fn new(
        user: UserId,
        persistence: Arc<dyn Persistence>,
        classifier: Arc<dyn ClassifierGateway>,
        config: &TagkeepConfig,
    ) -> Self {
        let store = Arc::new(AssignmentStore::new(user));
        let engine = OptimisticEngine::new(store, persistence, classifier, config.engine_options());
        Self {
            engine: Arc::new(engine),
            default_tags: config.default_tags.clone(),
        }
    }

    /// Wire a session and load the user's collection
    pub async fn open(
        user: UserId,
        persistence: Arc<dyn Persistence>,
        classifier: Arc<dyn ClassifierGateway>,
        config: &TagkeepConfig,
    ) -> TagkeepResult<Self> {
        let api = Self::new(user, persistence, classifier, config);
        api.engine.resync().await?;
        Ok(api)
    }

    pub fn engine(&self) -> &Arc<OptimisticEngine> {
        &self.engine
    }

    pub fn user(&self) -> &UserId {
        self.engine.store().user()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    // --- Read ---

    /// Texts matching a search, newest first. An empty query lists everything.
    pub fn texts(&self, query: &str) -> ScopeView {
        let key = ScopeKey::new(self.user().clone(), &SearchQuery::parse(query));
        self.engine.store().view(&key)
    }

    /// Open a live scope for a search; its view follows every mutation
    pub fn open_scope(&self, query: &str) -> ScopeKey {
        self.engine.store().open_scope(&SearchQuery::parse(query))
    }

    pub fn close_scope(&self, key: &ScopeKey) -> bool {
        self.engine.store().close_scope(key)
    }

    pub fn view(&self, key: &ScopeKey) -> ScopeView {
        self.engine.store().view(key)
    }

    /// Glossary, ordered by name
    pub fn tags(&self) -> Vec<Tag> {
        self.engine
            .store()
            .snapshot()
            .tags_by_name()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Look a tag up by name: an exact match first, then case-insensitively
    pub fn find_tag(&self, name: &str) -> Option<Tag> {
        let table = self.engine.store().snapshot();
        let name = name.trim();
        table
            .tag_named(name, None)
            .or_else(|| table.tag_named_folded(&fold_name(name)))
            .cloned()
    }

    pub fn assignments(&self, text_id: &TextId) -> Vec<Assignment> {
        self.engine.store().assignments(text_id)
    }

    pub async fn tag_usage(&self, tag_id: &TagId) -> TagkeepResult<usize> {
        self.engine.tag_usage(tag_id).await
    }

    // --- Write ---

    pub async fn add_text(&self, content: &str) -> TagkeepResult<TextAdded> {
        self.engine.add_text(content).await
    }

    pub async fn delete_text(&self, text_id: &TextId) -> TagkeepResult<Mutation> {
        self.engine.delete_text(text_id).await
    }

    pub async fn create_tag(&self, name: &str) -> TagkeepResult<Tag> {
        self.engine.create_tag(name).await
    }

    pub async fn rename_tag(&self, tag_id: &TagId, name: &str) -> TagkeepResult<Mutation> {
        self.engine.rename_tag(tag_id, name).await
    }

    pub async fn delete_tag(&self, tag_id: &TagId) -> TagkeepResult<Mutation> {
        self.engine.delete_tag(tag_id).await
    }

    /// Create the configured default tags that do not exist yet
    pub async fn seed_default_tags(&self) -> TagkeepResult<Vec<Tag>> {
        self.engine.seed_default_tags(&self.default_tags).await
    }

    pub async fn add_manual_tag(&self, text_id: &TextId, tag_id: &TagId) -> TagkeepResult<Mutation> {
        self.engine.add_manual_tag(text_id, tag_id).await
    }

    pub async fn remove_tag(&self, text_id: &TextId, tag_id: &TagId) -> TagkeepResult<Mutation> {
        self.engine.remove_tag(text_id, tag_id).await
    }

    pub async fn reclassify(&self, text_id: &TextId) -> TagkeepResult<Mutation> {
        self.engine.reclassify(text_id).await
    }

    pub async fn reclassify_many(&self, text_ids: &[TextId]) -> BatchReport {
        self.engine.reclassify_many(text_ids).await
    }

    pub async fn resync(&self) -> TagkeepResult<ResyncOutcome> {
        self.engine.resync().await
    }

    // --- Portability ---

    pub async fn export(&self, account: &str) -> TagkeepResult<PortableDocument> {
        portability::export_document(self.engine.persistence().as_ref(), self.user(), account).await
    }

    pub async fn export_json(&self, account: &str) -> TagkeepResult<String> {
        portability::to_json(&self.export(account).await?)
    }

    /// Import a document, then resynchronize the store with the result.
    ///
    /// The import has landed once `import_document` returns, so a failed
    /// resync is reported in `ImportReport::resync_error` rather than as an
    /// error.
    pub async fn import_json(&self, raw: &str) -> TagkeepResult<ImportReport> {
        let mut report =
            portability::import_document(self.engine.persistence().as_ref(), self.user(), raw)
                .await?;
        if let Err(e) = self.engine.resync().await {
            tracing::warn!(user = %self.user(), error = %e, "resync after import failed");
            report.resync_error = Some(e.to_string());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MockClassifier;
    use crate::persistence::MemoryPersistence;

    async fn api() -> TagkeepApi {
        TagkeepApi::open(
            UserId::from_string("alice"),
            Arc::new(MemoryPersistence::new()),
            Arc::new(MockClassifier::returning(vec![])),
            &TagkeepConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn seed_then_find_tags() {
        let api = api().await;
        let created = api.seed_default_tags().await.unwrap();
        assert_eq!(created.len(), 5);
        assert!(api.seed_default_tags().await.unwrap().is_empty());
        assert_eq!(api.find_tag("WORK").unwrap().name, "work");
        assert!(api.find_tag("nothing").is_none());
    }

    #[tokio::test]
    async fn search_follows_manual_tags() {
        let api = api().await;
        let tag = api.create_tag("Штирлиц").await.unwrap();
        let text = api.add_text("анекдот").await.unwrap().text;
        assert!(api.texts("штир").is_empty());

        api.add_manual_tag(&text.id, &tag.id).await.unwrap();
        assert_eq!(api.texts("штир").len(), 1);
        assert_eq!(api.texts("").len(), 1);
    }

    #[tokio::test]
    async fn import_is_visible_after_resync() {
        let api = api().await;
        let raw = serde_json::json!({
            "format": crate::portability::FORMAT_ID,
            "texts": [{"content": "joke", "tags": ["Work"]}],
        })
        .to_string();
        let report = api.import_json(&raw).await.unwrap();
        assert_eq!(report.texts_imported, 1);
        assert_eq!(api.texts("work").len(), 1);
        assert_eq!(api.tags().len(), 1);
    }
}
