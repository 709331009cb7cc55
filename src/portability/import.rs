//! Import a portable document into a user's collection

use super::document::{GlossaryName, PortableText, ResolvedTag, FORMAT_ID};
use crate::error::{TagkeepError, TagkeepResult};
use crate::model::{
    fold_name, normalize_content, normalize_tag_name, Assignment, Source, Tag, UserId,
    ValidationError,
};
use crate::persistence::Persistence;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// One entry that could not be imported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportIssue {
    /// Position of the entry in the array it came from
    pub index: usize,
    pub message: String,
}

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub texts_imported: usize,
    pub tags_created: usize,
    pub ai_assignments: usize,
    pub manual_assignments: usize,
    /// Failed `texts` entries
    pub errors: Vec<ImportIssue>,
    /// `tag_glossary` entries whose tag could not be created
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub glossary_errors: Vec<ImportIssue>,
    /// Set when the import landed but reloading the collection afterwards failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resync_error: Option<String>,
}

impl ImportReport {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

/// Tags of the user, looked up case-insensitively. Missing names are created.
struct TagIndex<'a> {
    persistence: &'a dyn Persistence,
    user: &'a UserId,
    by_folded: HashMap<String, Tag>,
    created: usize,
}

impl<'a> TagIndex<'a> {
    async fn load(persistence: &'a dyn Persistence, user: &'a UserId) -> TagkeepResult<Self> {
        let by_folded = persistence
            .list_tags(user)
            .await?
            .into_iter()
            .map(|t| (fold_name(&t.name), t))
            .collect();
        Ok(Self {
            persistence,
            user,
            by_folded,
            created: 0,
        })
    }

    async fn ensure(&mut self, name: &str) -> TagkeepResult<Tag> {
        let folded = fold_name(name);
        if let Some(tag) = self.by_folded.get(&folded) {
            return Ok(tag.clone());
        }
        let tag = self.persistence.create_tag(self.user, name).await?;
        self.created += 1;
        self.by_folded.insert(folded, tag.clone());
        Ok(tag)
    }
}

/// Import a JSON document.
///
/// A wrong or missing `format`, or a document that is not a JSON object, is
/// rejected before anything is written. After that each text entry is
/// processed on its own: a bad entry is recorded in the report and the
/// import continues.
pub async fn import_document(
    persistence: &dyn Persistence,
    user: &UserId,
    raw: &str,
) -> TagkeepResult<ImportReport> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|e| ValidationError::MalformedDocument(e.to_string()))?;
    let Some(fields) = document.as_object() else {
        return Err(ValidationError::MalformedDocument("expected a JSON object".to_string()).into());
    };

    let format = fields.get("format").and_then(Value::as_str);
    if format != Some(FORMAT_ID) {
        return Err(ValidationError::UnknownFormat {
            expected: FORMAT_ID,
            found: fields.get("format").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
        .into());
    }

    let entries = match fields.get("texts") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries.clone(),
        Some(_) => {
            return Err(
                ValidationError::MalformedDocument("'texts' must be an array".to_string()).into(),
            )
        }
    };
    let glossary = match fields.get("tag_glossary") {
        Some(Value::Array(entries)) => entries.clone(),
        _ => Vec::new(),
    };

    let imported_at = Utc::now();
    let mut report = ImportReport::default();
    let mut tags = TagIndex::load(persistence, user).await?;

    for (index, entry) in glossary.into_iter().enumerate() {
        let name = match serde_json::from_value::<GlossaryName>(entry) {
            Ok(g) => g.name,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed glossary entry");
                continue;
            }
        };
        match normalize_tag_name(&name) {
            Ok(name) => {
                if let Err(e) = tags.ensure(&name).await {
                    tracing::warn!(index, name = %name, error = %e, "glossary tag not created");
                    report.glossary_errors.push(ImportIssue {
                        index,
                        message: e.to_string(),
                    });
                }
            }
            Err(e) => tracing::warn!(name = %name, error = %e, "skipping invalid glossary name"),
        }
    }

    for (index, entry) in entries.into_iter().enumerate() {
        match import_entry(persistence, user, &mut tags, entry, imported_at).await {
            Ok((ai, manual)) => {
                report.texts_imported += 1;
                report.ai_assignments += ai;
                report.manual_assignments += manual;
            }
            Err(e) => {
                tracing::debug!(index, error = %e, "import entry failed");
                report.errors.push(ImportIssue {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }
    report.tags_created = tags.created;

    tracing::info!(
        user = %user,
        texts = report.texts_imported,
        tags_created = report.tags_created,
        failed = report.failed(),
        "import finished"
    );
    Ok(report)
}

/// Import one entry. Returns the (ai, manual) assignment counts.
async fn import_entry(
    persistence: &dyn Persistence,
    user: &UserId,
    tags: &mut TagIndex<'_>,
    entry: Value,
    imported_at: DateTime<Utc>,
) -> TagkeepResult<(usize, usize)> {
    let entry: PortableText = serde_json::from_value(entry)
        .map_err(|e| ValidationError::MalformedDocument(e.to_string()))?;
    let content = normalize_content(&entry.content)?;
    let resolved = entry
        .tags
        .iter()
        .map(|t| t.resolve())
        .collect::<Result<Vec<_>, _>>()?;
    let resolved = collapse_duplicates(resolved);

    let mut assignments = Vec::with_capacity(resolved.len());
    for tag in &resolved {
        let stored = tags.ensure(&tag.name).await?;
        assignments.push((stored.id, tag.confidence, tag.source));
    }

    let text = persistence
        .create_text(user, &content, Some(entry.created_at.unwrap_or(imported_at)))
        .await?;
    let (mut ai, mut manual) = (0, 0);
    for (tag_id, confidence, source) in assignments {
        let assignment = Assignment::from_parts(text.id.clone(), tag_id, confidence, source)?;
        if let Err(e) = persistence.upsert_assignment(user, &assignment).await {
            // Keep the entry all-or-nothing
            let _ = persistence.delete_text(user, &text.id).await;
            return Err(TagkeepError::from(e));
        }
        match source {
            Source::Ai => ai += 1,
            Source::Manual => manual += 1,
        }
    }
    Ok((ai, manual))
}

/// One tag per case-insensitive name: manual wins, then higher confidence.
/// First-seen order is kept.
fn collapse_duplicates(tags: Vec<ResolvedTag>) -> Vec<ResolvedTag> {
    let mut out: Vec<ResolvedTag> = Vec::with_capacity(tags.len());
    for tag in tags {
        match out.iter_mut().find(|t| fold_name(&t.name) == fold_name(&tag.name)) {
            Some(existing) => {
                let better = (tag.source, tag.confidence) > (existing.source, existing.confidence);
                if better {
                    existing.confidence = tag.confidence;
                    existing.source = tag.source;
                }
            }
            None => out.push(tag),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    fn alice() -> UserId {
        UserId::from_string("alice")
    }

    fn doc(texts: Value) -> String {
        serde_json::json!({
            "format": FORMAT_ID,
            "exported_at": "2024-01-01T00:00:00Z",
            "account": "alice",
            "texts": texts,
        })
        .to_string()
    }

    #[tokio::test]
    async fn wrong_format_writes_nothing() {
        let store = MemoryPersistence::new();
        let raw = serde_json::json!({
            "format": "other/v9",
            "texts": [{"content": "x", "tags": ["New"]}],
        })
        .to_string();

        let err = import_document(&store, &alice(), &raw).await.unwrap_err();
        assert!(matches!(
            err,
            TagkeepError::Validation(ValidationError::UnknownFormat { .. })
        ));
        assert!(store.list_texts(&alice()).await.unwrap().is_empty());
        assert!(store.list_tags(&alice()).await.unwrap().is_empty());

        let missing = serde_json::json!({"texts": []}).to_string();
        assert!(import_document(&store, &alice(), &missing).await.is_err());
    }

    #[tokio::test]
    async fn three_tag_shapes_get_their_defaults() {
        let store = MemoryPersistence::new();
        let raw = doc(serde_json::json!([{
            "content": "joke",
            "tags": ["Work", {"name": "Family", "confidence": 0.7}, {"name": "Zoo", "source": "ai"}],
        }]));

        let report = import_document(&store, &alice(), &raw).await.unwrap();
        assert_eq!(report.texts_imported, 1);
        assert_eq!(report.tags_created, 3);
        assert_eq!(report.manual_assignments, 1);
        assert_eq!(report.ai_assignments, 2);

        let text = &store.list_texts(&alice()).await.unwrap()[0];
        let tags = store.list_tags(&alice()).await.unwrap();
        let rows = store.list_assignments(&alice(), &text.id).await.unwrap();
        let row = |name: &str| {
            let id = &tags.iter().find(|t| t.name == name).unwrap().id;
            rows.iter().find(|a| &a.tag_id == id).unwrap().clone()
        };
        assert_eq!((row("Work").source, row("Work").confidence), (Source::Manual, 1.0));
        assert_eq!((row("Family").source, row("Family").confidence), (Source::Ai, 0.7));
        assert_eq!((row("Zoo").source, row("Zoo").confidence), (Source::Ai, 0.5));
    }

    #[tokio::test]
    async fn names_match_existing_tags_case_insensitively() {
        let store = MemoryPersistence::new();
        store.create_tag(&alice(), "Work").await.unwrap();
        let raw = doc(serde_json::json!([{"content": "joke", "tags": [" work "]}]));

        let report = import_document(&store, &alice(), &raw).await.unwrap();
        assert_eq!(report.tags_created, 0);
        assert_eq!(store.list_tags(&alice()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_collapse_manual_first() {
        let store = MemoryPersistence::new();
        let raw = doc(serde_json::json!([{
            "content": "joke",
            "tags": [{"name": "Work", "confidence": 0.9}, "WORK", {"name": "work", "confidence": 0.2}],
        }]));

        let report = import_document(&store, &alice(), &raw).await.unwrap();
        assert_eq!(report.manual_assignments, 1);
        assert_eq!(report.ai_assignments, 0);
    }

    #[tokio::test]
    async fn bad_entries_are_reported_and_skipped() {
        let store = MemoryPersistence::new();
        let raw = doc(serde_json::json!([
            {"content": "fine"},
            {"content": "   "},
            {"content": "bad tag", "tags": [{"name": "X", "confidence": 2.0}]},
            {"tags": ["no content"]},
            {"content": "also fine", "created_at": "2020-05-01T10:00:00Z"},
        ]));

        let report = import_document(&store, &alice(), &raw).await.unwrap();
        assert_eq!(report.texts_imported, 2);
        let failed: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
        assert_eq!(failed, [1, 2, 3]);

        let texts = store.list_texts(&alice()).await.unwrap();
        let dated = texts.iter().find(|t| t.content == "also fine").unwrap();
        assert_eq!(dated.created_at.to_rfc3339(), "2020-05-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn glossary_tags_survive_without_texts() {
        let store = MemoryPersistence::new();
        let raw = serde_json::json!({
            "format": FORMAT_ID,
            "tag_glossary": [{"name": "Unused"}, {"name": ""}],
            "texts": [],
        })
        .to_string();

        let report = import_document(&store, &alice(), &raw).await.unwrap();
        assert_eq!(report.tags_created, 1);
        assert_eq!(store.list_tags(&alice()).await.unwrap()[0].name, "Unused");
    }

    #[test]
    fn collapse_prefers_higher_ai_confidence() {
        let tags = vec![
            ResolvedTag { name: "A".into(), confidence: 0.3, source: Source::Ai },
            ResolvedTag { name: "a".into(), confidence: 0.8, source: Source::Ai },
        ];
        let out = collapse_duplicates(tags);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "A");
        assert_eq!(out[0].confidence, 0.8);
    }
}
