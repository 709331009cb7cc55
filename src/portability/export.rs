//! Export a user's collection as a portable document

use super::document::{DetailedTag, GlossaryName, PortableDocument, PortableTag, PortableText, FORMAT_ID};
use crate::error::TagkeepResult;
use crate::model::{TagId, UserId};
use crate::persistence::Persistence;
use chrono::Utc;
use std::collections::HashMap;

/// Build the portable document for `user` from the source of record.
///
/// Texts are ordered oldest first and tags inside a text by name, so two
/// exports of the same collection diff cleanly.
pub async fn export_document(
    persistence: &dyn Persistence,
    user: &UserId,
    account: &str,
) -> TagkeepResult<PortableDocument> {
    let snapshot = persistence.load_snapshot(user).await?;
    let names: HashMap<&TagId, &str> = snapshot
        .tags
        .iter()
        .map(|t| (&t.id, t.name.as_str()))
        .collect();

    let mut texts = snapshot.texts.clone();
    texts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let texts: Vec<PortableText> = texts
        .into_iter()
        .map(|text| {
            let mut tags: Vec<DetailedTag> = snapshot
                .assignments
                .iter()
                .filter(|a| a.text_id == text.id)
                .filter_map(|a| {
                    names.get(&a.tag_id).map(|name| DetailedTag {
                        name: name.to_string(),
                        confidence: Some(a.confidence),
                        source: Some(a.source.as_str().to_string()),
                    })
                })
                .collect();
            tags.sort_by(|a, b| a.name.cmp(&b.name));
            PortableText {
                content: text.content,
                tags: tags.into_iter().map(PortableTag::Detailed).collect(),
                created_at: Some(text.created_at),
            }
        })
        .collect();

    let mut tag_glossary: Vec<GlossaryName> = snapshot
        .tags
        .iter()
        .map(|t| GlossaryName {
            name: t.name.clone(),
        })
        .collect();
    tag_glossary.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::info!(
        user = %user,
        texts = texts.len(),
        tags = tag_glossary.len(),
        "exported collection"
    );
    Ok(PortableDocument {
        format: FORMAT_ID.to_string(),
        exported_at: Utc::now(),
        account: account.to_string(),
        tag_glossary,
        texts,
    })
}

/// Pretty-printed JSON form of a document
pub fn to_json(document: &PortableDocument) -> TagkeepResult<String> {
    Ok(serde_json::to_string_pretty(document)?)
}
