//! Scoped views: projections of the table for one (user, query) pair

use super::table::Table;
use crate::model::{Source, Tag, Text, UserId};
use crate::search::SearchQuery;
use serde::Serialize;
use std::fmt;

/// Identifies one open view. The query is stored in canonical form, so two
/// spellings of the same search share a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeKey {
    pub user: UserId,
    pub query: Option<String>,
}

impl ScopeKey {
    pub fn new(user: UserId, query: &SearchQuery) -> Self {
        Self {
            user,
            query: if query.is_empty() {
                None
            } else {
                Some(query.canonical())
            },
        }
    }

    /// The query this scope filters by
    pub fn search(&self) -> SearchQuery {
        self.query
            .as_deref()
            .map(SearchQuery::parse)
            .unwrap_or_default()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(q) => write!(f, "{}?{}", self.user, q),
            None => write!(f, "{}", self.user),
        }
    }
}

/// A tag as rendered on a text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagBadge {
    pub tag: Tag,
    pub confidence: f64,
    pub source: Source,
}

/// One text with its tags, ordered by tag name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextView {
    pub text: Text,
    pub tags: Vec<TagBadge>,
}

impl TextView {
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|b| b.tag.name.as_str())
    }
}

/// Rendered content of a scope: matching texts, newest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeView {
    pub key: ScopeKey,
    pub texts: Vec<TextView>,
}

impl ScopeView {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn get(&self, id: &crate::model::TextId) -> Option<&TextView> {
        self.texts.iter().find(|v| &v.text.id == id)
    }
}

/// Project `table` through `query`
pub fn render(table: &Table, key: &ScopeKey) -> ScopeView {
    let query = key.search();
    let texts = table
        .texts_newest_first()
        .into_iter()
        .filter(|text| query.matches(table.tag_names_for(&text.id)))
        .map(|text| {
            let mut tags: Vec<TagBadge> = table
                .assignments_for(&text.id)
                .into_iter()
                .filter_map(|a| {
                    table.tag(&a.tag_id).map(|tag| TagBadge {
                        tag: tag.clone(),
                        confidence: a.confidence,
                        source: a.source,
                    })
                })
                .collect();
            tags.sort_by(|a, b| a.tag.name.cmp(&b.tag.name));
            TextView {
                text: text.clone(),
                tags,
            }
        })
        .collect();
    ScopeView {
        key: key.clone(),
        texts,
    }
}
