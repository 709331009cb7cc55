//! Multi-term tag search
//!
//! A query is split on whitespace and commas into lowercase terms. A text
//! matches when every term is a substring of at least one of its tag names
//! (AND over terms, OR over tags). An empty query matches everything.

use serde::{Deserialize, Serialize};

/// A parsed search query. Terms are lowercased, sorted, and deduplicated, so
/// two queries that differ only in term order or repetition are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    terms: Vec<String>,
}

impl SearchQuery {
    /// The query that matches every text
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        let mut terms: Vec<String> = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        terms.sort();
        terms.dedup();
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Canonical string form, used as the scope key of a filtered view
    pub fn canonical(&self) -> String {
        self.terms.join(" ")
    }

    /// Evaluate the query against a text's assigned tag names.
    pub fn matches<'a, I>(&self, tag_names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.terms.is_empty() {
            return true;
        }
        let lowered: Vec<String> = tag_names.into_iter().map(str::to_lowercase).collect();
        self.terms
            .iter()
            .all(|term| lowered.iter().any(|name| name.contains(term.as_str())))
    }
}

/// One-shot form of [`SearchQuery::matches`].
pub fn matches<'a, I>(tag_names: I, query: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    SearchQuery::parse(query).matches(tag_names)
}
