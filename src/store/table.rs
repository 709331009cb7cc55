//! The normalized table behind every scoped view

use crate::model::{fold_name, Assignment, AssignmentKey, Tag, TagId, Text, TextId};
use crate::persistence::UserSnapshot;
use std::collections::{BTreeMap, BTreeSet};

/// Key of a row that a mutation can touch. Version stamps are recorded per
/// key so a rollback can tell which rows a newer mutation has overwritten.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StampKey {
    Text(TextId),
    Tag(TagId),
    Assignment(AssignmentKey),
}

/// Immutable value of the user's texts, tags, and assignments.
///
/// Mutations never edit a table in place: they build a new one from the
/// current value, so a previous table can be kept as a rollback snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub texts: BTreeMap<TextId, Text>,
    pub tags: BTreeMap<TagId, Tag>,
    pub assignments: BTreeMap<AssignmentKey, Assignment>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a persisted snapshot. Assignments whose text or tag
    /// is missing are dropped.
    pub fn from_snapshot(snapshot: UserSnapshot) -> Self {
        let mut table = Self::new();
        for text in snapshot.texts {
            table.texts.insert(text.id.clone(), text);
        }
        for tag in snapshot.tags {
            table.tags.insert(tag.id.clone(), tag);
        }
        for assignment in snapshot.assignments {
            table.insert_assignment(assignment);
        }
        table
    }

    // === Reads ===

    pub fn text(&self, id: &TextId) -> Option<&Text> {
        self.texts.get(id)
    }

    pub fn tag(&self, id: &TagId) -> Option<&Tag> {
        self.tags.get(id)
    }

    pub fn assignment(&self, text_id: &TextId, tag_id: &TagId) -> Option<&Assignment> {
        self.assignments
            .get(&AssignmentKey::new(text_id.clone(), tag_id.clone()))
    }

    /// Assignments of one text, ordered by tag id
    pub fn assignments_for(&self, text_id: &TextId) -> Vec<Assignment> {
        self.rows_for(text_id).map(|(_, a)| a.clone()).collect()
    }

    /// Names of the tags assigned to a text
    pub fn tag_names_for(&self, text_id: &TextId) -> Vec<&str> {
        self.rows_for(text_id)
            .filter_map(|(k, _)| self.tags.get(&k.tag_id))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Texts, newest first
    pub fn texts_newest_first(&self) -> Vec<&Text> {
        let mut texts: Vec<&Text> = self.texts.values().collect();
        texts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        texts
    }

    /// Tags, ordered by name
    pub fn tags_by_name(&self) -> Vec<&Tag> {
        let mut tags: Vec<&Tag> = self.tags.values().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    /// Tag with exactly this name, other than `except`
    pub fn tag_named(&self, name: &str, except: Option<&TagId>) -> Option<&Tag> {
        self.tags
            .values()
            .find(|t| t.name == name && Some(&t.id) != except)
    }

    /// Case-insensitive tag lookup
    pub fn tag_named_folded(&self, name: &str) -> Option<&Tag> {
        let folded = fold_name(name);
        self.tags.values().find(|t| fold_name(&t.name) == folded)
    }

    pub fn usage(&self, tag_id: &TagId) -> usize {
        self.assignments.keys().filter(|k| &k.tag_id == tag_id).count()
    }

    // === Transformations ===

    pub fn insert_text(&mut self, text: Text) {
        self.texts.insert(text.id.clone(), text);
    }

    /// Remove a text and every assignment that references it
    pub fn remove_text(&mut self, id: &TextId) -> bool {
        let existed = self.texts.remove(id).is_some();
        self.assignments.retain(|k, _| &k.text_id != id);
        existed
    }

    pub fn insert_tag(&mut self, tag: Tag) {
        self.tags.insert(tag.id.clone(), tag);
    }

    /// Remove a tag and every assignment that references it
    pub fn remove_tag(&mut self, id: &TagId) -> bool {
        let existed = self.tags.remove(id).is_some();
        self.assignments.retain(|k, _| &k.tag_id != id);
        existed
    }

    /// Insert or replace an assignment. Ignored when its text or tag is absent.
    pub fn insert_assignment(&mut self, assignment: Assignment) -> bool {
        if !self.texts.contains_key(&assignment.text_id)
            || !self.tags.contains_key(&assignment.tag_id)
        {
            return false;
        }
        self.assignments.insert(assignment.key(), assignment);
        true
    }

    pub fn remove_assignment(&mut self, text_id: &TextId, tag_id: &TagId) -> bool {
        self.assignments
            .remove(&AssignmentKey::new(text_id.clone(), tag_id.clone()))
            .is_some()
    }

    /// Replace the whole assignment set of one text
    pub fn replace_assignments_for(&mut self, text_id: &TextId, assignments: Vec<Assignment>) {
        self.assignments.retain(|k, _| &k.text_id != text_id);
        for assignment in assignments {
            self.insert_assignment(assignment);
        }
    }

    // === Diffing and restoring ===

    /// Keys whose row differs between `self` and `other`
    pub fn diff(&self, other: &Table) -> BTreeSet<StampKey> {
        let mut touched = BTreeSet::new();
        diff_maps(&self.texts, &other.texts, StampKey::Text, &mut touched);
        diff_maps(&self.tags, &other.tags, StampKey::Tag, &mut touched);
        diff_maps(
            &self.assignments,
            &other.assignments,
            StampKey::Assignment,
            &mut touched,
        );
        touched
    }

    /// Set each of `keys` back to its value in `snapshot`.
    ///
    /// Texts and tags are restored first so restored assignments find both
    /// ends. An assignment whose text or tag is gone stays absent.
    pub fn restore_from(&mut self, snapshot: &Table, keys: &BTreeSet<StampKey>) {
        for key in keys {
            match key {
                StampKey::Text(id) => match snapshot.texts.get(id) {
                    Some(text) => self.insert_text(text.clone()),
                    None => {
                        self.remove_text(id);
                    }
                },
                StampKey::Tag(id) => match snapshot.tags.get(id) {
                    Some(tag) => self.insert_tag(tag.clone()),
                    None => {
                        self.remove_tag(id);
                    }
                },
                StampKey::Assignment(_) => {}
            }
        }
        for key in keys {
            if let StampKey::Assignment(k) = key {
                match snapshot.assignments.get(k) {
                    Some(a) => {
                        self.insert_assignment(a.clone());
                    }
                    None => {
                        self.assignments.remove(k);
                    }
                }
            }
        }
    }

    // Keys sort by text id first, so one text's rows are contiguous.
    fn rows_for<'a>(
        &'a self,
        text_id: &'a TextId,
    ) -> impl Iterator<Item = (&'a AssignmentKey, &'a Assignment)> + 'a {
        let start = AssignmentKey::new(text_id.clone(), TagId::from_string(""));
        self.assignments
            .range(start..)
            .take_while(move |(k, _)| &k.text_id == text_id)
    }
}

fn diff_maps<K, V>(
    a: &BTreeMap<K, V>,
    b: &BTreeMap<K, V>,
    wrap: impl Fn(K) -> StampKey,
    out: &mut BTreeSet<StampKey>,
) where
    K: Ord + Clone,
    V: PartialEq,
{
    for (k, v) in a {
        if b.get(k) != Some(v) {
            out.insert(wrap(k.clone()));
        }
    }
    for k in b.keys() {
        if !a.contains_key(k) {
            out.insert(wrap(k.clone()));
        }
    }
}
