//! Record Store
//!
//! Keyed collection of [`CollectionRecord`]s. Iteration order is by id so that
//! every consumer (tree builder, cache writer, manifest) sees a deterministic
//! sequence.

pub mod persistence;
pub mod record;

pub use persistence::LocalCache;
pub use record::{keys, normalize_id, CollectionRecord, Properties, RecordKind};

use crate::filter::FilterExpr;
use crate::tree::path::leaf_path_in;
use crate::types::{CollectionId, NodePath, Relevance, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Store shared between the synchronizer (sole writer) and readers.
pub type SharedStore = Arc<RwLock<RecordStore>>;

/// One ingested registry item.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Upsert(CollectionRecord),
    Remove(CollectionId),
}

impl RecordChange {
    pub fn id(&self) -> &str {
        match self {
            RecordChange::Upsert(record) => &record.id,
            RecordChange::Remove(id) => id,
        }
    }
}

/// What applying a [`RecordChange`] did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEffect {
    pub id: CollectionId,
    /// Category of the record before the change, if it existed.
    pub previous_category: Option<String>,
    /// Category after the change, if the record still exists.
    pub current_category: Option<String>,
}

impl ChangeEffect {
    pub fn is_noop(&self) -> bool {
        self.previous_category.is_none() && self.current_category.is_none()
    }

    /// Tree leaves touched by the change: the old position and the new one.
    pub fn leaf_paths(&self) -> Vec<NodePath> {
        let mut paths: Vec<NodePath> = [&self.previous_category, &self.current_category]
            .into_iter()
            .flatten()
            .map(|category| leaf_path_in(category, &self.id))
            .collect();
        paths.dedup();
        paths
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<CollectionId, CollectionRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CollectionRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionRecord> {
        self.records.values()
    }

    /// Insert or replace a record. Runtime flags of a replaced record survive.
    pub fn upsert(&mut self, mut record: CollectionRecord) -> ChangeEffect {
        let previous = self.records.get(&record.id);
        let previous_category = previous.map(|p| p.category().to_string());
        if let Some(p) = previous {
            record.hidden = p.hidden;
            record.relevance = p.relevance;
        }
        let effect = ChangeEffect {
            id: record.id.clone(),
            previous_category,
            current_category: Some(record.category().to_string()),
        };
        self.records.insert(record.id.clone(), record);
        effect
    }

    /// Remove a record; removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> ChangeEffect {
        let removed = self.records.remove(id);
        ChangeEffect {
            id: id.to_string(),
            previous_category: removed.map(|r| r.category().to_string()),
            current_category: None,
        }
    }

    pub fn apply(&mut self, change: RecordChange) -> ChangeEffect {
        match change {
            RecordChange::Upsert(record) => self.upsert(record),
            RecordChange::Remove(id) => self.remove(&id),
        }
    }

    /// Per-record timestamps sent to the registry for incremental sync.
    pub fn manifest(&self) -> BTreeMap<CollectionId, Timestamp> {
        self.records
            .iter()
            .map(|(id, r)| (id.clone(), r.last_modified))
            .collect()
    }

    /// Most recent usable record timestamp, if any record carries one.
    pub fn max_last_modified(&self) -> Option<Timestamp> {
        self.records
            .values()
            .map(|r| r.last_modified)
            .filter(|t| *t > 0)
            .max()
    }

    /// Ids of all records matching `expr`.
    pub fn scan(&self, expr: &FilterExpr) -> HashSet<CollectionId> {
        self.records
            .values()
            .filter(|r| expr.matches(r))
            .map(|r| r.internal_id.clone())
            .collect()
    }

    /// Mark every record whose internal id is absent from `visible` as hidden.
    /// Returns the number of hidden records.
    pub fn set_hidden_except(&mut self, visible: &HashSet<CollectionId>) -> usize {
        let mut hidden = 0;
        for record in self.records.values_mut() {
            record.hidden = !visible.contains(&record.internal_id);
            if record.hidden {
                hidden += 1;
            }
        }
        hidden
    }

    pub fn clear_hidden(&mut self) {
        for record in self.records.values_mut() {
            record.hidden = false;
        }
    }

    /// Update relevance from a region query result.
    ///
    /// Records without coverage information stay unknown. `None` resets every
    /// record to unknown (no usable spatial reference).
    pub fn set_relevance(&mut self, inside: Option<&HashSet<CollectionId>>) {
        for record in self.records.values_mut() {
            record.relevance = match inside {
                None => Relevance::Unknown,
                Some(_) if !record.has_coverage() => Relevance::Unknown,
                Some(ids) if ids.contains(&record.internal_id) => Relevance::Inside,
                Some(_) => Relevance::Outside,
            };
        }
    }

    /// Point-in-time copy of all records for tree building.
    pub fn snapshot(&self) -> Vec<CollectionRecord> {
        self.records.values().cloned().collect()
    }

    /// Set of distinct top-level category segments.
    pub fn top_level_categories(&self) -> HashSet<String> {
        self.records
            .values()
            .filter_map(|r| crate::tree::path::split_path(r.category()).into_iter().next())
            .collect()
    }
}

impl FromIterator<CollectionRecord> for RecordStore {
    fn from_iter<I: IntoIterator<Item = CollectionRecord>>(iter: I) -> Self {
        let mut store = RecordStore::new();
        for record in iter {
            store.upsert(record);
        }
        store
    }
}
