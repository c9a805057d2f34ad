//! Collection directory facade.
//!
//! Owns the record store and the published tree generation. Every rebuild
//! produces a fresh [`CollectionTree`] from a point-in-time copy of the store
//! and swaps it in; readers keep whatever `Arc` they already hold.

use crate::config::TreeConfig;
use crate::error::DirectoryError;
use crate::filter::{self, FilterOutcome};
use crate::store::{RecordChange, RecordStore, SharedStore};
use crate::tree::{
    invalidate_branches, restore, snapshot_expansion, snapshot_ref_counts, BuildOptions,
    CollectionTree, RefCountSnapshot, TreeBuilder,
};
use crate::types::{CollectionId, NodePath};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How reference counts are carried into the next generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildMode {
    /// Every count is freshly computed.
    Full,
    /// Previous counts are reused except on branches containing one of the
    /// listed leaf paths.
    Incremental { invalidated: Vec<NodePath> },
}

impl RebuildMode {
    /// Reuse every previous count.
    pub fn reuse() -> Self {
        RebuildMode::Incremental {
            invalidated: Vec::new(),
        }
    }
}

/// Outcome of merging a batch of registry changes into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub upserted: usize,
    /// Upserts of ids the store did not hold before.
    pub inserted: usize,
    pub removed: usize,
    /// Removals of ids the store did not hold.
    pub unchanged: usize,
    /// Leaf paths whose branches need fresh counts.
    pub leaf_paths: Vec<NodePath>,
    /// A top-level category appeared that the store did not have before.
    pub new_top_level: bool,
}

impl AppliedChanges {
    pub fn changed(&self) -> usize {
        self.upserted + self.removed
    }

    /// Rebuild mode matching these changes.
    pub fn rebuild_mode(&self) -> RebuildMode {
        if self.new_top_level {
            RebuildMode::Full
        } else {
            RebuildMode::Incremental {
                invalidated: self.leaf_paths.clone(),
            }
        }
    }
}

pub struct CollectionDirectory {
    store: SharedStore,
    tree: RwLock<Arc<CollectionTree>>,
    generation: AtomicU64,
    inside_only: AtomicBool,
    active_filter: RwLock<Option<String>>,
    default_depth: usize,
    /// Serializes rebuilds so generations are published in order.
    rebuild_lock: Mutex<()>,
    published: watch::Sender<u64>,
}

impl CollectionDirectory {
    pub fn new(store: RecordStore, config: &TreeConfig) -> Self {
        let (published, _) = watch::channel(0);
        Self {
            store: store.shared(),
            tree: RwLock::new(Arc::new(TreeBuilder::default().build(&[], 0))),
            generation: AtomicU64::new(0),
            inside_only: AtomicBool::new(false),
            active_filter: RwLock::new(None),
            default_depth: config.default_expansion_depth,
            rebuild_lock: Mutex::new(()),
            published,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn record_count(&self) -> usize {
        self.store.read().len()
    }

    /// Currently published generation.
    pub fn current_tree(&self) -> Arc<CollectionTree> {
        self.tree.read().clone()
    }

    /// Receiver notified with each newly published generation number.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }

    /// Wait until a first tree generation has been published.
    pub async fn wait_first_tree(&self) -> u64 {
        let mut rx = self.published.subscribe();
        let generation = match rx.wait_for(|generation| *generation > 0).await {
            Ok(generation) => *generation,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.current_tree().generation(),
        };
        generation
    }

    /// Replace the whole store, keeping the active filter in force.
    pub fn replace_store(&self, store: RecordStore) {
        let mut guard = self.store.write();
        *guard = store;
        self.reapply_filter(&mut guard);
    }

    /// Merge registry changes into the store.
    pub fn apply_changes(&self, changes: Vec<RecordChange>) -> AppliedChanges {
        let mut store = self.store.write();
        let before = store.top_level_categories();
        let mut applied = AppliedChanges::default();
        for change in changes {
            let removal = matches!(change, RecordChange::Remove(_));
            let effect = store.apply(change);
            if effect.is_noop() {
                applied.unchanged += 1;
                continue;
            }
            if removal {
                applied.removed += 1;
            } else {
                applied.upserted += 1;
                if effect.previous_category.is_none() {
                    applied.inserted += 1;
                }
            }
            applied.leaf_paths.extend(effect.leaf_paths());
        }
        applied.new_top_level = !store.top_level_categories().is_subset(&before);
        if applied.changed() > 0 {
            self.reapply_filter(&mut store);
        }
        debug!(
            upserted = applied.upserted,
            inserted = applied.inserted,
            removed = applied.removed,
            unchanged = applied.unchanged,
            new_top_level = applied.new_top_level,
            "Applied registry changes"
        );
        applied
    }

    fn reapply_filter(&self, store: &mut RecordStore) {
        if let Some(expression) = self.active_filter.read().as_deref() {
            if let Err(err) = filter::apply_filter(store, expression) {
                warn!(expression, error = %err, "Active filter no longer applies");
            }
        }
    }

    /// Build and publish a new generation from the current store contents.
    ///
    /// Expansion is carried over by path from the published tree; before the
    /// first publication the configured default depth is expanded instead.
    pub fn rebuild_tree(&self, mode: RebuildMode) -> Arc<CollectionTree> {
        let _guard = self.rebuild_lock.lock();
        let previous = self.current_tree();
        let records = self.store.read().snapshot();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let options = BuildOptions {
            inside_only: self.inside_only.load(Ordering::SeqCst),
        };
        let mut tree = TreeBuilder::new(options).build(&records, generation);

        let expansion = (previous.generation() > 0).then(|| snapshot_expansion(&previous));
        let ref_counts = match &mode {
            RebuildMode::Full => RefCountSnapshot::new(),
            RebuildMode::Incremental { invalidated } => {
                let mut counts = snapshot_ref_counts(&previous);
                invalidate_branches(&mut counts, invalidated);
                counts
            }
        };
        restore(&mut tree, expansion.as_ref(), &ref_counts, self.default_depth);

        let tree = Arc::new(tree);
        *self.tree.write() = tree.clone();
        self.published.send_replace(generation);
        info!(
            generation,
            leaf_count = tree.leaf_count(),
            full_recompute = mode == RebuildMode::Full,
            "Published collection tree"
        );
        tree
    }

    /// Filter records by expression and rebuild. Parse errors change nothing.
    pub fn apply_filter(&self, expression: &str) -> Result<FilterOutcome, DirectoryError> {
        // Store before filter, matching `apply_changes`.
        let mut store = self.store.write();
        let outcome = filter::apply_filter(&mut store, expression)?;
        *self.active_filter.write() = Some(outcome.expression.clone());
        drop(store);
        self.rebuild_tree(RebuildMode::reuse());
        Ok(outcome)
    }

    /// Free-text filter; empty text clears.
    pub fn quick_filter(&self, text: &str) -> Result<FilterOutcome, DirectoryError> {
        let mut store = self.store.write();
        let outcome = filter::quick_filter(&mut store, text)?;
        *self.active_filter.write() =
            (!outcome.expression.is_empty()).then(|| outcome.expression.clone());
        drop(store);
        self.rebuild_tree(RebuildMode::reuse());
        Ok(outcome)
    }

    pub fn clear_filter(&self) {
        let mut store = self.store.write();
        filter::clear_filter(&mut store);
        *self.active_filter.write() = None;
        drop(store);
        self.rebuild_tree(RebuildMode::reuse());
    }

    pub fn active_filter(&self) -> Option<String> {
        self.active_filter.read().clone()
    }

    pub fn inside_only(&self) -> bool {
        self.inside_only.load(Ordering::SeqCst)
    }

    /// Switch inside-viewport-only mode; rebuilds when the mode changes.
    pub fn set_inside_only(&self, inside_only: bool) {
        if self.inside_only.swap(inside_only, Ordering::SeqCst) != inside_only {
            self.rebuild_tree(RebuildMode::reuse());
        }
    }

    /// Expand or collapse a node of the published tree.
    pub fn set_expanded(&self, path: &str, expanded: bool) -> bool {
        self.current_tree().set_expanded(path, expanded)
    }

    /// Record region query results on the store. `None` marks every record unknown.
    pub fn set_relevance(&self, inside: Option<&HashSet<CollectionId>>) {
        self.store.write().set_relevance(inside);
    }

    /// Copy record relevance onto the published tree without rebuilding.
    pub fn propagate_relevance(&self) {
        let tree = self.current_tree();
        let store = self.store.read();
        tree.propagate_relevance(|id| store.get(id).map(|r| r.relevance).unwrap_or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;
    use crate::tree::path::leaf_path;
    use crate::types::Relevance;

    fn directory() -> CollectionDirectory {
        let store: RecordStore = vec![
            record("A", "Image/Optical", 10),
            record("B", "Image/Radio", 20),
            record("C", "Catalog/VizieR", 30),
        ]
        .into_iter()
        .collect();
        CollectionDirectory::new(store, &TreeConfig::default())
    }

    #[test]
    fn starts_with_empty_unpublished_tree() {
        let dir = CollectionDirectory::new(RecordStore::new(), &TreeConfig::default());
        assert_eq!(dir.current_tree().generation(), 0);
        assert_eq!(*dir.subscribe().borrow(), 0);
    }

    #[test]
    fn rebuild_publishes_new_generation_and_keeps_old_one_intact() {
        let dir = directory();
        let first = dir.rebuild_tree(RebuildMode::Full);
        assert_eq!(first.generation(), 1);
        assert_eq!(*dir.subscribe().borrow(), 1);

        dir.apply_changes(vec![RecordChange::Remove("A".into())]);
        let second = dir.rebuild_tree(RebuildMode::Full);
        assert_eq!(second.generation(), 2);
        assert_eq!(first.leaf_count(), 3);
        assert_eq!(second.leaf_count(), 2);
        assert!(Arc::ptr_eq(&dir.current_tree(), &second));
    }

    #[test]
    fn first_build_uses_default_expansion_then_carries_it() {
        let dir = directory();
        let tree = dir.rebuild_tree(RebuildMode::Full);
        assert!(tree.root().is_expanded());
        assert!(!tree.get("Image").unwrap().is_expanded());

        assert!(dir.set_expanded("Image", true));
        let tree = dir.rebuild_tree(RebuildMode::reuse());
        assert!(tree.get("Image").unwrap().is_expanded());
        assert!(!tree.get("Catalog").unwrap().is_expanded());
    }

    #[test]
    fn incremental_rebuild_reuses_unaffected_counts() {
        let dir = directory();
        dir.rebuild_tree(RebuildMode::Full);

        let applied = dir.apply_changes(vec![
            RecordChange::Upsert(record("D", "Image/Radio", 40)),
            RecordChange::Remove("missing".into()),
        ]);
        assert_eq!(applied.upserted, 1);
        assert_eq!(applied.unchanged, 1);
        assert!(!applied.new_top_level);
        let tree = dir.rebuild_tree(applied.rebuild_mode());
        assert_eq!(tree.get("Image/Radio").unwrap().ref_count, 2);
        assert_eq!(tree.get("Image").unwrap().ref_count, 3);
        assert_eq!(tree.root().ref_count, 4);
        assert_eq!(tree.get("Catalog").unwrap().ref_count, 1);
    }

    #[test]
    fn new_top_level_category_forces_full_recompute() {
        let dir = directory();
        let applied = dir.apply_changes(vec![RecordChange::Upsert(record("E", "Cube/X", 1))]);
        assert!(applied.new_top_level);
        assert_eq!(applied.rebuild_mode(), RebuildMode::Full);
    }

    #[test]
    fn filter_hides_records_and_survives_ingestion() {
        let dir = directory();
        dir.rebuild_tree(RebuildMode::Full);
        let outcome = dir.apply_filter("ID=A").unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(dir.active_filter().as_deref(), Some("ID=A"));

        let tree = dir.current_tree();
        assert!(tree.get("Catalog").unwrap().hidden);
        assert!(!tree.get("Image").unwrap().hidden);
        assert_eq!(tree.get("Image").unwrap().live_count, 1);

        dir.apply_changes(vec![RecordChange::Upsert(record("F", "Image/Radio", 5))]);
        assert!(dir.store().read().get("F").unwrap().hidden);

        assert!(dir.apply_filter("(ID=1").is_err());
        assert_eq!(dir.active_filter().as_deref(), Some("ID=A"));

        dir.clear_filter();
        assert!(dir.active_filter().is_none());
        assert!(dir.store().read().iter().all(|r| !r.hidden));
    }

    #[test]
    fn filter_and_ingestion_agree_under_contention() {
        let dir = Arc::new(directory());
        let expressions = ["client_category=Image*", "client_category=Catalog*"];
        let filtering = {
            let dir = dir.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    dir.apply_filter(expressions[i % 2]).unwrap();
                }
            })
        };
        let ingesting = {
            let dir = dir.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let category = if i % 2 == 0 { "Image/Optical" } else { "Catalog/VizieR" };
                    let change = RecordChange::Upsert(record(&format!("N{}", i), category, i as i64));
                    dir.apply_changes(vec![change]);
                }
            })
        };
        filtering.join().unwrap();
        ingesting.join().unwrap();

        let active = dir.active_filter().unwrap();
        let mut expected = dir.store().read().clone();
        filter::apply_filter(&mut expected, &active).unwrap();
        let store = dir.store();
        let store = store.read();
        assert_eq!(store.len(), 203);
        for record in expected.iter() {
            assert_eq!(store.get(&record.id).unwrap().hidden, record.hidden, "{}", record.id);
        }
        assert!(!store.get("C").unwrap().hidden);
    }

    #[test]
    fn quick_filter_with_empty_text_clears() {
        let dir = directory();
        dir.quick_filter("Radio").unwrap();
        assert!(dir.active_filter().is_some());
        dir.quick_filter("  ").unwrap();
        assert!(dir.active_filter().is_none());
    }

    #[test]
    fn inside_only_rebuilds_without_outside_records() {
        let dir = directory();
        dir.rebuild_tree(RebuildMode::Full);
        let inside: HashSet<CollectionId> = ["A".to_string()].into_iter().collect();
        dir.set_relevance(Some(&inside));
        dir.set_inside_only(true);
        let tree = dir.current_tree();
        assert_eq!(tree.generation(), 2);
        assert_eq!(tree.leaf_count(), 1);
        assert!(tree.leaf_for("A").is_some());

        dir.set_inside_only(true);
        assert_eq!(dir.current_tree().generation(), 2);
    }

    #[test]
    fn relevance_propagates_in_place() {
        let dir = directory();
        let tree = dir.rebuild_tree(RebuildMode::Full);
        let inside: HashSet<CollectionId> = ["B".to_string()].into_iter().collect();
        dir.set_relevance(Some(&inside));
        dir.propagate_relevance();
        assert_eq!(tree.generation(), dir.current_tree().generation());
        assert_eq!(tree.get("Image").unwrap().relevance(), Relevance::Inside);
        assert_eq!(tree.get("Catalog").unwrap().relevance(), Relevance::Outside);
        let leaf = leaf_path(dir.store().read().get("B").unwrap());
        assert_eq!(tree.get(&leaf).unwrap().relevance(), Relevance::Inside);
    }

    #[tokio::test]
    async fn first_tree_signal_fires_on_publication() {
        let dir = Arc::new(directory());
        let waiter = {
            let dir = dir.clone();
            tokio::spawn(async move { dir.wait_first_tree().await })
        };
        tokio::task::yield_now().await;
        dir.rebuild_tree(RebuildMode::Full);
        assert_eq!(waiter.await.unwrap(), 1);
    }
}
