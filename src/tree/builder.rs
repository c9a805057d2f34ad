//! Tree Builder
//!
//! Turns a point-in-time copy of the record store into a brand-new
//! [`CollectionTree`]. A previously returned tree is never touched, so readers
//! holding an older generation are unaffected by a rebuild.

use super::node::{NodeIndex, TreeNode};
use super::path::{child_path, shadowed_leaf_path, split_path};
use super::CollectionTree;
use crate::store::{CollectionRecord, RecordKind};
use crate::types::{CollectionId, Relevance};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

/// Options controlling which records enter the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Skip hidden records and records known to lie outside the viewport.
    pub inside_only: bool,
}

/// Mutable scratch node used while inserting records.
struct Draft {
    segment: String,
    label: String,
    sort_key: String,
    leaf: Option<LeafData>,
    /// A leaf sharing its segment with a sibling group.
    shadowed: bool,
    groups: HashMap<String, Draft>,
    leaves: HashMap<CollectionId, Draft>,
}

struct LeafData {
    record_id: CollectionId,
    kind: RecordKind,
    hidden: bool,
    relevance: Relevance,
}

impl Draft {
    fn group(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            label: segment.to_string(),
            sort_key: String::new(),
            leaf: None,
            shadowed: false,
            groups: HashMap::new(),
            leaves: HashMap::new(),
        }
    }

    fn leaf(record: &CollectionRecord) -> Self {
        Self {
            segment: record.id.clone(),
            label: record.title().to_string(),
            sort_key: record.sort_key().to_string(),
            leaf: Some(LeafData {
                record_id: record.id.clone(),
                kind: record.kind,
                hidden: record.hidden,
                relevance: record.relevance,
            }),
            shadowed: false,
            groups: HashMap::new(),
            leaves: HashMap::new(),
        }
    }

    /// A group sorts by the smallest sort key found below it.
    fn settle_sort_key(&mut self) -> String {
        if self.leaf.is_none() {
            self.sort_key = self
                .groups
                .values_mut()
                .chain(self.leaves.values_mut())
                .map(Draft::settle_sort_key)
                .min()
                .unwrap_or_else(|| self.label.clone());
        }
        self.sort_key.clone()
    }
}

/// Builds tree generations from record snapshots.
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    options: BuildOptions,
}

impl TreeBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    fn excluded(&self, record: &CollectionRecord) -> bool {
        self.options.inside_only && (record.hidden || record.relevance == Relevance::Outside)
    }

    /// Build a new tree generation from `records`.
    pub fn build(&self, records: &[CollectionRecord], generation: u64) -> CollectionTree {
        let start = Instant::now();
        let mut root = Draft::group("");
        let mut skipped = 0usize;

        for record in records {
            if self.excluded(record) {
                skipped += 1;
                continue;
            }
            if !insert(&mut root, record) {
                warn!(
                    record_id = %record.id,
                    category = record.category(),
                    "Duplicate record id under one category, not inserted"
                );
                skipped += 1;
            }
        }

        root.settle_sort_key();
        let mut tree = CollectionTree::empty(generation);
        flatten(root, None, "", 0, &mut tree);
        tree.compute_counts();

        debug!(
            generation,
            node_count = tree.len(),
            leaf_count = tree.leaf_count(),
            skipped,
            inside_only = self.options.inside_only,
            duration_ms = start.elapsed().as_millis() as u64,
            "Built collection tree"
        );
        tree
    }
}

fn insert(root: &mut Draft, record: &CollectionRecord) -> bool {
    let mut node = root;
    for segment in split_path(record.category()) {
        node = node
            .groups
            .entry(segment.clone())
            .or_insert_with(|| Draft::group(&segment));
    }
    if node.leaves.contains_key(&record.id) {
        return false;
    }
    node.leaves.insert(record.id.clone(), Draft::leaf(record));
    true
}

fn flatten(
    draft: Draft,
    parent: Option<NodeIndex>,
    parent_path: &str,
    depth: usize,
    tree: &mut CollectionTree,
) -> NodeIndex {
    let path = if parent.is_none() {
        String::new()
    } else if draft.shadowed {
        shadowed_leaf_path(parent_path, &draft.segment)
    } else {
        child_path(parent_path, &draft.segment)
    };
    let mut node = TreeNode::new(path.clone(), draft.label, depth);
    node.parent = parent;
    node.sort_key = draft.sort_key;
    if let Some(leaf) = draft.leaf {
        node.is_leaf = true;
        node.hidden = leaf.hidden;
        node.kind = Some(leaf.kind);
        node.set_relevance(leaf.relevance);
        node.record_id = Some(leaf.record_id);
    }
    let index = tree.push(node);

    let Draft { groups, mut leaves, .. } = draft;
    for (id, leaf) in leaves.iter_mut() {
        leaf.shadowed = groups.contains_key(id);
    }
    let mut children: Vec<Draft> = groups.into_values().chain(leaves.into_values()).collect();
    children.sort_by(|a, b| {
        a.sort_key
            .cmp(&b.sort_key)
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.segment.cmp(&b.segment))
    });
    for child in children {
        let child_index = flatten(child, Some(index), &path, depth + 1, tree);
        tree.nodes[index].children.push(child_index);
    }
    index
}
