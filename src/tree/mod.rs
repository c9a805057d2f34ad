//! Collection tree
//!
//! Hierarchical grouping of collection records keyed by category path. A tree
//! is an arena of [`TreeNode`]s produced in one piece by the [`TreeBuilder`];
//! consumers hold an `Arc` to one generation at a time.

pub mod builder;
pub mod node;
pub mod path;
pub mod state;

pub use builder::{BuildOptions, TreeBuilder};
pub use node::{NodeIndex, TreeNode};
pub use state::{
    invalidate_branches, restore, snapshot_expansion, snapshot_ref_counts, ExpansionSnapshot,
    RefCountSnapshot,
};

use crate::types::{CollectionId, NodePath, Relevance};
use std::collections::{BTreeSet, HashMap};

/// Root is always at index 0; every parent index is smaller than its children's.
#[derive(Debug)]
pub struct CollectionTree {
    pub(crate) nodes: Vec<TreeNode>,
    by_path: HashMap<NodePath, NodeIndex>,
    by_record: HashMap<CollectionId, NodeIndex>,
    generation: u64,
}

impl CollectionTree {
    pub(crate) fn empty(generation: u64) -> Self {
        Self {
            nodes: Vec::new(),
            by_path: HashMap::new(),
            by_record: HashMap::new(),
            generation,
        }
    }

    pub(crate) fn push(&mut self, node: TreeNode) -> NodeIndex {
        let index = self.nodes.len();
        self.by_path.insert(node.path.clone(), index);
        if let Some(id) = &node.record_id {
            self.by_record.insert(id.clone(), index);
        }
        self.nodes.push(node);
        index
    }

    /// Bottom-up leaf counts, hidden flags and relevance of grouping nodes.
    pub(crate) fn compute_counts(&mut self) {
        for index in (0..self.nodes.len()).rev() {
            if self.nodes[index].is_leaf {
                let node = &mut self.nodes[index];
                node.ref_count = 1;
                node.live_count = usize::from(!node.hidden);
                continue;
            }
            let (mut total, mut live) = (0, 0);
            let mut relevance: Option<Relevance> = None;
            for &child in &self.nodes[index].children {
                let c = &self.nodes[child];
                total += c.ref_count;
                live += c.live_count;
                relevance = Some(match relevance {
                    None => c.relevance(),
                    Some(r) => r.merge(c.relevance()),
                });
            }
            let node = &mut self.nodes[index];
            node.ref_count = total;
            node.live_count = live;
            node.hidden = node.parent.is_some() && total > 0 && live == 0;
            node.set_relevance(relevance.unwrap_or_default());
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: NodeIndex) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        self.by_path.get(path).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, path: &str) -> Option<NodeIndex> {
        self.by_path.get(path).copied()
    }

    /// Leaf bound to the given record id.
    pub fn leaf_for(&self, record_id: &str) -> Option<&TreeNode> {
        self.by_record.get(record_id).map(|&i| &self.nodes[i])
    }

    pub fn children(&self, index: NodeIndex) -> impl Iterator<Item = &TreeNode> {
        self.nodes[index].children.iter().map(|&c| &self.nodes[c])
    }

    /// Nodes in pre-order (parents before children, siblings sorted).
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    pub fn leaf_count(&self) -> usize {
        self.by_record.len()
    }

    pub fn paths(&self) -> BTreeSet<NodePath> {
        self.by_path.keys().cloned().collect()
    }

    /// Re-derive relevance flags in place from a per-record lookup.
    ///
    /// Only the atomics change; structure and counts are untouched.
    pub fn propagate_relevance<F>(&self, relevance_of: F)
    where
        F: Fn(&str) -> Relevance,
    {
        for node in self.nodes.iter().rev() {
            if let Some(id) = &node.record_id {
                node.set_relevance(relevance_of(id));
                continue;
            }
            let merged = node
                .children
                .iter()
                .map(|&c| self.nodes[c].relevance())
                .reduce(Relevance::merge)
                .unwrap_or_default();
            node.set_relevance(merged);
        }
    }

    /// Toggle expansion of the node at `path`. Returns false if absent.
    pub fn set_expanded(&self, path: &str, expanded: bool) -> bool {
        match self.get(path) {
            Some(node) => {
                node.set_expanded(expanded);
                true
            }
            None => false,
        }
    }
}
