//! Tree node representation.

use crate::store::RecordKind;
use crate::types::{CollectionId, NodePath, Relevance};
use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};

/// Index of a node inside its [`super::CollectionTree`] arena.
pub type NodeIndex = usize;

/// One node of a built tree.
///
/// Structure and counts are fixed once a generation is published. Expansion
/// and relevance are atomics so they can change without a rebuild.
#[derive(Debug)]
pub struct TreeNode {
    pub path: NodePath,
    pub label: String,
    pub depth: usize,
    pub is_leaf: bool,
    /// Bound record, set only on leaves.
    pub record_id: Option<CollectionId>,
    pub kind: Option<RecordKind>,
    pub sort_key: String,
    pub hidden: bool,
    /// Baseline descendant-leaf count; may come from a previous generation.
    pub ref_count: usize,
    /// Descendant leaves that are not hidden.
    pub live_count: usize,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    expanded: AtomicBool,
    relevance: AtomicI8,
}

impl TreeNode {
    pub(crate) fn new(path: NodePath, label: String, depth: usize) -> Self {
        Self {
            path,
            label,
            depth,
            is_leaf: false,
            record_id: None,
            kind: None,
            sort_key: String::new(),
            hidden: false,
            ref_count: 0,
            live_count: 0,
            parent: None,
            children: Vec::new(),
            expanded: AtomicBool::new(false),
            relevance: AtomicI8::new(Relevance::Unknown.as_i8()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::Relaxed)
    }

    pub fn set_expanded(&self, expanded: bool) {
        self.expanded.store(expanded, Ordering::Relaxed);
    }

    pub fn relevance(&self) -> Relevance {
        Relevance::from_i8(self.relevance.load(Ordering::Relaxed))
    }

    pub fn set_relevance(&self, relevance: Relevance) {
        self.relevance.store(relevance.as_i8(), Ordering::Relaxed);
    }
}
