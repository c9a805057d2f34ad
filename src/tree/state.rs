//! Navigation state carried across rebuilds.
//!
//! Node identity does not survive a rebuild, so state is keyed by node path.

use super::path::ancestors_and_self;
use super::CollectionTree;
use crate::types::NodePath;
use std::collections::{HashMap, HashSet};

/// Paths of expanded nodes.
pub type ExpansionSnapshot = HashSet<NodePath>;

/// Reference counts by node path.
pub type RefCountSnapshot = HashMap<NodePath, usize>;

pub fn snapshot_expansion(tree: &CollectionTree) -> ExpansionSnapshot {
    tree.iter()
        .filter(|n| n.is_expanded())
        .map(|n| n.path.clone())
        .collect()
}

pub fn snapshot_ref_counts(tree: &CollectionTree) -> RefCountSnapshot {
    tree.iter().map(|n| (n.path.clone(), n.ref_count)).collect()
}

/// Reapply saved state onto a freshly built tree.
///
/// With `expansion == None`, grouping nodes shallower than `default_depth` are
/// expanded instead. A node's ref count is overwritten only when `ref_counts`
/// has an entry for its path.
pub fn restore(
    tree: &mut CollectionTree,
    expansion: Option<&ExpansionSnapshot>,
    ref_counts: &RefCountSnapshot,
    default_depth: usize,
) {
    for node in tree.nodes.iter_mut() {
        let expanded = match expansion {
            Some(paths) => paths.contains(&node.path),
            None => !node.is_leaf && node.depth < default_depth,
        };
        node.set_expanded(expanded);
        if let Some(&count) = ref_counts.get(&node.path) {
            node.ref_count = count;
        }
    }
}

/// Drop saved counts for every branch containing one of `leaf_paths`, so those
/// branches keep their freshly computed counts on the next restore.
pub fn invalidate_branches<I, S>(ref_counts: &mut RefCountSnapshot, leaf_paths: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for leaf in leaf_paths {
        for path in ancestors_and_self(leaf.as_ref()) {
            ref_counts.remove(&path);
        }
    }
}
