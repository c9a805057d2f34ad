//! Tree path construction.
//!
//! A node path is its segments joined by `/`, root excluded (the root path is
//! the empty string). A literal `/` or `\` inside a segment is escaped with a
//! backslash. The builder and the snapshot/restore logic both go through these
//! functions so that paths computed on either side always agree.

use crate::store::CollectionRecord;
use crate::types::NodePath;

/// Escape a single segment so that it survives [`split_path`].
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == '/' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Join raw (unescaped) segments into a node path.
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> NodePath {
    segments
        .iter()
        .map(|s| escape_segment(s.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Append one raw segment to an existing path.
pub fn child_path(parent: &str, segment: &str) -> NodePath {
    if parent.is_empty() {
        escape_segment(segment)
    } else {
        format!("{}/{}", parent, escape_segment(segment))
    }
}

/// Path of a leaf whose id equals the segment of a sibling group.
///
/// The trailing `\@` is never produced by [`escape_segment`], so the result
/// cannot clash with any group path.
pub fn shadowed_leaf_path(parent: &str, id: &str) -> NodePath {
    format!("{}\\@", child_path(parent, id))
}

/// Split a path (or a category string) into unescaped segments.
///
/// Empty and whitespace-only segments are dropped; segments are trimmed.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => current.push('\\'),
            },
            '/' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Path of the group node holding a record.
pub fn category_path(record: &CollectionRecord) -> NodePath {
    join_path(&split_path(record.category()))
}

/// Path of the leaf node bound to a record: its category followed by its id.
pub fn leaf_path(record: &CollectionRecord) -> NodePath {
    child_path(&category_path(record), &record.id)
}

/// Leaf path of `id` filed under the raw category string `category`.
pub fn leaf_path_in(category: &str, id: &str) -> NodePath {
    child_path(&join_path(&split_path(category)), id)
}

/// Every proper ancestor of `path`, root first, then `path` itself.
pub fn ancestors_and_self(path: &str) -> Vec<NodePath> {
    let segments = split_path_raw(path);
    let mut out = Vec::with_capacity(segments.len() + 1);
    out.push(String::new());
    for i in 1..=segments.len() {
        out.push(segments[..i].join("/"));
    }
    out
}

/// Split on unescaped `/` while keeping escapes in each piece.
fn split_path_raw(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    let bytes = path.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'/' => {
                pieces.push(&path[start..i]);
                start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    pieces.push(&path[start.min(path.len())..]);
    pieces
}
