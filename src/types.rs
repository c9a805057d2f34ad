//! Core types shared across the collection directory.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Normalized collection identifier (scheme prefix stripped).
pub type CollectionId = String;

/// Registry timestamp, milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Slash-delimited tree path, root excluded. See [`crate::tree::path`].
pub type NodePath = String;

/// Whether a collection's coverage intersects the displayed sky region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Relevance {
    #[default]
    Unknown,
    Outside,
    Inside,
}

impl Relevance {
    /// Tri-state encoding: -1 unknown, 0 outside, 1 inside.
    pub fn as_i8(self) -> i8 {
        match self {
            Relevance::Unknown => -1,
            Relevance::Outside => 0,
            Relevance::Inside => 1,
        }
    }

    pub fn from_i8(value: i8) -> Self {
        match value {
            0 => Relevance::Outside,
            1 => Relevance::Inside,
            _ => Relevance::Unknown,
        }
    }

    /// Combine two child values into a grouping value.
    ///
    /// Any inside child makes the group inside; a group is outside only when
    /// every child is known to be outside.
    pub fn merge(self, other: Relevance) -> Relevance {
        match (self, other) {
            (Relevance::Inside, _) | (_, Relevance::Inside) => Relevance::Inside,
            (Relevance::Unknown, _) | (_, Relevance::Unknown) => Relevance::Unknown,
            _ => Relevance::Outside,
        }
    }
}

/// Cooperative interruption flag shared by one sync session.
///
/// Cloning shares the flag. Stream readers check it once per record.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
