//! Registry source contract.

use super::query::RegistryQuery;
use crate::error::DirectoryError;
use crate::store::RecordChange;
use crate::types::{CollectionId, Interrupt};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Which registry address an attempt went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Primary,
    Mirror,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Primary => f.write_str("primary"),
            Endpoint::Mirror => f.write_str("mirror"),
        }
    }
}

/// How the records of a batch were selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Broad query, every matching record.
    Full,
    /// Manifest upload; the registry answers with changed and removed records.
    Manifest,
    /// `TIMESTAMP=>N` query; removals are not reported.
    SinceTimestamp,
}

/// What to ask the registry for.
#[derive(Debug, Clone, Copy)]
pub enum FetchRequest<'a> {
    Query(&'a RegistryQuery),
    /// Upload `manifest` (`id=timestamp` lines) alongside `query`.
    Manifest {
        query: &'a RegistryQuery,
        manifest: &'a str,
    },
}

impl FetchRequest<'_> {
    pub fn query(&self) -> &RegistryQuery {
        match self {
            FetchRequest::Query(query) => query,
            FetchRequest::Manifest { query, .. } => query,
        }
    }

    pub fn mode(&self) -> FetchMode {
        match self {
            FetchRequest::Manifest { .. } => FetchMode::Manifest,
            FetchRequest::Query(query) if query.is_incremental() => FetchMode::SinceTimestamp,
            FetchRequest::Query(_) => FetchMode::Full,
        }
    }
}

/// Records read by one successful attempt.
///
/// A batch is only returned once its stream ended cleanly or was interrupted;
/// a network failure mid-stream discards the attempt.
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub changes: Vec<RecordChange>,
    /// Malformed records dropped while parsing.
    pub skipped: usize,
    /// The session's interrupt flag stopped the stream early.
    pub interrupted: bool,
    pub endpoint: Endpoint,
    pub mode: FetchMode,
}

impl FetchBatch {
    pub fn empty(endpoint: Endpoint, mode: FetchMode) -> Self {
        Self {
            changes: Vec::new(),
            skipped: 0,
            interrupted: false,
            endpoint,
            mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Transport to a collection registry.
///
/// Implementations perform exactly one attempt per call; fallback between
/// endpoints is left to [`super::RegistryClient`].
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Stream records for `request` from `endpoint`.
    async fn fetch(
        &self,
        endpoint: Endpoint,
        request: FetchRequest<'_>,
        interrupt: &Interrupt,
    ) -> Result<FetchBatch, DirectoryError>;

    /// Identifiers returned by an id-only query (region intersection).
    async fn fetch_ids(
        &self,
        endpoint: Endpoint,
        query: &RegistryQuery,
    ) -> Result<HashSet<CollectionId>, DirectoryError>;
}
