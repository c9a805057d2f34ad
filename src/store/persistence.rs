//! Local binary cache of the record store.
//!
//! Any failure to read the cache is a cache miss. Failure to write it is logged
//! and otherwise ignored by callers.

use super::{CollectionRecord, RecordStore};
use crate::error::DirectoryError;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

const CACHE_MAGIC: [u8; 4] = *b"CDIR";
const CACHE_VERSION: u32 = 3;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    magic: [u8; 4],
    version: u32,
    saved_at: Timestamp,
    records: Vec<CollectionRecord>,
}

/// Single-file binary snapshot of a [`RecordStore`].
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write a snapshot atomically (temp file, then rename).
    pub fn save(&self, store: &RecordStore) -> Result<(), DirectoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = CacheFile {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
            saved_at: chrono::Utc::now().timestamp_millis(),
            records: store.snapshot(),
        };
        let bytes = bincode::serialize(&file)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            record_count = file.records.len(),
            bytes = bytes.len(),
            "Saved local cache"
        );
        Ok(())
    }

    /// Save, logging instead of propagating a failure.
    pub fn save_best_effort(&self, store: &RecordStore) -> bool {
        match self.save(store) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to write local cache");
                false
            }
        }
    }

    /// Read the snapshot, reporting why it could not be used.
    pub fn try_load(&self) -> Result<RecordStore, DirectoryError> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            DirectoryError::CacheError(format!("{}: {}", self.path.display(), e))
        })?;
        let file: CacheFile = bincode::deserialize(&bytes)?;
        if file.magic != CACHE_MAGIC {
            return Err(DirectoryError::CacheError("not a directory cache".to_string()));
        }
        if file.version != CACHE_VERSION {
            return Err(DirectoryError::CacheError(format!(
                "cache version {} (expected {})",
                file.version, CACHE_VERSION
            )));
        }
        Ok(file.records.into_iter().collect())
    }

    /// Read the snapshot; every failure is a cache miss.
    pub fn load(&self) -> Option<RecordStore> {
        match self.try_load() {
            Ok(store) => {
                info!(
                    path = %self.path.display(),
                    record_count = store.len(),
                    "Loaded local cache"
                );
                Some(store)
            }
            Err(e) => {
                info!(path = %self.path.display(), reason = %e, "Local cache miss");
                None
            }
        }
    }

    /// Modification time of the cache file in epoch milliseconds.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        let elapsed = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(elapsed.as_millis() as Timestamp)
    }

    /// Reference time for "modified after" queries.
    ///
    /// The newest record timestamp wins; the cache file time is used only when
    /// no record carries a usable timestamp.
    pub fn staleness_reference(&self, store: &RecordStore) -> Option<Timestamp> {
        store.max_last_modified().or_else(|| self.timestamp())
    }

    pub fn clear(&self) -> Result<bool, DirectoryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
