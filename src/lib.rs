//! Colldir: Collection Directory Synchronization
//!
//! Keeps a local directory of sky survey collection records in step with a
//! remote registry, persists it to a binary cache and publishes immutable,
//! filterable category trees that carry navigation state across rebuilds.

pub mod config;
pub mod directory;
pub mod error;
pub mod filter;
pub mod logging;
pub mod registry;
pub mod relevance;
pub mod store;
pub mod sync;
pub mod tooling;
pub mod tree;
pub mod types;

pub use config::{ConfigLoader, DirectoryConfig};
pub use directory::{AppliedChanges, CollectionDirectory, RebuildMode};
pub use error::DirectoryError;
pub use registry::{RegistryClient, RegistrySource};
pub use relevance::{SpatialRelevanceUpdater, Viewport, ViewportSource};
pub use store::{CollectionRecord, LocalCache, RecordStore};
pub use sync::{SyncPhase, SyncReport, SyncState, Synchronizer};
pub use tree::CollectionTree;
