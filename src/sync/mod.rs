//! Synchronizer
//!
//! Drives the record store from the registry.
//!
//! Cold start (no usable cache):
//! `Idle -> BulkLoading -> BackgroundRefreshing -> Idle`. A fast broad fetch
//! that skips heavy fields publishes the first tree, then a complete fetch is
//! persisted and the tree rebuilt with fresh counts.
//!
//! Warm start (cache hit):
//! `Idle -> ReadyStale -> BackgroundRefreshing -> Idle`. The cached records are
//! published at once, then an incremental fetch is merged with a delta rebuild.
//!
//! Failures are recorded on [`SyncState`] and never propagated to callers
//! reading the tree; the previous good state stays published.

pub mod state;

pub use state::{SyncPhase, SyncReport, SyncState};

use crate::config::{DirectoryConfig, RegistryConfig, SyncConfig};
use crate::directory::{CollectionDirectory, RebuildMode};
use crate::registry::{FetchBatch, RegistryClient, RegistryQuery};
use crate::store::{LocalCache, RecordStore};
use crate::types::Interrupt;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct Synchronizer {
    directory: Arc<CollectionDirectory>,
    client: RegistryClient,
    cache: Option<LocalCache>,
    registry: RegistryConfig,
    options: SyncConfig,
    state: RwLock<SyncState>,
    session: Mutex<Interrupt>,
}

impl Synchronizer {
    pub fn new(
        directory: Arc<CollectionDirectory>,
        client: RegistryClient,
        cache: Option<LocalCache>,
        config: &DirectoryConfig,
    ) -> Self {
        Self {
            directory,
            client,
            cache,
            registry: config.registry.clone(),
            options: config.sync.clone(),
            state: RwLock::new(SyncState::default()),
            session: Mutex::new(Interrupt::new()),
        }
    }

    pub fn directory(&self) -> &Arc<CollectionDirectory> {
        &self.directory
    }

    pub fn state(&self) -> SyncState {
        self.state.read().clone()
    }

    /// Stop the in-flight sync at the next record boundary.
    pub fn interrupt(&self) {
        self.session.lock().trigger();
    }

    /// Start a session, superseding any previous one.
    fn begin_session(&self) -> Interrupt {
        let fresh = Interrupt::new();
        let previous = std::mem::replace(&mut *self.session.lock(), fresh.clone());
        previous.trigger();
        fresh
    }

    /// Run the boot sequence on the runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<SyncState> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Warm start from the local cache when it holds records, cold start otherwise.
    pub async fn run(&self) -> SyncState {
        let interrupt = self.begin_session();
        let cached = self
            .cache
            .as_ref()
            .and_then(LocalCache::load)
            .filter(|store| !store.is_empty());
        match cached {
            Some(store) => self.warm_start(store, &interrupt).await,
            None => self.cold_start(&interrupt).await,
        };
        self.state()
    }

    async fn cold_start(&self, interrupt: &Interrupt) -> SyncReport {
        self.state.write().enter(SyncPhase::BulkLoading);
        let start = Instant::now();
        let fast = self
            .base_query()
            .exclude_fields(&self.registry.cold_start_skipped_fields);

        let batch = match self.client.fetch_all(&fast, interrupt).await {
            Ok(batch) => batch,
            Err(err) => {
                error!(error = %err, "Initial registry download failed");
                let mut report = SyncReport::failed(&err);
                report.tree_generation = Some(
                    self.directory
                        .rebuild_tree(RebuildMode::Full)
                        .generation(),
                );
                let advisory = format!(
                    "The collection registry could not be reached ({}). The directory stays empty until a sync succeeds.",
                    err
                );
                return self.finish(report, Some(advisory));
            }
        };
        let mut report = self.ingest(batch, true);
        info!(
            record_count = self.directory.record_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Initial registry download complete"
        );
        if report.interrupted {
            return self.finish(report, None);
        }

        let second_pass =
            self.options.full_second_pass && !self.registry.cold_start_skipped_fields.is_empty();
        if second_pass {
            self.state.write().enter(SyncPhase::BackgroundRefreshing);
            match self.client.fetch_all(&self.base_query(), interrupt).await {
                Ok(mut batch) => {
                    let changes = std::mem::take(&mut batch.changes);
                    let applied = self.directory.apply_changes(changes);
                    let mut second = SyncReport::from_batch(&batch, &applied);
                    // Records already counted by the fast pass are not counted again.
                    second.upserted = applied.inserted;
                    if !second.interrupted {
                        self.save_cache();
                    }
                    second.full_recompute = true;
                    second.tree_generation = Some(
                        self.directory
                            .rebuild_tree(RebuildMode::Full)
                            .generation(),
                    );
                    report.merge(second);
                }
                Err(err) => {
                    warn!(error = %err, "Complete registry download failed, keeping fast pass");
                    report.merge(SyncReport::failed(err));
                }
            }
        } else {
            self.save_cache();
        }
        self.finish(report, None)
    }

    async fn warm_start(&self, store: RecordStore, interrupt: &Interrupt) -> SyncReport {
        let record_count = store.len();
        self.directory.replace_store(store);
        let tree = self.directory.rebuild_tree(RebuildMode::Full);
        self.state.write().enter(SyncPhase::ReadyStale);
        info!(
            record_count,
            generation = tree.generation(),
            "Published tree from local cache"
        );
        self.refresh_session(interrupt).await
    }

    /// Incremental refresh of the current store in a new session.
    pub async fn refresh(&self) -> SyncReport {
        let interrupt = self.begin_session();
        self.refresh_session(&interrupt).await
    }

    async fn refresh_session(&self, interrupt: &Interrupt) -> SyncReport {
        self.state.write().enter(SyncPhase::BackgroundRefreshing);
        let query = self.base_query();
        let result = if self.options.use_manifest {
            let manifest = self.directory.store().read().manifest();
            self.client
                .fetch_incremental(&manifest, &query, interrupt)
                .await
        } else {
            let since = {
                let store = self.directory.store();
                let store = store.read();
                match &self.cache {
                    Some(cache) => cache.staleness_reference(&store),
                    None => store.max_last_modified(),
                }
            };
            let query = match since {
                Some(since) => query.modified_after(since),
                None => query,
            };
            self.client.fetch_all(&query, interrupt).await
        };

        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "Background registry refresh failed");
                return self.finish(SyncReport::failed(err), None);
            }
        };

        // Boot guard: results are applied only once a first tree is out.
        self.directory.wait_first_tree().await;
        let report = self.ingest(batch, false);
        self.finish(report, None)
    }

    /// Merge a batch into the store, persist it and rebuild when anything changed.
    ///
    /// `init_counter` forces fresh reference counts and a rebuild even when
    /// the batch was empty.
    fn ingest(&self, mut batch: FetchBatch, init_counter: bool) -> SyncReport {
        let changes = std::mem::take(&mut batch.changes);
        let applied = self.directory.apply_changes(changes);
        let mut report = SyncReport::from_batch(&batch, &applied);
        if applied.changed() == 0 && !init_counter {
            return report;
        }
        if !batch.interrupted && !init_counter {
            self.save_cache();
        }
        let mode = if init_counter {
            RebuildMode::Full
        } else {
            applied.rebuild_mode()
        };
        report.full_recompute = mode == RebuildMode::Full;
        report.tree_generation = Some(self.directory.rebuild_tree(mode).generation());
        report
    }

    fn finish(&self, report: SyncReport, advisory: Option<String>) -> SyncReport {
        info!(
            upserted = report.upserted,
            removed = report.removed,
            skipped = report.skipped,
            interrupted = report.interrupted,
            generation = ?report.tree_generation,
            failed = report.error.is_some(),
            "Sync pass finished"
        );
        let mut state = self.state.write();
        state.enter(SyncPhase::Idle);
        state.last_report = Some(report.clone());
        state.advisory = advisory;
        report
    }

    fn base_query(&self) -> RegistryQuery {
        RegistryQuery::all().format(self.registry.format)
    }

    fn save_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.save_best_effort(&self.directory.store().read());
        }
    }
}
