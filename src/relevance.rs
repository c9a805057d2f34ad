//! Spatial relevance updater
//!
//! A recurring task that asks the registry which collections overlap the
//! displayed sky region and flags records inside, outside or unknown. The
//! viewport and the redraw hook belong to the embedding application and are
//! reached through [`ViewportSource`] and [`RedrawSink`].

use crate::config::RelevanceConfig;
use crate::directory::{CollectionDirectory, RebuildMode};
use crate::registry::{RegistryClient, SkyRegion};
use crate::sync::Synchronizer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What the display surface currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    /// The surface is shown and accepting redraws.
    pub active: bool,
    pub width: u32,
    pub height: u32,
    /// Center in ICRS degrees.
    pub ra: f64,
    pub dec: f64,
    /// Angular size in degrees.
    pub fov: f64,
    /// False while no celestial projection is set (e.g. a plain image).
    pub spatial: bool,
}

impl Viewport {
    fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

pub trait ViewportSource: Send + Sync {
    fn viewport(&self) -> Viewport;
}

pub trait RedrawSink: Send + Sync {
    /// Repaint with the current relevance flags; no structural change.
    fn request_redraw(&self);
}

/// Redraw sink for headless use.
pub struct NoRedraw;

impl RedrawSink for NoRedraw {
    fn request_redraw(&self) {}
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Inactive,
    BulkLoading,
    /// Center and size unchanged since the last query.
    Unchanged,
    /// No spatial reference; every record was marked unknown.
    Unreferenced,
    Updated { inside: usize, rebuilt: bool },
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LastView {
    Never,
    Unreferenced,
    At { ra: f64, dec: f64, fov: f64 },
}

type LoadCheck = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct SpatialRelevanceUpdater {
    directory: Arc<CollectionDirectory>,
    client: RegistryClient,
    viewport: Arc<dyn ViewportSource>,
    redraw: Arc<dyn RedrawSink>,
    config: RelevanceConfig,
    loading: Option<LoadCheck>,
    last: Mutex<LastView>,
    running: AtomicBool,
}

impl SpatialRelevanceUpdater {
    pub fn new(
        directory: Arc<CollectionDirectory>,
        client: RegistryClient,
        viewport: Arc<dyn ViewportSource>,
        redraw: Arc<dyn RedrawSink>,
        config: &RelevanceConfig,
    ) -> Self {
        Self {
            directory,
            client,
            viewport,
            redraw,
            config: config.clone(),
            loading: None,
            last: Mutex::new(LastView::Never),
            running: AtomicBool::new(false),
        }
    }

    /// Skip ticks while `is_loading` returns true.
    pub fn pause_while(mut self, is_loading: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.loading = Some(Arc::new(is_loading));
        self
    }

    /// Skip ticks while `sync` is bulk loading.
    pub fn pause_during_bulk_load(self, sync: Arc<Synchronizer>) -> Self {
        self.pause_while(move || sync.state().loading)
    }

    /// Forget the last queried view so the next tick queries again.
    pub fn invalidate(&self) {
        *self.last.lock() = LastView::Never;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn tick(&self) -> TickOutcome {
        let view = self.viewport.viewport();
        if !view.active || !view.has_area() {
            return TickOutcome::Inactive;
        }
        if self.loading.as_ref().map(|is_loading| is_loading()).unwrap_or(false) {
            return TickOutcome::BulkLoading;
        }

        let current = if view.spatial {
            LastView::At {
                ra: view.ra,
                dec: view.dec,
                fov: view.fov,
            }
        } else {
            LastView::Unreferenced
        };
        {
            let mut last = self.last.lock();
            if *last == current {
                return TickOutcome::Unchanged;
            }
            *last = current;
        }

        if !view.spatial {
            self.directory.set_relevance(None);
            self.publish();
            return TickOutcome::Unreferenced;
        }

        let region = SkyRegion::for_viewport(
            view.ra,
            view.dec,
            view.fov,
            self.config.large_field_deg,
        );
        let inside = match self.client.fetch_region(&region).await {
            Ok(ids) => ids,
            Err(err) => {
                // Relevance flags stay as they were until the view moves.
                warn!(error = %err, "Region query failed");
                return TickOutcome::Failed(err.to_string());
            }
        };
        self.directory.set_relevance(Some(&inside));
        let rebuilt = self.publish();
        debug!(inside = inside.len(), rebuilt, "Relevance updated");
        TickOutcome::Updated {
            inside: inside.len(),
            rebuilt,
        }
    }

    /// Returns true when a rebuild was needed.
    fn publish(&self) -> bool {
        if self.directory.inside_only() {
            self.directory.rebuild_tree(RebuildMode::reuse());
            true
        } else {
            self.directory.propagate_relevance();
            self.redraw.request_redraw();
            false
        }
    }

    /// Tick on the configured interval until [`stop`](Self::stop) is called.
    /// The first tick waits for a published tree.
    pub async fn run(&self) {
        if !self.config.enabled {
            self.running.store(false, Ordering::SeqCst);
            info!("Relevance updater disabled");
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        self.directory.wait_first_tree().await;
        info!(interval_ms = self.config.interval_ms, "Relevance updater started");

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while self.is_running() {
            interval.tick().await;
            if !self.is_running() {
                break;
            }
            self.tick().await;
        }
        info!("Relevance updater stopped");
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(self.config.enabled, Ordering::SeqCst);
        let updater = Arc::clone(self);
        tokio::spawn(async move { updater.run().await })
    }
}
