//! End-to-end synchronizer scenarios against a scripted registry.

use crate::support::{record_text, removal_text, store_of, ScriptSource, Step};
use colldir::config::DirectoryConfig;
use colldir::registry::{Endpoint, RegistryClient};
use colldir::store::{LocalCache, RecordStore};
use colldir::{CollectionDirectory, SyncPhase, Synchronizer};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    cache: LocalCache,
    source: Arc<ScriptSource>,
    directory: Arc<CollectionDirectory>,
    sync: Arc<Synchronizer>,
}

fn harness(cached: Option<RecordStore>) -> Harness {
    let dir = TempDir::new().unwrap();
    let cache = LocalCache::new(dir.path().join("directory.bin"));
    if let Some(store) = cached {
        cache.save(&store).unwrap();
    }
    let config = DirectoryConfig::default();
    let source = ScriptSource::new();
    let directory = Arc::new(CollectionDirectory::new(RecordStore::new(), &config.tree));
    let sync = Arc::new(Synchronizer::new(
        directory.clone(),
        RegistryClient::new(source.clone()),
        Some(cache.clone()),
        &config,
    ));
    Harness {
        _dir: dir,
        cache,
        source,
        directory,
        sync,
    }
}

fn cached_pair() -> RecordStore {
    store_of(&[("A", "Image/Optical", 10), ("B", "Image/Radio", 20)])
}

#[tokio::test]
async fn warm_start_merges_manifest_delta() {
    let h = harness(Some(cached_pair()));
    h.source.on_primary(Step::Body(
        [record_text("B", "Image/Radio", 25), record_text("C", "Image/Optical", 5)].concat(),
    ));

    let state = h.sync.run().await;
    assert_eq!(state.phase, SyncPhase::Idle);
    let report = state.last_report.unwrap();
    assert_eq!(report.upserted, 2);
    assert_eq!(report.endpoint, Some(Endpoint::Primary));
    assert_eq!(report.tree_generation, Some(2));

    let seen = h.source.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].manifest.as_deref(), Some("A=10\nB=20\n"));

    let tree = h.directory.current_tree();
    assert_eq!(tree.leaf_count(), 3);
    assert_eq!(tree.get("Image").unwrap().live_count, 3);

    let reloaded = h.cache.load().unwrap();
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.get("B").unwrap().last_modified, 25);
}

#[tokio::test]
async fn removal_marker_drops_the_record_everywhere() {
    let h = harness(Some(cached_pair()));
    h.source.on_primary(Step::Body(removal_text("A")));

    let state = h.sync.run().await;
    assert_eq!(state.last_report.unwrap().removed, 1);
    assert!(h.directory.current_tree().leaf_for("A").is_none());
    assert!(h.cache.load().unwrap().get("A").is_none());
}

#[tokio::test]
async fn cancelled_refresh_keeps_cache_untouched() {
    let h = harness(Some(cached_pair()));
    h.source.on_primary(Step::Cancel(record_text("C", "Image/Optical", 5)));

    let state = h.sync.run().await;
    let report = state.last_report.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.upserted, 0);
    // No mirror retry after a cancellation.
    assert_eq!(h.source.seen().len(), 1);
    assert_eq!(h.cache.load().unwrap().len(), 2);
    assert_eq!(h.directory.current_tree().generation(), 1);
}

#[tokio::test]
async fn unreachable_registry_on_cold_start_sets_advisory() {
    let h = harness(None);
    h.source
        .on_primary(Step::Fail("connection refused"))
        .on_mirror(Step::Fail("connection refused"));

    let state = h.sync.run().await;
    assert!(state.advisory.is_some());
    assert!(!state.loading);
    assert!(state.last_report.unwrap().error.is_some());
    let tree = h.directory.current_tree();
    assert_eq!(tree.generation(), 1);
    assert!(tree.is_empty());
    assert!(!h.cache.exists());
}

#[tokio::test]
async fn cold_start_with_empty_primary_uses_mirror() {
    let h = harness(None);
    let body = [record_text("A", "Image/Optical", 10), record_text("N", "Catalog/VizieR", 30)].concat();
    h.source
        .on_primary(Step::Body(String::new()))
        .on_mirror(Step::Body(body.clone()))
        .on_primary(Step::Body(body));

    let state = h.sync.run().await;
    assert!(state.advisory.is_none());
    let report = state.last_report.unwrap();
    assert!(report.full_recompute);
    assert_eq!(report.upserted, 2);
    assert_eq!(h.directory.record_count(), 2);
    assert_eq!(h.cache.load().unwrap().len(), 2);

    let seen = h.source.seen();
    let endpoints: Vec<Endpoint> = seen.iter().map(|s| s.endpoint).collect();
    assert_eq!(
        endpoints,
        vec![Endpoint::Primary, Endpoint::Mirror, Endpoint::Primary]
    );
    // The mirror retry repeats the fast query; the second pass asks for every field.
    assert!(seen[0].query.contains("fields=!"));
    assert_eq!(seen[1].query, seen[0].query);
    assert!(!seen[2].query.contains("fields="));
}

#[tokio::test]
async fn active_filter_applies_to_refreshed_records() {
    let h = harness(Some(cached_pair()));
    h.source.on_primary(Step::Body(String::new()));
    h.sync.run().await;

    h.directory.apply_filter("client_category=Image/Optical").unwrap();
    h.source
        .on_primary(Step::Body(record_text("C", "Image/Radio", 30)));
    let report = h.sync.refresh().await;
    assert_eq!(report.upserted, 1);

    let tree = h.directory.current_tree();
    assert!(tree.leaf_for("C").unwrap().hidden);
    assert!(!tree.leaf_for("A").unwrap().hidden);
    assert_eq!(tree.get("Image").unwrap().live_count, 1);
}
