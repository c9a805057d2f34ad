//! reqwest-backed source against canned HTTP servers.

use crate::support::{record_text, CannedServer};
use colldir::config::{DirectoryConfig, RegistryConfig};
use colldir::registry::{
    Endpoint, FetchMode, HttpRegistrySource, RegistryClient, RegistryQuery, SkyRegion,
};
use colldir::store::{LocalCache, RecordStore};
use colldir::types::Interrupt;
use colldir::{CollectionDirectory, Synchronizer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn registry_config(primary: &CannedServer, mirror: &CannedServer) -> RegistryConfig {
    RegistryConfig {
        primary_url: primary.base.clone(),
        mirrors: vec![mirror.base.clone()],
        mirror_lookup_url: None,
        connect_timeout_ms: 2_000,
        mirror_connect_timeout_ms: 2_000,
        ..RegistryConfig::default()
    }
}

fn client(config: &RegistryConfig) -> RegistryClient {
    RegistryClient::new(Arc::new(HttpRegistrySource::new(config).unwrap()))
}

fn records_body() -> String {
    [
        record_text("CDS/P/DSS2/color", "Image/Optical", 100),
        record_text("CDS/P/2MASS/K", "Image/Infrared", 200),
    ]
    .concat()
}

#[tokio::test]
async fn server_error_on_primary_falls_back_to_mirror() {
    let primary = CannedServer::start(|_| (500, "overloaded".to_string())).await;
    let mirror = CannedServer::start(|_| (200, records_body())).await;
    let client = client(&registry_config(&primary, &mirror));

    let batch = client
        .fetch_all(&RegistryQuery::all(), &Interrupt::new())
        .await
        .unwrap();
    assert_eq!(batch.endpoint, Endpoint::Mirror);
    assert_eq!(batch.changes.len(), 2);
    assert!(!batch.interrupted);

    let primary_requests = primary.requests();
    assert_eq!(primary_requests.len(), 1);
    assert!(primary_requests[0].starts_with("GET /MocServer/query?"));
    assert!(primary_requests[0].contains("get=record"));
    assert_eq!(mirror.requests().len(), 1);
}

#[tokio::test]
async fn both_endpoints_failing_surfaces_a_network_error() {
    let primary = CannedServer::start(|_| (503, String::new())).await;
    let mirror = CannedServer::start(|_| (502, String::new())).await;
    let client = client(&registry_config(&primary, &mirror));

    let err = client
        .fetch_all(&RegistryQuery::all(), &Interrupt::new())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(primary.requests().len(), 1);
    assert_eq!(mirror.requests().len(), 1);
}

#[tokio::test]
async fn manifest_is_uploaded_as_multipart() {
    let primary = CannedServer::start(|request| {
        if request.starts_with("POST") && request.contains("name=\"maj\"") {
            (200, record_text("CDS/P/2MASS/K", "Image/Infrared", 250))
        } else {
            (400, "expected a manifest upload".to_string())
        }
    })
    .await;
    let mirror = CannedServer::start(|_| (500, String::new())).await;
    let client = client(&registry_config(&primary, &mirror));

    let manifest: BTreeMap<String, i64> = [
        ("CDS/P/DSS2/color".to_string(), 100),
        ("CDS/P/2MASS/K".to_string(), 200),
    ]
    .into_iter()
    .collect();
    let batch = client
        .fetch_incremental(&manifest, &RegistryQuery::all(), &Interrupt::new())
        .await
        .unwrap();
    assert_eq!(batch.endpoint, Endpoint::Primary);
    assert_eq!(batch.mode, FetchMode::Manifest);
    assert_eq!(batch.changes.len(), 1);

    let request = &primary.requests()[0];
    assert!(request.contains("CDS/P/2MASS/K=200"));
    assert!(request.contains("CDS/P/DSS2/color=100"));
    assert!(mirror.requests().is_empty());
}

#[tokio::test]
async fn region_query_returns_identifiers() {
    let primary =
        CannedServer::start(|_| (200, "# overlapping\nCDS/P/DSS2/color\nivo://CDS/P/2MASS/K\n".into()))
            .await;
    let mirror = CannedServer::start(|_| (500, String::new())).await;
    let client = client(&registry_config(&primary, &mirror));

    let ids = client
        .fetch_region(&SkyRegion::for_viewport(83.6, 22.0, 1.0, 30.0))
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains("CDS/P/2MASS/K"));

    let request = &primary.requests()[0];
    assert!(request.contains("intersect=overlaps"));
    assert!(request.contains("get=id"));
}

#[tokio::test]
async fn cold_start_over_http_persists_the_cache() {
    let primary = CannedServer::start(|_| (500, String::new())).await;
    let mirror = CannedServer::start(|_| (200, records_body())).await;
    let dir = TempDir::new().unwrap();

    let mut config = DirectoryConfig::default();
    config.registry = registry_config(&primary, &mirror);
    let cache = LocalCache::new(dir.path().join("directory.bin"));
    let directory = Arc::new(CollectionDirectory::new(RecordStore::new(), &config.tree));
    let sync = Arc::new(Synchronizer::new(
        directory.clone(),
        client(&config.registry),
        Some(cache.clone()),
        &config,
    ));

    let state = sync.spawn().await.unwrap();
    assert!(state.advisory.is_none());
    assert!(!state.loading);
    assert_eq!(directory.record_count(), 2);
    assert_eq!(directory.current_tree().leaf_count(), 2);
    assert_eq!(cache.load().unwrap().len(), 2);

    // Fast pass and complete pass, each retried once on the mirror.
    assert_eq!(primary.requests().len(), 2);
    assert_eq!(mirror.requests().len(), 2);
    assert!(primary.requests()[0].contains("fields=%21"));
}
