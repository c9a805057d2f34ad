//! Registry client
//!
//! Fetches collection records from the remote registry. [`RegistryClient`]
//! owns the fallback policy; a [`RegistrySource`] performs single attempts.
//!
//! - Every call is retried exactly once on the mirror after a network error.
//! - A full fetch whose primary stream ends cleanly with no record at all is
//!   also retried on the mirror.
//! - A failed manifest sync falls back to a `TIMESTAMP=>max` query.

pub mod http;
pub mod mirror;
pub mod parser;
pub mod query;
pub mod source;

pub use http::HttpRegistrySource;
pub use mirror::MirrorResolver;
pub use parser::{parse_records, BatchCollector, LineSplitter, RecordParser};
pub use query::{RegistryQuery, ResponseFormat, SkyRegion};
pub use source::{Endpoint, FetchBatch, FetchMode, FetchRequest, RegistrySource};

use crate::error::DirectoryError;
use crate::types::{CollectionId, Interrupt, Timestamp};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Encode a manifest as `id=timestamp` lines.
pub fn encode_manifest(manifest: &BTreeMap<CollectionId, Timestamp>) -> String {
    let mut payload = String::with_capacity(manifest.len() * 32);
    for (id, timestamp) in manifest {
        payload.push_str(id);
        payload.push('=');
        payload.push_str(&timestamp.to_string());
        payload.push('\n');
    }
    payload
}

/// Registry access with mirror and incremental fallbacks.
#[derive(Clone)]
pub struct RegistryClient {
    source: Arc<dyn RegistrySource>,
}

impl RegistryClient {
    pub fn new(source: Arc<dyn RegistrySource>) -> Self {
        Self { source }
    }

    /// Fetch every record matching `query`.
    pub async fn fetch_all(
        &self,
        query: &RegistryQuery,
        interrupt: &Interrupt,
    ) -> Result<FetchBatch, DirectoryError> {
        self.attempt(FetchRequest::Query(query), interrupt).await
    }

    /// Fetch records changed relative to `manifest`.
    ///
    /// An empty manifest is a full fetch.
    pub async fn fetch_incremental(
        &self,
        manifest: &BTreeMap<CollectionId, Timestamp>,
        query: &RegistryQuery,
        interrupt: &Interrupt,
    ) -> Result<FetchBatch, DirectoryError> {
        if manifest.is_empty() {
            return self.fetch_all(query, interrupt).await;
        }
        let payload = encode_manifest(manifest);
        let request = FetchRequest::Manifest {
            query,
            manifest: &payload,
        };
        match self.attempt(request, interrupt).await {
            Ok(batch) => Ok(batch),
            Err(err) => {
                let since = manifest.values().copied().filter(|t| *t > 0).max();
                warn!(
                    error = %err,
                    since = ?since,
                    "Manifest sync failed, falling back to timestamp query"
                );
                let fallback = match since {
                    Some(since) => query.clone().modified_after(since),
                    None => query.clone(),
                };
                self.fetch_all(&fallback, interrupt).await
            }
        }
    }

    /// Identifiers of collections whose coverage overlaps `region`.
    pub async fn fetch_region(
        &self,
        region: &SkyRegion,
    ) -> Result<HashSet<CollectionId>, DirectoryError> {
        let query = RegistryQuery::region(region);
        match self.source.fetch_ids(Endpoint::Primary, &query).await {
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "Region query failed on primary, retrying on mirror");
                self.source.fetch_ids(Endpoint::Mirror, &query).await
            }
            result => result,
        }
    }

    async fn attempt(
        &self,
        request: FetchRequest<'_>,
        interrupt: &Interrupt,
    ) -> Result<FetchBatch, DirectoryError> {
        let reason = match self.source.fetch(Endpoint::Primary, request, interrupt).await {
            Ok(batch) if !is_suspiciously_empty(&batch) => return Ok(batch),
            Ok(_) => "stream ended without any record".to_string(),
            Err(err) if err.is_retryable() => err.to_string(),
            Err(err) => return Err(err),
        };
        if interrupt.is_triggered() {
            let mut batch = FetchBatch::empty(Endpoint::Primary, request.mode());
            batch.interrupted = true;
            return Ok(batch);
        }
        warn!(
            reason = %reason,
            query = %request.query(),
            "Primary registry attempt failed, retrying on mirror"
        );
        let batch = self.source.fetch(Endpoint::Mirror, request, interrupt).await?;
        info!(
            record_count = batch.changes.len(),
            skipped = batch.skipped,
            "Mirror registry attempt succeeded"
        );
        Ok(batch)
    }
}

fn is_suspiciously_empty(batch: &FetchBatch) -> bool {
    batch.mode == FetchMode::Full && batch.is_empty() && batch.skipped == 0 && !batch.interrupted
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::RecordChange;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// One scripted reply: a response body or a network failure.
    pub(crate) type Reply = Result<String, String>;

    /// What a [`ScriptedSource`] was asked for.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct SeenRequest {
        pub endpoint: Endpoint,
        pub mode: FetchMode,
        pub query: String,
        pub manifest: Option<String>,
    }

    /// In-memory registry answering from per-endpoint reply queues.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        primary: Mutex<VecDeque<Reply>>,
        mirror: Mutex<VecDeque<Reply>>,
        seen: Mutex<Vec<SeenRequest>>,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn primary(self, reply: Reply) -> Self {
            self.primary.lock().push_back(reply);
            self
        }

        pub fn mirror(self, reply: Reply) -> Self {
            self.mirror.lock().push_back(reply);
            self
        }

        pub fn seen(&self) -> Vec<SeenRequest> {
            self.seen.lock().clone()
        }

        fn next(&self, endpoint: Endpoint) -> Result<String, DirectoryError> {
            let queue = match endpoint {
                Endpoint::Primary => &self.primary,
                Endpoint::Mirror => &self.mirror,
            };
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply".to_string()))
                .map_err(DirectoryError::NetworkError)
        }
    }

    #[async_trait]
    impl RegistrySource for ScriptedSource {
        async fn fetch(
            &self,
            endpoint: Endpoint,
            request: FetchRequest<'_>,
            interrupt: &Interrupt,
        ) -> Result<FetchBatch, DirectoryError> {
            self.seen.lock().push(SeenRequest {
                endpoint,
                mode: request.mode(),
                query: request.query().to_string(),
                manifest: match request {
                    FetchRequest::Manifest { manifest, .. } => Some(manifest.to_string()),
                    FetchRequest::Query(_) => None,
                },
            });
            let body = self.next(endpoint)?;
            Ok(parse_records(&body, endpoint, request.mode(), interrupt))
        }

        async fn fetch_ids(
            &self,
            endpoint: Endpoint,
            query: &RegistryQuery,
        ) -> Result<HashSet<CollectionId>, DirectoryError> {
            self.seen.lock().push(SeenRequest {
                endpoint,
                mode: FetchMode::Full,
                query: query.to_string(),
                manifest: None,
            });
            let body = self.next(endpoint)?;
            Ok(http::parse_id_list(&body))
        }
    }

    fn client(source: ScriptedSource) -> (RegistryClient, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        (RegistryClient::new(source.clone()), source)
    }

    fn ids(batch: &FetchBatch) -> Vec<&str> {
        batch.changes.iter().map(RecordChange::id).collect()
    }

    #[test]
    fn manifest_encoding() {
        let manifest: BTreeMap<CollectionId, Timestamp> =
            [("B".to_string(), 20), ("A".to_string(), 10)].into_iter().collect();
        assert_eq!(encode_manifest(&manifest), "A=10\nB=20\n");
    }

    #[tokio::test]
    async fn primary_success_is_used_directly() {
        let (client, source) = client(ScriptedSource::new().primary(Ok("ID = A\n".into())));
        let batch = client
            .fetch_all(&RegistryQuery::all(), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(ids(&batch), vec!["A"]);
        assert_eq!(batch.endpoint, Endpoint::Primary);
        assert_eq!(source.seen().len(), 1);
    }

    #[tokio::test]
    async fn network_error_retries_once_on_mirror() {
        let (client, source) = client(
            ScriptedSource::new()
                .primary(Err("connect timeout".into()))
                .mirror(Ok("ID = A\n\nID = B\n".into())),
        );
        let batch = client
            .fetch_all(&RegistryQuery::all(), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(ids(&batch), vec!["A", "B"]);
        assert_eq!(batch.endpoint, Endpoint::Mirror);
        let endpoints: Vec<Endpoint> = source.seen().iter().map(|s| s.endpoint).collect();
        assert_eq!(endpoints, vec![Endpoint::Primary, Endpoint::Mirror]);
    }

    #[tokio::test]
    async fn both_endpoints_failing_is_an_error() {
        let (client, source) = client(
            ScriptedSource::new()
                .primary(Err("refused".into()))
                .mirror(Err("refused".into())),
        );
        let err = client
            .fetch_all(&RegistryQuery::all(), &Interrupt::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(source.seen().len(), 2);
    }

    #[tokio::test]
    async fn empty_full_fetch_goes_to_mirror() {
        let (client, _) = client(
            ScriptedSource::new()
                .primary(Ok(String::new()))
                .mirror(Ok("ID = A\n".into())),
        );
        let batch = client
            .fetch_all(&RegistryQuery::all(), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(batch.endpoint, Endpoint::Mirror);
    }

    #[tokio::test]
    async fn empty_manifest_reply_is_not_retried() {
        let (client, source) = client(ScriptedSource::new().primary(Ok(String::new())));
        let manifest: BTreeMap<CollectionId, Timestamp> =
            [("A".to_string(), 10)].into_iter().collect();
        let batch = client
            .fetch_incremental(&manifest, &RegistryQuery::all(), &Interrupt::new())
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.mode, FetchMode::Manifest);
        assert_eq!(source.seen()[0].manifest.as_deref(), Some("A=10\n"));
    }

    #[tokio::test]
    async fn failed_manifest_falls_back_to_timestamp_query() {
        let (client, source) = client(
            ScriptedSource::new()
                .primary(Err("500".into()))
                .mirror(Err("500".into()))
                .primary(Ok("ID = C\nTIMESTAMP = 30\n".into())),
        );
        let manifest: BTreeMap<CollectionId, Timestamp> =
            [("A".to_string(), 10), ("B".to_string(), 20), ("Z".to_string(), 0)]
                .into_iter()
                .collect();
        let batch = client
            .fetch_incremental(&manifest, &RegistryQuery::all(), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(ids(&batch), vec!["C"]);
        assert_eq!(batch.mode, FetchMode::SinceTimestamp);
        let last = source.seen().pop().unwrap();
        assert_eq!(last.query, "ID=*&get=record&TIMESTAMP=>20");
        assert!(last.manifest.is_none());
    }

    #[tokio::test]
    async fn interrupted_primary_is_not_retried() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let (client, source) = client(ScriptedSource::new().primary(Ok("ID = A\n".into())));
        let batch = client
            .fetch_all(&RegistryQuery::all(), &interrupt)
            .await
            .unwrap();
        assert!(batch.interrupted);
        assert!(batch.is_empty());
        assert_eq!(source.seen().len(), 1);
    }

    #[tokio::test]
    async fn region_query_falls_back_to_mirror() {
        let (client, source) = client(
            ScriptedSource::new()
                .primary(Err("down".into()))
                .mirror(Ok("ivo://CDS/P/DSS2/color\nCDS/P/2MASS\n".into())),
        );
        let region = SkyRegion::Circle {
            ra: 10.0,
            dec: 20.0,
            radius: 1.0,
        };
        let found = client.fetch_region(&region).await.unwrap();
        assert!(found.contains("CDS/P/DSS2/color"));
        assert!(found.contains("CDS/P/2MASS"));
        assert!(source.seen()[0].query.ends_with("intersect=overlaps&get=id"));
    }
}
