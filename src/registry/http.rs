//! HTTP registry source.
//!
//! The primary gets a short connect timeout; mirror attempts use a more
//! patient client. Neither bounds the body transfer once a stream is open.

use super::mirror::MirrorResolver;
use super::parser::{BatchCollector, LineSplitter};
use super::query::{RegistryQuery, ResponseFormat};
use super::source::{Endpoint, FetchBatch, FetchRequest, RegistrySource};
use crate::config::RegistryConfig;
use crate::error::DirectoryError;
use crate::store::normalize_id;
use crate::types::{CollectionId, Interrupt};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Form field name carrying the manifest upload.
const MANIFEST_FIELD: &str = "maj";

pub struct HttpRegistrySource {
    primary_url: String,
    primary: Client,
    fallback: Client,
    mirror: MirrorResolver,
}

impl HttpRegistrySource {
    pub fn new(config: &RegistryConfig) -> Result<Self, DirectoryError> {
        let build = |connect_ms: u64| {
            Client::builder()
                .user_agent(config.user_agent.clone())
                .connect_timeout(Duration::from_millis(connect_ms))
                .build()
        };
        Ok(Self {
            primary_url: config.primary_url.clone(),
            primary: build(config.connect_timeout_ms)?,
            fallback: build(config.mirror_connect_timeout_ms)?,
            mirror: MirrorResolver::new(
                config.primary_url.clone(),
                config.mirror_lookup_url.clone(),
                config.mirrors.clone(),
            ),
        })
    }

    async fn endpoint(&self, endpoint: Endpoint) -> Result<(String, &Client), DirectoryError> {
        match endpoint {
            Endpoint::Primary => Ok((self.primary_url.clone(), &self.primary)),
            Endpoint::Mirror => {
                let base = self.mirror.resolve(&self.fallback).await?;
                Ok((base, &self.fallback))
            }
        }
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        request: FetchRequest<'_>,
    ) -> Result<Response, DirectoryError> {
        let (base, client) = self.endpoint(endpoint).await?;
        let url = request.query().to_url(&base)?;
        debug!(endpoint = %endpoint, url = %url, "Registry request");
        let response = match request {
            FetchRequest::Query(_) => client.get(url.clone()).send().await?,
            FetchRequest::Manifest { manifest, .. } => {
                let part = Part::text(manifest.to_string())
                    .file_name("manifest.txt")
                    .mime_str("text/plain")?;
                let form = Form::new().part(MANIFEST_FIELD, part);
                client.post(url.clone()).multipart(form).send().await?
            }
        };
        check_status(response, &url)
    }
}

fn check_status(response: Response, url: &reqwest::Url) -> Result<Response, DirectoryError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(DirectoryError::NetworkError(format!(
            "{} returned status {}",
            url,
            response.status()
        )))
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(
        &self,
        endpoint: Endpoint,
        request: FetchRequest<'_>,
        interrupt: &Interrupt,
    ) -> Result<FetchBatch, DirectoryError> {
        let start = Instant::now();
        let response = self.send(endpoint, request).await?;

        let mut collector = BatchCollector::new(endpoint, request.mode(), interrupt);
        let mut splitter = LineSplitter::new();
        let mut stream = response.bytes_stream();
        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for line in splitter.push(&chunk) {
                if !collector.push_line(&line) {
                    break 'read;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            collector.push_line(&line);
        }
        let batch = collector.finish();

        debug!(
            endpoint = %endpoint,
            record_count = batch.changes.len(),
            skipped = batch.skipped,
            interrupted = batch.interrupted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Registry stream finished"
        );
        Ok(batch)
    }

    async fn fetch_ids(
        &self,
        endpoint: Endpoint,
        query: &RegistryQuery,
    ) -> Result<HashSet<CollectionId>, DirectoryError> {
        let query = query.clone().format(ResponseFormat::Plain);
        let response = self.send(endpoint, FetchRequest::Query(&query)).await?;
        let body = response.text().await?;
        Ok(parse_id_list(&body))
    }
}

/// Identifiers from an id-only response, one per line.
pub fn parse_id_list(body: &str) -> HashSet<CollectionId> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(normalize_id)
        .collect()
}
