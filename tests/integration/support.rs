//! Shared fixtures: registry bodies, a scripted in-memory source and a canned
//! HTTP/1.1 server.

use async_trait::async_trait;
use colldir::registry::{
    parse_records, Endpoint, FetchBatch, FetchRequest, RegistryQuery, RegistrySource,
};
use colldir::store::{CollectionRecord, RecordStore};
use colldir::types::{CollectionId, Interrupt};
use colldir::DirectoryError;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One registry record in the `key = value` wire format.
pub fn record_text(id: &str, category: &str, ts: i64) -> String {
    format!(
        "ID = {id}\nobs_title = Title {id}\nclient_category = {category}\nmoc_sky_fraction = 0.25\nTIMESTAMP = {ts}\n\n"
    )
}

pub fn removal_text(id: &str) -> String {
    format!("ID = {id}\nMOCSERVER_REMOVE = 1\n\n")
}

pub fn store_of(records: &[(&str, &str, i64)]) -> RecordStore {
    records
        .iter()
        .map(|(id, category, ts)| {
            CollectionRecord::from_properties(
                [
                    ("ID", id.to_string()),
                    ("obs_title", format!("Title {}", id)),
                    ("client_category", category.to_string()),
                    ("moc_sky_fraction", "0.25".to_string()),
                    ("TIMESTAMP", ts.to_string()),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap()
        })
        .collect()
}

/// What the scripted source should do for one request.
pub enum Step {
    Body(String),
    Fail(&'static str),
    /// Serve the body but behave as if the user cancelled before the first record.
    Cancel(String),
}

#[derive(Debug, Clone)]
pub struct Seen {
    pub endpoint: Endpoint,
    pub query: String,
    pub manifest: Option<String>,
}

/// In-memory registry replaying queued steps per endpoint.
#[derive(Default)]
pub struct ScriptSource {
    primary: Mutex<VecDeque<Step>>,
    mirror: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_primary(&self, step: Step) -> &Self {
        self.primary.lock().push_back(step);
        self
    }

    pub fn on_mirror(&self, step: Step) -> &Self {
        self.mirror.lock().push_back(step);
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    fn next(&self, endpoint: Endpoint) -> Step {
        let queue = match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Mirror => &self.mirror,
        };
        queue.lock().pop_front().unwrap_or(Step::Fail("unexpected request"))
    }
}

#[async_trait]
impl RegistrySource for ScriptSource {
    async fn fetch(
        &self,
        endpoint: Endpoint,
        request: FetchRequest<'_>,
        interrupt: &Interrupt,
    ) -> Result<FetchBatch, DirectoryError> {
        self.seen.lock().push(Seen {
            endpoint,
            query: request.query().to_string(),
            manifest: match request {
                FetchRequest::Manifest { manifest, .. } => Some(manifest.to_string()),
                FetchRequest::Query(_) => None,
            },
        });
        match self.next(endpoint) {
            Step::Body(body) => Ok(parse_records(&body, endpoint, request.mode(), interrupt)),
            Step::Cancel(body) => {
                interrupt.trigger();
                Ok(parse_records(&body, endpoint, request.mode(), interrupt))
            }
            Step::Fail(reason) => Err(DirectoryError::NetworkError(reason.to_string())),
        }
    }

    async fn fetch_ids(
        &self,
        endpoint: Endpoint,
        _query: &RegistryQuery,
    ) -> Result<HashSet<CollectionId>, DirectoryError> {
        match self.next(endpoint) {
            Step::Body(body) | Step::Cancel(body) => {
                Ok(body.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
            }
            Step::Fail(reason) => Err(DirectoryError::NetworkError(reason.to_string())),
        }
    }
}

/// HTTP/1.1 server answering every request through `respond`.
pub struct CannedServer {
    pub base: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl CannedServer {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/MocServer/query", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);
        let log = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let respond = respond.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let Some((mut stream, request)) = read_request(stream).await else {
                        return;
                    };
                    log.lock().push(request.clone());
                    let (status, body) = (*respond)(&request);
                    let reason = if status == 200 { "OK" } else { "Error" };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    if stream.write_all(response.as_bytes()).await.is_ok() {
                        let _ = stream.shutdown().await;
                    }
                });
            }
        });
        Self {
            base,
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(mut stream: TcpStream) -> Option<(TcpStream, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = head.contains("transfer-encoding: chunked");
    loop {
        let body = &buf[header_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => find(body, b"0\r\n\r\n").is_some(),
            None => true,
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&buf).into_owned();
    Some((stream, request))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
