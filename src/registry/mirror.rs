//! Mirror address resolution.
//!
//! The mirror is looked up through an indirection document listing registry
//! addresses, one per line. The first entry that is not the primary wins. The
//! resolved address is kept for the life of the resolver.

use crate::error::DirectoryError;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct MirrorResolver {
    primary: String,
    lookup_url: Option<String>,
    static_mirrors: Vec<String>,
    resolved: Mutex<Option<String>>,
}

impl MirrorResolver {
    pub fn new(
        primary: impl Into<String>,
        lookup_url: Option<String>,
        static_mirrors: Vec<String>,
    ) -> Self {
        Self {
            primary: primary.into(),
            lookup_url,
            static_mirrors,
            resolved: Mutex::new(None),
        }
    }

    /// Mirror base URL, resolving it on first use.
    pub async fn resolve(&self, client: &Client) -> Result<String, DirectoryError> {
        let cached = self.resolved.lock().clone();
        if let Some(url) = cached {
            return Ok(url);
        }
        let mut found = None;
        if let Some(lookup) = &self.lookup_url {
            match self.lookup(client, lookup).await {
                Ok(url) => found = url,
                Err(err) => warn!(lookup = %lookup, error = %err, "Mirror lookup failed"),
            }
        }
        let url = found
            .or_else(|| first_other(self.static_mirrors.iter().map(String::as_str), &self.primary))
            .ok_or_else(|| DirectoryError::NetworkError("No registry mirror available".into()))?;
        debug!(mirror = %url, "Resolved registry mirror");
        *self.resolved.lock() = Some(url.clone());
        Ok(url)
    }

    async fn lookup(&self, client: &Client, lookup: &str) -> Result<Option<String>, DirectoryError> {
        let response = client.get(lookup).send().await?;
        if !response.status().is_success() {
            return Err(DirectoryError::NetworkError(format!(
                "Mirror lookup returned status {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        Ok(parse_indirection(&body, &self.primary))
    }
}

/// First address in an indirection document that differs from `primary`.
pub fn parse_indirection(body: &str, primary: &str) -> Option<String> {
    let entries = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().find(|t| t.contains("://")));
    first_other(entries, primary)
}

fn first_other<'a>(candidates: impl Iterator<Item = &'a str>, primary: &str) -> Option<String> {
    let primary = primary.trim_end_matches('/');
    candidates
        .map(str::trim)
        .find(|c| !c.is_empty() && c.trim_end_matches('/') != primary)
        .map(str::to_string)
}
