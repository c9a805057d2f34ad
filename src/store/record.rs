//! Collection records and their property bags.

use crate::types::{CollectionId, Relevance, Timestamp};
use serde::{Deserialize, Serialize};

/// Property keys understood by the directory.
pub mod keys {
    pub const ID: &str = "ID";
    pub const CREATOR_DID: &str = "creator_did";
    pub const PUBLISHER_DID: &str = "publisher_did";
    pub const CATEGORY: &str = "client_category";
    pub const SORT_KEY: &str = "client_sort_key";
    pub const TITLE: &str = "obs_title";
    pub const DESCRIPTION: &str = "obs_description";
    pub const SKY_FRACTION: &str = "moc_sky_fraction";
    pub const PIXEL_SCALE: &str = "hips_pixel_scale";
    pub const ROW_COUNT: &str = "nb_rows";
    pub const BIB_YEAR: &str = "bib_year";
    pub const HIPS_SERVICE_URL: &str = "hips_service_url";
    pub const MOC_ACCESS_URL: &str = "moc_access_url";
    pub const DATAPRODUCT_TYPE: &str = "dataproduct_type";
    pub const TIMESTAMP: &str = "TIMESTAMP";
    /// Presence of this key turns an ingested record into a deletion.
    pub const REMOVE: &str = "MOCSERVER_REMOVE";
}

const SCHEME_PREFIX: &str = "ivo://";

/// Strip the `ivo://` scheme and surrounding whitespace from a raw identifier.
pub fn normalize_id(raw: &str) -> CollectionId {
    let trimmed = raw.trim();
    let has_scheme = trimmed
        .get(..SCHEME_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SCHEME_PREFIX));
    let stripped = if has_scheme {
        &trimmed[SCHEME_PREFIX.len()..]
    } else {
        trimmed
    };
    stripped.to_string()
}

/// Ordered key/value property bag. Keys are unique; insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace a value, keeping the original position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Insert a value; a repeated key is stored as `key_1`, `key_2`, ...
    pub fn push_repeatable(&mut self, key: &str, value: impl Into<String>) {
        if !self.contains_key(key) {
            self.entries.push((key.to_string(), value.into()));
            return;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", key, n);
            if !self.contains_key(&candidate) {
                self.entries.push((candidate, value.into()));
                return;
            }
            n += 1;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Kind of collection, fixed at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    HipsImage,
    HipsCube,
    Catalog,
    /// Only a coverage map is published.
    Coverage,
    Other,
}

impl RecordKind {
    pub fn classify(props: &Properties) -> Self {
        let product = props
            .get(keys::DATAPRODUCT_TYPE)
            .map(|s| s.trim().to_ascii_lowercase());
        let has_hips = props.contains_key(keys::HIPS_SERVICE_URL);
        match product.as_deref() {
            Some("catalog") => RecordKind::Catalog,
            Some("cube") if has_hips => RecordKind::HipsCube,
            _ if has_hips => RecordKind::HipsImage,
            None if props.contains_key(keys::MOC_ACCESS_URL) => RecordKind::Coverage,
            _ => RecordKind::Other,
        }
    }

    /// Category used when a record carries no `client_category`.
    pub fn default_category(self) -> &'static str {
        match self {
            RecordKind::HipsImage => "Image/Others",
            RecordKind::HipsCube => "Cube/Others",
            RecordKind::Catalog => "Catalog/Others",
            RecordKind::Coverage => "Coverage/Others",
            RecordKind::Other => "Others",
        }
    }
}

/// One entry of the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    /// Store key; scheme prefix already stripped.
    pub id: CollectionId,
    /// Identifier compared against registry filter and region results.
    pub internal_id: CollectionId,
    pub kind: RecordKind,
    pub properties: Properties,
    pub last_modified: Timestamp,
    /// Set by the filter engine; never persisted.
    #[serde(skip)]
    pub hidden: bool,
    /// Set by the relevance updater; never persisted.
    #[serde(skip)]
    pub relevance: Relevance,
}

impl CollectionRecord {
    /// Build a record from its property bag.
    ///
    /// Returns `None` when no identifier can be derived.
    pub fn from_properties(properties: Properties) -> Option<Self> {
        let id = derive_id(&properties)?;
        let last_modified = properties
            .get(keys::TIMESTAMP)
            .and_then(|t| t.trim().parse::<Timestamp>().ok())
            .unwrap_or(0);
        Some(Self {
            internal_id: id.clone(),
            id,
            kind: RecordKind::classify(&properties),
            properties,
            last_modified,
            hidden: false,
            relevance: Relevance::Unknown,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    pub fn title(&self) -> &str {
        self.get(keys::TITLE)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.id)
    }

    pub fn category(&self) -> &str {
        self.get(keys::CATEGORY)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.kind.default_category())
    }

    /// Sort key within a branch; falls back to the title.
    pub fn sort_key(&self) -> &str {
        self.get(keys::SORT_KEY)
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| self.title())
    }

    /// Whether the record publishes spatial coverage information.
    pub fn has_coverage(&self) -> bool {
        self.sky_fraction().is_some() || self.properties.contains_key(keys::MOC_ACCESS_URL)
    }

    pub fn sky_fraction(&self) -> Option<f64> {
        self.get(keys::SKY_FRACTION)
            .and_then(|f| f.trim().parse::<f64>().ok())
    }

    /// All HiPS service URLs, primary first, then `hips_service_url_N` mirrors.
    pub fn mirror_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.get(keys::HIPS_SERVICE_URL).into_iter().collect();
        let prefix = format!("{}_", keys::HIPS_SERVICE_URL);
        urls.extend(
            self.properties
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(_, v)| v),
        );
        urls
    }
}

/// Derive the store key from `ID`, `creator_did` or `publisher_did`.
pub fn derive_id(properties: &Properties) -> Option<CollectionId> {
    [keys::ID, keys::CREATOR_DID, keys::PUBLISHER_DID]
        .iter()
        .filter_map(|k| properties.get(k))
        .map(normalize_id)
        .find(|id| !id.is_empty())
}
