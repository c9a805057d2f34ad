//! Registry query construction.
//!
//! The registry takes a flat `key=value` query string. [`RegistryQuery`] keeps
//! parameters ordered so logged URLs are stable.

use crate::error::DirectoryError;
use crate::store::keys;
use crate::types::Timestamp;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response encoding requested with `fmt=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// `key = value` records separated by blank lines.
    #[default]
    Plain,
    /// Same records, compressed by the server.
    Compressed,
    /// Each record closed by an explicit terminator line.
    LineTerminated,
}

impl ResponseFormat {
    pub fn as_param(self) -> &'static str {
        match self {
            ResponseFormat::Plain => "ascii",
            ResponseFormat::Compressed => "asciic",
            ResponseFormat::LineTerminated => "asciil",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Sky region used by a relevance query, in degrees (ICRS).
#[derive(Debug, Clone, PartialEq)]
pub enum SkyRegion {
    Circle { ra: f64, dec: f64, radius: f64 },
    /// Vertices in order, at least three.
    Polygon(Vec<(f64, f64)>),
}

impl SkyRegion {
    /// Region covering a viewport of angular size `fov` centered on (`ra`, `dec`).
    ///
    /// Fields larger than `large_field` degrees use a circle padded by √2 so
    /// the corners are covered; smaller ones use the four viewport corners.
    pub fn for_viewport(ra: f64, dec: f64, fov: f64, large_field: f64) -> Self {
        if fov >= large_field {
            return SkyRegion::Circle {
                ra,
                dec,
                radius: (fov / 2.0 * std::f64::consts::SQRT_2).min(180.0),
            };
        }
        let half = fov / 2.0;
        let cos_dec = dec.to_radians().cos().abs().max(1e-6);
        let dra = (half / cos_dec).min(180.0);
        let corner = |sx: f64, sy: f64| {
            let r = (ra + sx * dra).rem_euclid(360.0);
            let d = (dec + sy * half).clamp(-90.0, 90.0);
            (r, d)
        };
        SkyRegion::Polygon(vec![
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
        ])
    }
}

/// Ordered set of query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryQuery {
    params: Vec<(String, String)>,
}

impl RegistryQuery {
    /// Every collection, full records.
    pub fn all() -> Self {
        Self::default()
            .param(keys::ID, "*")
            .param("get", "record")
    }

    /// Identifiers of collections overlapping `region`.
    pub fn region(region: &SkyRegion) -> Self {
        let mut query = Self::default();
        match region {
            SkyRegion::Circle { ra, dec, radius } => {
                query = query
                    .param("RA", format_degrees(*ra))
                    .param("DEC", format_degrees(*dec))
                    .param("SR", format_degrees(*radius));
            }
            SkyRegion::Polygon(vertices) => {
                let coords: Vec<String> = vertices
                    .iter()
                    .map(|(ra, dec)| format!("{} {}", format_degrees(*ra), format_degrees(*dec)))
                    .collect();
                query = query.param("stc", format!("Polygon ICRS {}", coords.join(" ")));
            }
        }
        query.param("intersect", "overlaps").param("get", "id")
    }

    /// Set a parameter, replacing any previous value for the same key.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    /// Return every property except `fields`. No-op for an empty list.
    pub fn exclude_fields<S: AsRef<str>>(self, fields: &[S]) -> Self {
        if fields.is_empty() {
            return self;
        }
        let list: Vec<&str> = fields.iter().map(AsRef::as_ref).collect();
        self.param("fields", format!("!{}", list.join(",")))
    }

    pub fn format(self, format: ResponseFormat) -> Self {
        self.param("fmt", format.as_param())
    }

    /// Only records modified strictly after `since`.
    pub fn modified_after(self, since: Timestamp) -> Self {
        self.param(keys::TIMESTAMP, format!(">{}", since))
    }

    /// Whether the query already carries a timestamp constraint.
    pub fn is_incremental(&self) -> bool {
        self.get(keys::TIMESTAMP).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Full request URL against `base`.
    pub fn to_url(&self, base: &str) -> Result<Url, DirectoryError> {
        Url::parse_with_params(base, &self.params).map_err(|e| {
            DirectoryError::NetworkError(format!("Invalid registry URL {}: {}", base, e))
        })
    }
}

impl fmt::Display for RegistryQuery {
    /// Unencoded `k=v&k=v` form, for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

fn format_degrees(value: f64) -> String {
    let text = format!("{:.6}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}
