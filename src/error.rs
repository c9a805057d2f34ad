//! Error types for the collection directory.

use thiserror::Error;

/// Errors surfaced by directory operations.
///
/// An interrupted sync is not represented here: interruption is cooperative and
/// reported through [`crate::registry::FetchBatch::interrupted`].
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Connection failure, timeout, HTTP error status or malformed response body.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A single malformed record in a registry stream.
    #[error("Parse error at line {line}: {reason}")]
    ParseError { line: usize, reason: String },

    /// Missing, unreadable or incompatible local cache.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Invalid filter expression.
    #[error("Filter error: {0}")]
    FilterError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),
}

impl DirectoryError {
    /// Whether a fetch failing with this error should be retried on a mirror.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DirectoryError::NetworkError(_))
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        DirectoryError::NetworkError(err.to_string())
    }
}

impl From<config::ConfigError> for DirectoryError {
    fn from(err: config::ConfigError) -> Self {
        DirectoryError::ConfigError(err.to_string())
    }
}

impl From<bincode::Error> for DirectoryError {
    fn from(err: bincode::Error) -> Self {
        DirectoryError::CacheError(err.to_string())
    }
}
