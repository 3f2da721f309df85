//! Error types for the text mesh
//!
//! Three families live here:
//! - [`MeshError`]: configuration, I/O and HTTP-serving errors that propagate with `?`
//! - [`DispatchFailure`]: the typed outcome of a failed downstream call
//! - [`CacheError`]: shared-tier failures, which are always recovered locally

use std::fmt;
use thiserror::Error;

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

/// Error types that can occur outside of dispatch and caching
#[derive(Error, Debug, Clone)]
pub enum MeshError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::ParseError(err.to_string())
    }
}

impl MeshError {
    /// Convert error to the HTTP status code a service should answer with
    pub fn to_http_status(&self) -> u16 {
        match self {
            MeshError::ParseError(_) => 400,
            MeshError::Validation(_) => 422,
            MeshError::HttpError(_) => 502,
            MeshError::ConfigError(_) => 500,
            MeshError::IoError(_) => 500,
            MeshError::InternalError(_) => 500,
        }
    }
}

/// Classification of a failed downstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The transport timed out waiting for the downstream
    Timeout,
    /// The downstream answered with a non-2xx status
    UpstreamStatus(u16),
    /// DNS, connection refused, reset, or an unreadable response
    ConnectionError,
    /// Every attempt timed out
    RetriesExhausted,
    /// The caller gave up before the call completed
    Cancelled,
}

impl FailureKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::UpstreamStatus(_) => "upstream_status",
            FailureKind::ConnectionError => "connection_error",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Cancelled => "cancelled",
        }
    }

    /// Map a failure to the status a gateway should return to its own client
    ///
    /// - `Timeout` becomes 504 Gateway Timeout
    /// - `UpstreamStatus` becomes 502 Bad Gateway
    /// - `ConnectionError` and `RetriesExhausted` become 503 Service Unavailable
    /// - `Cancelled` becomes 499 (client closed request)
    pub fn to_http_status(&self) -> u16 {
        match self {
            FailureKind::Timeout => 504,
            FailureKind::UpstreamStatus(_) => 502,
            FailureKind::ConnectionError => 503,
            FailureKind::RetriesExhausted => 503,
            FailureKind::Cancelled => 499,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::UpstreamStatus(code) => write!(f, "upstream_status({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A failed logical call to a downstream service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message} (after {attempts} attempts)")]
pub struct DispatchFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Number of attempts actually issued
    pub attempts: u32,
}

impl DispatchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        DispatchFailure {
            kind,
            message: message.into(),
            attempts,
        }
    }

    pub fn to_http_status(&self) -> u16 {
        self.kind.to_http_status()
    }
}

/// Shared-tier cache failures
///
/// These never leave the cache: callers see a miss and a warning in the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    #[error("Cache tier unavailable: {0}")]
    TierUnavailable(String),
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}
