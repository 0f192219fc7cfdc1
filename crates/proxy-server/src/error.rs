use segment_cache::CacheError;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds surfaced by the proxy data path.
///
/// Every per-connection error ends at the worker boundary, where it is logged
/// and the client connection is closed without a synthesized reply.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request carries no usable host")]
    MissingHost,

    #[error("failed to resolve {host}")]
    ResolutionFailed { host: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("origin {addr} unreachable: {source}")]
    OriginUnreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid origin response: {0}")]
    InvalidResponse(&'static str),

    #[error("no representations available")]
    NoRepresentations,

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("worker pool is closed")]
    PoolClosed,

    #[error(transparent)]
    InvalidCapacity(#[from] CacheError),

    #[error("client i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::MissingHost => "missing_host",
            ProxyError::ResolutionFailed { .. } => "resolution_failed",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::OriginUnreachable { .. } => "origin_unreachable",
            ProxyError::InvalidResponse(_) => "invalid_response",
            ProxyError::NoRepresentations => "no_representations",
            ProxyError::InvalidManifest(_) => "invalid_manifest",
            ProxyError::PoolClosed => "pool_closed",
            ProxyError::InvalidCapacity(_) => "invalid_capacity",
            ProxyError::Io(_) => "io",
        }
    }
}
