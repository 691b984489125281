//! Error types surfaced by the cache layer.

use thiserror::Error;

/// Failure reported by the upstream fetch collaborator.
///
/// Cloneable so that a single failed fetch can be handed verbatim to every
/// caller coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("no query document registered for operation `{operation}`")]
    UnknownOperation { operation: String },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("upstream responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("upstream returned errors: {}", messages.join("; "))]
    GraphQl { messages: Vec<String> },
    #[error("failed to decode upstream response: {message}")]
    Decode { message: String },
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Errors returned from the cached fetch entry point.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The operation name or variables cannot be turned into a canonical key.
    #[error("invalid cache key input: {reason}")]
    InvalidKey { reason: String },
    /// The upstream fetch failed; nothing was cached.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// The in-flight fetch for `key` was aborted before producing a result.
    #[error("in-flight fetch for `{key}` was cancelled")]
    Cancelled { key: String },
}

impl CacheError {
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Returns true when the failure originated upstream.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}
