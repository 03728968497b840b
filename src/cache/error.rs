use std::io;

use thiserror::Error;

use crate::http::StatusCode;

/// Errors raised by the cache store, entry codec and configuration.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cached response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode cached response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("cached response is truncated")]
    Truncated,

    #[error("cached response head exceeds 4 GiB")]
    HeadTooLarge,

    #[error("failed to parse cache configuration: {0}")]
    ConfigParse(#[source] serde_json::Error),

    #[error("invalid cache configuration: {reason}")]
    InvalidConfig { reason: &'static str },
}

/// Outcome of a failed write through a [`CachingWriter`](super::CachingWriter).
///
/// Only [`Forward`](Self::Forward) means the client-visible write failed. The
/// other variants report that the bytes reached the real sink (`written`
/// counts them) but no cache entry was committed.
#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("write to the underlying sink failed: {0}")]
    Forward(#[from] io::Error),

    #[error("response with status {status} is not cacheable")]
    NotCacheable { status: StatusCode, written: usize },

    #[error("cache write skipped: {source}")]
    Encode {
        written: usize,
        #[source]
        source: CacheError,
    },
}

impl CacheWriteError {
    /// Bytes delivered to the real sink before the cache layer gave up, if any.
    pub fn written(&self) -> Option<usize> {
        match self {
            Self::Forward(_) => None,
            Self::NotCacheable { written, .. } | Self::Encode { written, .. } => Some(*written),
        }
    }
}
