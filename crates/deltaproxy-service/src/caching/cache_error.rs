use std::time::Duration;

use thiserror::Error;

use crate::extents::ExtentList;
use crate::series::CodecError;

/// An error that happens while resolving a request against the cache and its origin.
///
/// This error is broadcast to every request waiting on the same fetch, hence it is [`Clone`] and
/// only carries owned, printable details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// The origin could not deliver the requested ranges.
    ///
    /// The attached string contains the reason reported by the origin.
    #[error("origin fetch failed: {0}")]
    FetchFailed(String),
    /// The origin did not answer within the configured fetch timeout.
    #[error("origin fetch timed out after {0:?}")]
    FetchTimeout(Duration),
    /// The origin answered, but some of the requested ranges failed.
    #[error("origin failed to deliver {failed}: {reason}")]
    PartialFetch { failed: ExtentList, reason: String },
    /// A payload delivered by the origin could not be decoded, or a merged result could not be
    /// encoded again.
    #[error("codec error: {0}")]
    Codec(String),
    /// An unexpected error in the cache itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for DeltaError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

impl DeltaError {
    /// A short and stable name of the error kind, used to tag metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DeltaError::FetchFailed(_) => "fetch_failed",
            DeltaError::FetchTimeout(_) => "timeout",
            DeltaError::PartialFetch { .. } => "partial",
            DeltaError::Codec(_) => "codec",
            DeltaError::Internal(_) => "internal",
        }
    }
}

/// An invalid cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The eviction method is neither a known name nor a known numeric identifier.
    ///
    /// The attached string is the configured value, verbatim.
    #[error("unknown eviction method: {0}")]
    UnknownEvictionMethod(String),
    /// A low-water mark exceeds its high-water mark.
    #[error("invalid {dimension} watermarks: low-water mark {low} exceeds high-water mark {high}")]
    InvalidWatermarks {
        dimension: &'static str,
        low: u64,
        high: u64,
    },
    /// The timestamp resolution is negative.
    #[error("invalid resolution {0}, must not be negative")]
    InvalidResolution(i64),
}
