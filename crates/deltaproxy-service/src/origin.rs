//! The interface to the upstream time-series backend.

use std::future::Future;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::caching::DeltaError;
use crate::extents::ExtentList;

/// The answer of an [`Origin`] to a fetch of one or more time ranges.
#[derive(Debug, Clone, Default)]
pub struct OriginResponse {
    /// The encoded data points, in the format of the configured codec.
    pub payload: Bytes,
    /// The ranges the payload covers, which may extend beyond the requested ranges.
    ///
    /// Requested ranges that are not [`failed`](Self::failed) count as covered, even if they are
    /// missing here. They simply hold no data.
    pub extents: ExtentList,
    /// Requested ranges the origin failed to deliver.
    pub failed: ExtentList,
}

impl OriginResponse {
    /// A response covering all of the requested ranges.
    pub fn complete(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// A response covering exactly `extents`.
    pub fn covering(payload: impl Into<Bytes>, extents: ExtentList) -> Self {
        Self {
            payload: payload.into(),
            extents,
            failed: ExtentList::new(),
        }
    }

    /// Marks `failed` as ranges the origin could not deliver.
    pub fn with_failed(mut self, failed: ExtentList) -> Self {
        self.failed = failed;
        self
    }
}

/// An upstream backend that can be asked for the data within a set of time ranges.
///
/// Any `Fn(ExtentList) -> impl Future<Output = Result<OriginResponse, DeltaError>>` closure is an
/// origin.
pub trait Origin: Send + Sync + 'static {
    fn fetch(&self, gaps: ExtentList) -> BoxFuture<'static, Result<OriginResponse, DeltaError>>;
}

impl<F, Fut> Origin for F
where
    F: Fn(ExtentList) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OriginResponse, DeltaError>> + Send + 'static,
{
    fn fetch(&self, gaps: ExtentList) -> BoxFuture<'static, Result<OriginResponse, DeltaError>> {
        self(gaps).boxed()
    }
}
