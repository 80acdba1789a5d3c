use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::fingerprint::Fingerprint;
use crate::extents::ExtentList;
use crate::utils::compression::Compression;

/// An immutable snapshot of the cached data for one [`Fingerprint`].
///
/// `extents` describes exactly the time coverage of `payload`. Objects are never mutated in
/// place, a merge produces a new object that replaces the previous one in the store.
#[derive(Debug, Clone)]
pub struct CacheObject {
    pub fingerprint: Fingerprint,
    pub extents: ExtentList,
    /// The encoded payload, after [`compression`](Self::compression) was applied.
    pub payload: Bytes,
    pub compression: Compression,
    /// When the first version of this object was created.
    pub created_at: Instant,
    pub ttl: Option<Duration>,
}

impl CacheObject {
    /// The size of the object, as it counts towards the capacity of the store.
    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }
}
