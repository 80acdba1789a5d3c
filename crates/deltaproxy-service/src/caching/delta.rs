use std::sync::Arc;

use super::fingerprint::Fingerprint;
use super::object::CacheObject;
use super::store::CacheStore;
use crate::extents::{Extent, ExtentList};

/// The split of a requested range into the parts served from cache and the parts to fetch.
#[derive(Debug, Clone)]
pub struct DeltaPlan {
    /// Requested ranges that the cached object covers.
    pub served: ExtentList,
    /// Requested ranges that have to be fetched from the origin.
    pub missing: ExtentList,
    /// The cached object the plan is based on.
    pub object: Option<Arc<CacheObject>>,
}

impl DeltaPlan {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Computes which parts of `requested` are missing from the cache.
///
/// This does not affect the eviction rank of the cached object.
pub fn plan(
    store: &CacheStore,
    fingerprint: &Fingerprint,
    requested: Extent,
    resolution: i64,
) -> DeltaPlan {
    match store.peek(fingerprint) {
        None => DeltaPlan {
            served: ExtentList::new(),
            missing: ExtentList::single(requested),
            object: None,
        },
        Some(object) => DeltaPlan {
            served: object.extents.crop(requested),
            missing: object.extents.gaps(requested, resolution),
            object: Some(object),
        },
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::caching::eviction::{EvictionMethod, Watermarks};
    use crate::utils::compression::Compression;

    fn store_with(extents: &[(i64, i64)]) -> (CacheStore, Fingerprint) {
        let store = CacheStore::new("test", EvictionMethod::Lru, Watermarks::default());
        let fingerprint = Fingerprint::from_raw("query");
        store.put(CacheObject {
            fingerprint: fingerprint.clone(),
            extents: ExtentList::from_extents(
                extents.iter().map(|&(s, e)| Extent::new(s, e)),
                1,
            ),
            payload: Bytes::new(),
            compression: Compression::None,
            created_at: Instant::now(),
            ttl: None,
        });
        (store, fingerprint)
    }

    #[test]
    fn test_plan_absent() {
        let store = CacheStore::new("test", EvictionMethod::Lru, Watermarks::default());
        let plan = plan(&store, &Fingerprint::from_raw("query"), Extent::new(0, 100), 1);
        assert!(plan.served.is_empty());
        assert_eq!(plan.missing, ExtentList::single(Extent::new(0, 100)));
        assert!(plan.object.is_none());
    }

    #[test]
    fn test_plan_partial() {
        let (store, fingerprint) = store_with(&[(0, 50), (70, 80)]);
        let plan = plan(&store, &fingerprint, Extent::new(40, 100), 1);
        assert_eq!(plan.served.to_string(), "{[40,50],[70,80]}");
        assert_eq!(plan.missing.to_string(), "{[51,69],[81,100]}");
        assert!(!plan.is_complete());
    }

    #[test]
    fn test_plan_complete() {
        let (store, fingerprint) = store_with(&[(0, 50)]);
        let plan = plan(&store, &fingerprint, Extent::new(10, 20), 1);
        assert!(plan.is_complete());
        assert_eq!(plan.served, ExtentList::single(Extent::new(10, 20)));
    }
}
