use std::sync::Arc;
use std::time::Duration;

use deltaproxy_service::caching::{CacheStatus, EvictionMethod};
use deltaproxy_service::extents::{Extent, ExtentList};
use deltaproxy_service::series::{JsonCodec, SeriesCodec};

use crate::{TestOrigin, query, setup_cache};

#[tokio::test]
async fn test_dashboard_refresh() {
    let cache = setup_cache(|_| {});
    let fp = query(&cache, "sum(rate(http_requests_total[5m]))");
    let origin = TestOrigin::new(Arc::new(JsonCodec), 10, Duration::ZERO);

    for (i, offset) in [0, 60, 120].into_iter().enumerate() {
        let requested = Extent::new(offset, offset + 600);
        let resolved = cache
            .resolve(&fp, requested, origin.clone().into_origin())
            .await
            .unwrap();

        let expected = if i == 0 {
            CacheStatus::Miss
        } else {
            CacheStatus::PartialHit
        };
        assert_eq!(resolved.status, expected);
        assert_eq!(resolved.extents, ExtentList::single(requested));
        assert_eq!(JsonCodec.decode(&resolved.payload).unwrap().len(), 61 * 2);
    }

    assert_eq!(
        origin.fetches.all_hits(),
        vec![
            ("{[0,600]}".to_owned(), 1),
            ("{[601,660]}".to_owned(), 1),
            ("{[661,720]}".to_owned(), 1),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overlapping_requests() {
    let cache = setup_cache(|_| {});
    let fp = query(&cache, "up");
    let origin = TestOrigin::new(Arc::new(JsonCodec), 10, Duration::from_millis(20));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            let fp = fp.clone();
            let origin = origin.clone().into_origin();
            tokio::spawn(async move {
                let requested = Extent::new(i * 10, i * 10 + 200);
                let resolved = cache.resolve(&fp, requested, origin).await.unwrap();
                (requested, resolved)
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        let (requested, resolved) = task.unwrap();
        assert_eq!(resolved.extents, ExtentList::single(requested));
        assert!(resolved.degraded.is_none());
        assert_eq!(JsonCodec.decode(&resolved.payload).unwrap().len(), 21 * 2);
    }

    // fetches for one query never overlap in time, and never fetch a range twice
    assert_eq!(origin.max_running(), 1);
    let fetches = origin.fetches.all_hits();
    assert!(fetches.iter().all(|(_, count)| *count == 1));

    let object = cache.store().peek(&fp).unwrap();
    assert_eq!(object.extents, ExtentList::single(Extent::new(0, 510)));
    assert_eq!(cache.stats().objects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_independent_queries_fetch_in_parallel() {
    let cache = setup_cache(|_| {});
    let origin = TestOrigin::new(Arc::new(JsonCodec), 10, Duration::from_millis(100));

    let up = query(&cache, "up");
    let down = query(&cache, "down");
    let requested = Extent::new(0, 100);
    let (a, b) = futures::join!(
        cache.resolve(&up, requested, origin.clone().into_origin()),
        cache.resolve(&down, requested, origin.clone().into_origin()),
    );
    assert_eq!(a.unwrap().status, CacheStatus::Miss);
    assert_eq!(b.unwrap().status, CacheStatus::Miss);

    assert_eq!(origin.max_running(), 2);
    assert_eq!(origin.fetches.accesses(), 2);
}

#[tokio::test]
async fn test_eviction_under_load() {
    let cache = setup_cache(|config| {
        config.eviction_method = EvictionMethod::Lru;
        config.high_water_objects = Some(4);
        config.low_water_objects = Some(2);
    });
    let origin = TestOrigin::new(Arc::new(JsonCodec), 10, Duration::ZERO);

    let queries: Vec<_> = (0..10)
        .map(|i| query(&cache, &format!("up{{shard=\"{i}\"}}")))
        .collect();
    for fp in &queries {
        cache
            .resolve(fp, Extent::new(0, 100), origin.clone().into_origin())
            .await
            .unwrap();
        assert!(cache.stats().objects <= 4);
    }

    let stats = cache.stats();
    assert_eq!(stats.objects, 4);
    assert_eq!(stats.evictions, 6);
    assert_eq!(stats.misses, 10);

    // the most recent queries survived
    for fp in &queries[6..] {
        assert!(cache.store().peek(fp).is_some());
    }
}
