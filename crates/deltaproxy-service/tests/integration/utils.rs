use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use deltaproxy_service::caching::{DeltaError, DeltaProxyCache, Fingerprint, TimeseriesCacheConfig};
use deltaproxy_service::extents::ExtentList;
use deltaproxy_service::origin::{Origin, OriginResponse};
use deltaproxy_service::series::{DataPoint, JsonCodec, SeriesCodec};
use deltaproxy_test as test;

pub use test::{HitCounter, fixture};

/// Setup tests and create a cache.
///
/// The cache keeps data of any age and uses the [`JsonCodec`]. The `update_config` closure can
/// modify the configuration before the cache is created.
pub fn setup_cache(update_config: impl FnOnce(&mut TimeseriesCacheConfig)) -> DeltaProxyCache {
    test::setup();

    let mut config = TimeseriesCacheConfig {
        retention_window: None,
        ..Default::default()
    };
    update_config(&mut config);

    DeltaProxyCache::new("integration", config, Arc::new(JsonCodec)).unwrap()
}

pub fn query(cache: &DeltaProxyCache, expr: &str) -> Fingerprint {
    cache
        .fingerprint("prometheus")
        .path("/api/v1/query_range")
        .param("query", expr)
        .param("step", "10")
        .build()
}

/// Encodes points at every multiple of `step` within `extents`.
pub fn payload(codec: &dyn SeriesCodec, extents: &ExtentList, step: i64) -> Bytes {
    let points: Vec<_> = extents
        .iter()
        .flat_map(|e| test::aligned_timestamps(e.start, e.end, step))
        .flat_map(|ts| {
            [
                DataPoint::new("instance=\"a\"", ts, ts as f64),
                DataPoint::new("instance=\"b\"", ts, -(ts as f64)),
            ]
        })
        .collect();
    codec.encode(&points).unwrap()
}

/// An origin serving two series, which counts its fetches by range and tracks how many of them
/// run at the same time.
#[derive(Clone)]
pub struct TestOrigin {
    pub fetches: HitCounter,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    codec: Arc<dyn SeriesCodec>,
    step: i64,
    latency: Duration,
}

impl TestOrigin {
    pub fn new(codec: Arc<dyn SeriesCodec>, step: i64, latency: Duration) -> Self {
        Self {
            fetches: HitCounter::new(),
            running: Default::default(),
            max_running: Default::default(),
            codec,
            step,
            latency,
        }
    }

    /// The largest number of fetches that were running concurrently.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn into_origin(self) -> Arc<dyn Origin> {
        Arc::new(self)
    }
}

impl Origin for TestOrigin {
    fn fetch(
        &self,
        gaps: ExtentList,
    ) -> futures::future::BoxFuture<'static, Result<OriginResponse, DeltaError>> {
        self.fetches.hit(gaps.to_string());
        let this = self.clone();
        Box::pin(async move {
            let running = this.running.fetch_add(1, Ordering::SeqCst) + 1;
            this.max_running.fetch_max(running, Ordering::SeqCst);

            tokio::time::sleep(this.latency).await;
            let payload = payload(this.codec.as_ref(), &gaps, this.step);

            this.running.fetch_sub(1, Ordering::SeqCst);
            Ok(OriginResponse::complete(payload))
        })
    }
}
