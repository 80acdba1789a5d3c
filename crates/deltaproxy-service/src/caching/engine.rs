use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;

use super::cache_error::{ConfigError, DeltaError};
use super::coalesce::{Coalescer, FetchOutcome, TicketResult, wait};
use super::config::{PartialResults, TimeseriesCacheConfig};
use super::delta::{self, DeltaPlan};
use super::fingerprint::{Fingerprint, FingerprintBuilder};
use super::merge::{Coverage, cacheable_bound};
use super::object::CacheObject;
use super::store::CacheStore;
use crate::extents::{Extent, ExtentList};
use crate::origin::{Origin, OriginResponse};
use crate::series::SeriesCodec;

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Everything was served from the cache.
    Hit,
    /// Part of the request was served from the cache, the rest was fetched.
    PartialHit,
    /// Nothing was cached, everything was fetched.
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::PartialHit => "partial_hit",
            CacheStatus::Miss => "miss",
        }
    }
}

/// The response to a resolved request.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The encoded data points within the requested range.
    pub payload: Bytes,
    /// The ranges for which `payload` has data.
    pub extents: ExtentList,
    pub status: CacheStatus,
    /// Requested ranges that could not be served.
    pub unavailable: ExtentList,
    /// Set if the origin failed for some of the requested ranges and only part of the request is
    /// served.
    pub degraded: Option<DeltaError>,
}

/// Counters describing the activity of a [`DeltaProxyCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub objects: u64,
    pub bytes: u64,
    pub hits: u64,
    pub partial_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub fetch_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    fetch_errors: AtomicU64,
}

/// How often a write back is retried when the stored object changes underneath it.
const WRITE_ATTEMPTS: usize = 3;

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

#[derive(Debug)]
struct CacheInner {
    name: Arc<str>,
    config: TimeseriesCacheConfig,
    store: CacheStore,
    coalescer: Coalescer,
    codec: Arc<dyn SeriesCodec>,
    counters: Counters,
}

/// A delta proxy cache for time-series range queries.
///
/// Requests are answered from the cached data of their [`Fingerprint`] where possible. Only the
/// ranges missing from the cache are fetched from the [`Origin`], and merged into the cached data
/// for later requests. Concurrent requests for the same fingerprint share their fetches.
///
/// This is cheap to clone, all clones share the same cache.
#[derive(Debug, Clone)]
pub struct DeltaProxyCache {
    inner: Arc<CacheInner>,
}

impl DeltaProxyCache {
    /// Creates a new cache, validating its configuration.
    pub fn new(
        name: impl Into<Arc<str>>,
        config: TimeseriesCacheConfig,
        codec: Arc<dyn SeriesCodec>,
    ) -> Result<Self, ConfigError> {
        let watermarks = config.validate()?;
        let name = name.into();
        tracing::debug!(
            cache = %name,
            eviction_method = %config.eviction_method,
            codec = codec.name(),
            "Creating timeseries cache"
        );

        let inner = CacheInner {
            store: CacheStore::new(Arc::clone(&name), config.eviction_method, watermarks),
            coalescer: Coalescer::new(config.resolution),
            name,
            config,
            codec,
            counters: Counters::default(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &TimeseriesCacheConfig {
        &self.inner.config
    }

    /// The underlying object store.
    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Creates a [`FingerprintBuilder`] that excludes the configured time range parameters.
    pub fn fingerprint(&self, backend: &str) -> FingerprintBuilder {
        Fingerprint::builder(backend).exclude_params(&self.inner.config.excluded_params)
    }

    /// Serves the `requested` range of the query identified by `fingerprint`.
    ///
    /// Cached data is served directly. Missing ranges are fetched from `origin`, sharing fetches
    /// with concurrent requests for the same fingerprint, and are merged into the cache.
    ///
    /// If the origin fails but part of the request can be served, the partial response is
    /// returned with [`Resolved::degraded`] set. An error is returned only if nothing can be
    /// served.
    pub async fn resolve(
        &self,
        fingerprint: &Fingerprint,
        requested: Extent,
        origin: Arc<dyn Origin>,
    ) -> Result<Resolved, DeltaError> {
        let inner = &self.inner;
        let resolution = inner.config.resolution;
        metric!(counter("deltacache.access") += 1, "cache" => &inner.name);

        let (plan, cached) = inner.plan(fingerprint, requested);

        if plan.is_complete() {
            inner.store.touch(fingerprint);
            bump(&inner.counters.hits, 1);
            metric!(counter("deltacache.hit") += 1, "cache" => &inner.name);
            tracing::trace!(%fingerprint, %requested, "Served from cache");

            return inner.respond(cached.crop(requested), CacheStatus::Hit, None);
        }

        let registration = {
            let this = Arc::clone(inner);
            let key = fingerprint.clone();
            inner
                .coalescer
                .register(fingerprint, &plan.missing, move |gaps| async move {
                    this.fetch_and_merge(&key, gaps, origin).await
                })
        };
        if registration.coalesced {
            bump(&inner.counters.coalesced, 1);
            metric!(counter("deltacache.coalesced") += 1, "cache" => &inner.name);
        }

        let results = join_all(registration.channels.into_iter().map(wait)).await;

        let mut response = cached.crop(requested);
        let mut degraded = None;
        for result in results {
            match result {
                Ok(outcome) => {
                    let fetched = Coverage {
                        extents: outcome.covered.clone(),
                        points: outcome.points.clone(),
                    };
                    response = response.merge(fetched.crop(requested), resolution);
                    if degraded.is_none() {
                        degraded = outcome.error.clone();
                    }
                }
                Err(err) => {
                    if degraded.is_none() {
                        degraded = Some(err);
                    }
                }
            }
        }

        let status = if plan.served.is_empty() {
            bump(&inner.counters.misses, 1);
            metric!(counter("deltacache.miss") += 1, "cache" => &inner.name);
            CacheStatus::Miss
        } else {
            bump(&inner.counters.partial_hits, 1);
            metric!(counter("deltacache.partial_hit") += 1, "cache" => &inner.name);
            CacheStatus::PartialHit
        };

        if let Some(err) = &degraded {
            if response.is_empty() {
                return Err(err.clone());
            }
            tracing::debug!(%fingerprint, %requested, error = %err, "Serving degraded response");
        }

        let mut resolved = inner.respond(response, status, degraded)?;
        if resolved.degraded.is_some() {
            resolved.unavailable = resolved.extents.gaps(requested, resolution);
        }
        Ok(resolved)
    }

    /// Removes all cached data of `fingerprint`.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.inner.store.delete(fingerprint);
        if removed {
            tracing::debug!(%fingerprint, "Invalidated cache object");
        }
        removed
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            objects: self.inner.store.len() as u64,
            bytes: self.inner.store.total_bytes(),
            hits: counters.hits.load(Ordering::Relaxed),
            partial_hits: counters.partial_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            fetch_errors: counters.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

impl CacheInner {
    /// Plans the request against the current cache contents, and decodes the cached data.
    ///
    /// A cached object that fails to decode is deleted, and the request planned as a miss.
    fn plan(&self, fingerprint: &Fingerprint, requested: Extent) -> (DeltaPlan, Coverage) {
        let plan = delta::plan(&self.store, fingerprint, requested, self.config.resolution);
        let Some(object) = &plan.object else {
            return (plan, Coverage::default());
        };

        match self.decode(object) {
            Ok(cached) => (plan, cached),
            Err(err) => {
                tracing::error!(
                    %fingerprint,
                    error = &err as &dyn std::error::Error,
                    "Corrupt cache object"
                );
                self.store.delete(fingerprint);
                let plan = DeltaPlan {
                    served: ExtentList::new(),
                    missing: ExtentList::single(requested),
                    object: None,
                };
                (plan, Coverage::default())
            }
        }
    }

    fn decode(&self, object: &CacheObject) -> Result<Coverage, DeltaError> {
        let payload = object
            .compression
            .decompress(&object.payload)
            .map_err(|err| DeltaError::Codec(err.to_string()))?;
        let points = self.codec.decode(&payload)?;
        Ok(Coverage::new(object.extents.clone(), points))
    }

    fn respond(
        &self,
        coverage: Coverage,
        status: CacheStatus,
        degraded: Option<DeltaError>,
    ) -> Result<Resolved, DeltaError> {
        let payload = self.codec.encode(&coverage.points)?;
        Ok(Resolved {
            payload,
            extents: coverage.extents,
            status,
            unavailable: ExtentList::new(),
            degraded,
        })
    }

    /// Fetches the `gaps` of `fingerprint` that are still missing, and merges them into the cache.
    ///
    /// This runs as the task of a fetch ticket, so only one call per fingerprint is active.
    async fn fetch_and_merge(
        self: Arc<Self>,
        fingerprint: &Fingerprint,
        gaps: ExtentList,
        origin: Arc<dyn Origin>,
    ) -> TicketResult {
        let resolution = self.config.resolution;
        let Some(outer) = gaps.outer() else {
            return Ok(Arc::default());
        };

        // Another ticket may have filled some of the gaps in the meantime.
        let (plan, cached) = self.plan(fingerprint, outer);
        let missing = match &plan.object {
            Some(object) => gaps.subtract(&object.extents, resolution),
            None => gaps.clone(),
        };
        if missing.is_empty() {
            return Ok(Arc::new(FetchOutcome {
                covered: gaps.clone(),
                points: cached.restrict(&gaps).points,
                ..Default::default()
            }));
        }

        let response = self.fetch(fingerprint, &missing, origin).await?;

        // Only ranges the origin reports as failed are errors. Anything else it was asked for
        // holds no data, and data beyond the gaps is kept as well.
        let failed = response.failed.intersection(&missing);
        let covered = missing
            .merge(&response.extents, resolution)
            .subtract(&failed, resolution);
        let error = (!failed.is_empty()).then(|| DeltaError::PartialFetch {
            failed: failed.clone(),
            reason: "origin failed to deliver some ranges".into(),
        });

        if let Some(err) = &error {
            bump(&self.counters.fetch_errors, 1);
            metric!(
                counter("deltacache.fetch.error") += 1,
                "cache" => &self.name,
                "kind" => err.kind(),
            );
            tracing::warn!(%fingerprint, %failed, "Origin failed to deliver ranges");
            if self.config.partial_results == PartialResults::FailAll {
                return Err(err.clone());
            }
        }

        let fetched = self.codec.decode(&response.payload).map_err(|err| {
            bump(&self.counters.fetch_errors, 1);
            DeltaError::from(err)
        })?;
        let fetched = Coverage::new(covered, fetched);

        let snapshot = plan.object.as_ref().map(|object| (object, &cached));
        self.write_back(fingerprint, &fetched, snapshot)?;

        let available = gaps.subtract(&failed, resolution);
        let fetched = cached.merge(fetched, resolution).restrict(&available);
        Ok(Arc::new(FetchOutcome {
            covered: fetched.extents,
            points: fetched.points,
            failed,
            error,
        }))
    }

    /// Calls the origin, bounded by the fetch timeout.
    async fn fetch(
        &self,
        fingerprint: &Fingerprint,
        missing: &ExtentList,
        origin: Arc<dyn Origin>,
    ) -> Result<OriginResponse, DeltaError> {
        bump(&self.counters.fetches, 1);
        metric!(counter("deltacache.fetch") += 1, "cache" => &self.name);
        tracing::debug!(%fingerprint, %missing, "Fetching from origin");

        let timeout = self.config.fetch_timeout;
        let gaps = missing.clone();
        let start = Instant::now();
        let fetch = AssertUnwindSafe(async move { origin.fetch(gaps).await }).catch_unwind();

        let result = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(DeltaError::FetchFailed("origin panicked".into())),
            Err(_elapsed) => Err(DeltaError::FetchTimeout(timeout)),
        };
        metric!(timer("deltacache.fetch.duration") = start.elapsed(), "cache" => &self.name);

        result.inspect_err(|err| {
            bump(&self.counters.fetch_errors, 1);
            metric!(
                counter("deltacache.fetch.error") += 1,
                "cache" => &self.name,
                "kind" => err.kind(),
            );
            tracing::warn!(%fingerprint, %missing, error = %err, "Origin fetch failed");
        })
    }

    /// Merges `fetched` into the stored object and writes the cacheable part back.
    ///
    /// The merge is based on the object currently in the store rather than the `snapshot` the
    /// fetch started from, so an invalidation or eviction during the fetch is not undone.
    fn write_back(
        &self,
        fingerprint: &Fingerprint,
        fetched: &Coverage,
        snapshot: Option<(&Arc<CacheObject>, &Coverage)>,
    ) -> Result<(), DeltaError> {
        for _ in 0..WRITE_ATTEMPTS {
            let current = self.store.peek(fingerprint);
            let base = match (&current, snapshot) {
                (Some(object), Some((previous, cached))) if Arc::ptr_eq(object, previous) => {
                    cached.clone()
                }
                (Some(object), _) => self.decode(object).unwrap_or_else(|err| {
                    tracing::error!(
                        %fingerprint,
                        error = &err as &dyn std::error::Error,
                        "Corrupt cache object"
                    );
                    Coverage::default()
                }),
                (None, _) => Coverage::default(),
            };
            let merged = base.merge(fetched.clone(), self.config.resolution);

            let now = chrono::Utc::now().timestamp();
            let bound = cacheable_bound(
                now,
                self.config.retention_window,
                self.config.backfill_tolerance,
            );
            let cacheable = match bound {
                Some(bound) => merged.crop(bound),
                None => Coverage::default(),
            };

            if cacheable.is_empty() {
                if let Some(object) = &current {
                    self.store.delete_object(object);
                }
                return Ok(());
            }

            let payload = self.codec.encode(&cacheable.points)?;
            let compression = self.config.compression;
            let payload = compression.compress(payload).map_err(|err| {
                DeltaError::Internal(format!("failed to compress payload: {err}"))
            })?;

            let object = CacheObject {
                fingerprint: fingerprint.clone(),
                extents: cacheable.extents,
                payload,
                compression,
                created_at: current.as_ref().map_or_else(Instant::now, |o| o.created_at),
                ttl: self.config.ttl,
            };
            if let Some(evicted) = self.store.replace(object, current.as_ref()) {
                bump(&self.counters.evictions, evicted as u64);
                return Ok(());
            }
            tracing::trace!(%fingerprint, "Cache object changed during write back");
        }

        tracing::debug!(%fingerprint, "Skipped write back of contended cache object");
        Ok(())
    }
}
