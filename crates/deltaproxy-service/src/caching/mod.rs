//! # Delta Proxy Caching infrastructure
//!
//! Time-series backends answer range queries, and dashboards tend to ask the same query over and
//! over again, each time for a window that moved a little bit forward. Instead of caching whole
//! responses, this module caches the *data* of a query, together with the time ranges it covers,
//! and only asks the origin for the ranges that are missing.
//!
//! ## Request flow
//!
//! A request for a [`Fingerprint`] and a requested [`Extent`](crate::extents::Extent) goes through
//! the following steps:
//!
//! - The delta [`plan`] splits the request into the ranges served from the cached
//!   [`CacheObject`], and the missing ranges.
//! - If nothing is missing, the request is a cache hit and is answered right away.
//! - Otherwise, the missing ranges are registered with the [`Coalescer`]. Per fingerprint, there
//!   is at most one fetch running, and one more queued behind it that collects the missing ranges
//!   of all requests that arrive in the meantime.
//! - A fetch ticket re-plans its ranges once it starts, fetches what is still missing from the
//!   [`Origin`](crate::origin::Origin), merges it into the cached data and writes the result back
//!   into the [`CacheStore`], which may trigger eviction.
//! - Every waiting request combines the shared fetch results with its cached snapshot.
//!
//! ## Failures
//!
//! Origin failures, timeouts and panics resolve the ticket with a [`DeltaError`] that is shared
//! with every waiting request. If part of a request can still be served from the cache, the
//! request succeeds in a degraded state, with the error and the unavailable ranges attached.
//!
//! Cached objects that fail to decode are logged, deleted and treated as a miss.
//!
//! ### Metrics
//!
//! Each of these metrics is tagged with a `cache` field with the name of the cache:
//!
//! - `deltacache.access`: All requests.
//! - `deltacache.hit`: Requests served entirely from the cache.
//! - `deltacache.partial_hit`: Requests served partly from the cache.
//! - `deltacache.miss`: Requests for which nothing was cached.
//! - `deltacache.coalesced`: Requests that did not cause a fetch of their own.
//! - `deltacache.fetch`: Origin fetches.
//! - `deltacache.fetch.error`: Failed origin fetches, tagged with the error `kind`.
//! - `deltacache.fetch.duration`: A timer of origin fetches.
//! - `deltacache.evictions`: Evicted objects, tagged with the eviction `method`.
//! - `deltacache.objects` and `deltacache.bytes`: Gauges of the store size.
//!
//! ### Configuration
//!
//! See [`TimeseriesCacheConfig`] for capacity, eviction, retention and timeout settings.

mod cache_error;
mod coalesce;
mod config;
mod delta;
mod engine;
mod eviction;
mod fingerprint;
mod merge;
mod object;
mod store;

pub use cache_error::{ConfigError, DeltaError};
pub use coalesce::{Coalescer, FetchOutcome, Registration, TicketChannel, TicketResult, wait};
pub use config::{PartialResults, TimeseriesCacheConfig};
pub use delta::{DeltaPlan, plan};
pub use engine::{CacheStats, CacheStatus, DeltaProxyCache, Resolved};
pub use eviction::{
    EvictionMethod, EvictionRecord, Usage, Watermark, Watermarks, select_victims,
};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use merge::{Coverage, cacheable_bound};
pub use object::CacheObject;
pub use store::CacheStore;
