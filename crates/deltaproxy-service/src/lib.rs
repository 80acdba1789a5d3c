//! A delta proxy cache for time-series range queries.
//!
//! The [`DeltaProxyCache`](caching::DeltaProxyCache) answers range queries from cached data where
//! possible, and only fetches the missing time ranges from an [`Origin`](origin::Origin).

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod extents;
pub mod logging;
pub mod origin;
pub mod series;
pub mod utils;
