use std::time::Duration;

use serde::Deserialize;

use super::cache_error::ConfigError;
use super::eviction::{EvictionMethod, Watermark, Watermarks};
use crate::utils::compression::Compression;

/// How a fetch that failed for some of the requested ranges is handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialResults {
    /// Any failed range fails the whole fetch and leaves the cache untouched.
    #[default]
    FailAll,
    /// Successfully fetched ranges are merged and served, failed ranges are reported as
    /// unavailable.
    ServePartial,
}

/// Fine-tuning of a timeseries cache.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeseriesCacheConfig {
    /// The policy that picks objects for eviction.
    ///
    /// Accepts `lru` (or `recency`), `oldest` (or `age`), as well as the numeric identifiers `0`
    /// (oldest) and `1` (lru).
    ///
    /// Defaults to `oldest`.
    pub eviction_method: EvictionMethod,

    /// Total size (in bytes) of stored payloads above which eviction starts.
    ///
    /// Set to `null` to not bound the cache by size.
    ///
    /// Defaults to `512 MiB (= 536_870_912)`.
    pub high_water_bytes: Option<u64>,

    /// Total size (in bytes) of stored payloads that eviction brings the cache down to.
    ///
    /// Defaults to `high_water_bytes`.
    pub low_water_bytes: Option<u64>,

    /// Number of stored objects above which eviction starts.
    ///
    /// Defaults to not bounding the number of objects.
    pub high_water_objects: Option<u64>,

    /// Number of stored objects that eviction brings the cache down to.
    ///
    /// Defaults to `high_water_objects`.
    pub low_water_objects: Option<u64>,

    /// Points older than this are trimmed from cached objects.
    ///
    /// Set to `null` to keep data of any age.
    ///
    /// Defaults to `7d`.
    #[serde(with = "humantime_serde")]
    pub retention_window: Option<Duration>,

    /// The maximum time to wait for the origin to answer a single fetch.
    ///
    /// Defaults to `180s`.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// The time after which a cached object expires, counting from its last update.
    ///
    /// Defaults to `6h`.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Points newer than this are served but not cached, as the origin may still backfill them.
    ///
    /// Defaults to `0s`, which caches everything.
    #[serde(with = "humantime_serde")]
    pub backfill_tolerance: Duration,

    /// The distance between two consecutive timestamps, in seconds.
    ///
    /// Extents that are at most this far apart are considered contiguous. `0` treats time as
    /// continuous.
    ///
    /// Defaults to `1`.
    pub resolution: i64,

    /// How fetches that partially failed are handled.
    ///
    /// Defaults to `fail_all`.
    pub partial_results: PartialResults,

    /// Compression of stored payloads.
    ///
    /// Defaults to `{type: none}`.
    pub compression: Compression,

    /// Names of the query parameters that carry the time range, and are thus excluded from
    /// fingerprints.
    ///
    /// Defaults to `[start, end, time, from, to]`.
    pub excluded_params: Vec<String>,
}

impl Default for TimeseriesCacheConfig {
    fn default() -> Self {
        let meg = 1024 * 1024;
        Self {
            eviction_method: EvictionMethod::Oldest,
            high_water_bytes: Some(512 * meg),
            low_water_bytes: None,
            high_water_objects: None,
            low_water_objects: None,
            retention_window: Some(Duration::from_secs(7 * 24 * 3600)),
            fetch_timeout: Duration::from_secs(180),
            ttl: Some(Duration::from_secs(6 * 3600)),
            backfill_tolerance: Duration::ZERO,
            resolution: 1,
            partial_results: PartialResults::FailAll,
            compression: Compression::None,
            excluded_params: ["start", "end", "time", "from", "to"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl TimeseriesCacheConfig {
    /// Checks the configuration for consistency and returns the resulting capacity bounds.
    pub fn validate(&self) -> Result<Watermarks, ConfigError> {
        if self.resolution < 0 {
            return Err(ConfigError::InvalidResolution(self.resolution));
        }
        Ok(Watermarks {
            bytes: Watermark::new("bytes", self.high_water_bytes, self.low_water_bytes)?,
            objects: Watermark::new("objects", self.high_water_objects, self.low_water_objects)?,
        })
    }
}
