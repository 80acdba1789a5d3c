use std::sync::Arc;
use std::time::Duration;

use deltaproxy_service::caching::{DeltaProxyCache, EvictionMethod, PartialResults};
use deltaproxy_service::config::{Config, LogFormat};
use deltaproxy_service::series::JsonCodec;
use deltaproxy_service::utils::compression::Compression;

use crate::fixture;

#[test]
fn test_config_fixture() {
    let config = Config::get(Some(&fixture("config.yml"))).unwrap();
    assert_eq!(config.logging.format, LogFormat::Simplified);

    let cache = &config.cache;
    assert_eq!(cache.eviction_method, EvictionMethod::Lru);
    assert_eq!(cache.high_water_bytes, Some(64 * 1024 * 1024));
    assert_eq!(cache.low_water_objects, None);
    assert_eq!(cache.retention_window, Some(Duration::from_secs(2 * 24 * 3600)));
    assert_eq!(cache.backfill_tolerance, Duration::from_secs(60));
    assert_eq!(cache.resolution, 15);
    assert_eq!(cache.partial_results, PartialResults::ServePartial);
    assert_eq!(cache.compression, Compression::Zstd { level: 3 });
    assert_eq!(cache.excluded_params, vec!["start", "end", "time", "from", "to"]);

    let cache = DeltaProxyCache::new("fixture", config.cache, Arc::new(JsonCodec)).unwrap();
    assert_eq!(cache.name(), "fixture");
}

#[test]
fn test_fingerprint_excludes_time_params() {
    let config = Config::get(Some(&fixture("config.yml"))).unwrap();
    let cache = DeltaProxyCache::new("fixture", config.cache, Arc::new(JsonCodec)).unwrap();

    let fingerprint = |start: &str, end: &str| {
        cache
            .fingerprint("prometheus")
            .path("/api/v1/query_range")
            .params([("query", "up"), ("start", start), ("end", end), ("step", "15")])
            .build()
    };
    assert_eq!(fingerprint("0", "3600"), fingerprint("60", "3660"));

    let other_step = cache
        .fingerprint("prometheus")
        .path("/api/v1/query_range")
        .params([("query", "up"), ("step", "30")])
        .build();
    assert_ne!(fingerprint("0", "3600"), other_step);
}
