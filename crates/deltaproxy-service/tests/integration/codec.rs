use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use deltaproxy_service::caching::{CacheStatus, DeltaError, DeltaProxyCache, TimeseriesCacheConfig};
use deltaproxy_service::extents::{Extent, ExtentList};
use deltaproxy_service::origin::OriginResponse;
use deltaproxy_service::series::{CodecError, DataPoint, SeriesCodec};
use deltaproxy_service::utils::compression::Compression;

use crate::{TestOrigin, query};

/// Stores points as tab separated `series`, `timestamp` and `value` lines.
#[derive(Debug)]
struct LineCodec;

impl LineCodec {
    fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError {
            codec: self.name(),
            message: message.into(),
        }
    }
}

impl SeriesCodec for LineCodec {
    fn name(&self) -> &'static str {
        "lines"
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<DataPoint>, CodecError> {
        let payload = std::str::from_utf8(payload).map_err(|e| self.error(e.to_string()))?;
        payload
            .lines()
            .map(|line| {
                let mut fields = line.split('\t');
                let (Some(series), Some(ts), Some(value), None) =
                    (fields.next(), fields.next(), fields.next(), fields.next())
                else {
                    return Err(self.error(format!("malformed line: {line:?}")));
                };
                let ts = ts.parse().map_err(|_| self.error("invalid timestamp"))?;
                let value = value.parse().map_err(|_| self.error("invalid value"))?;
                Ok(DataPoint::new(series, ts, value))
            })
            .collect()
    }

    fn encode(&self, points: &[DataPoint]) -> Result<Bytes, CodecError> {
        let mut out = String::new();
        for point in points {
            writeln!(out, "{}\t{}\t{}", point.series, point.timestamp, point.value)
                .map_err(|e| self.error(e.to_string()))?;
        }
        Ok(out.into())
    }
}

fn line_cache(compression: Compression) -> DeltaProxyCache {
    deltaproxy_test::setup();
    let config = TimeseriesCacheConfig {
        retention_window: None,
        compression,
        ..Default::default()
    };
    DeltaProxyCache::new("lines", config, Arc::new(LineCodec)).unwrap()
}

#[tokio::test]
async fn test_custom_codec() {
    let cache = line_cache(Compression::Zstd { level: 1 });
    let fp = query(&cache, "up");
    let origin = TestOrigin::new(Arc::new(LineCodec), 10, Duration::ZERO);

    let miss = cache
        .resolve(&fp, Extent::new(0, 100), origin.clone().into_origin())
        .await
        .unwrap();
    assert_eq!(miss.status, CacheStatus::Miss);

    let partial = cache
        .resolve(&fp, Extent::new(50, 150), origin.clone().into_origin())
        .await
        .unwrap();
    assert_eq!(partial.status, CacheStatus::PartialHit);

    let points = LineCodec.decode(&partial.payload).unwrap();
    assert_eq!(points.len(), 11 * 2);
    assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(&*points[0].series, "instance=\"a\"");
    assert_eq!(points[1].value, -50.0);

    assert_eq!(origin.fetches.accesses(), 2);
}

#[tokio::test]
async fn test_malformed_origin_payload() {
    let cache = line_cache(Compression::None);
    let fp = query(&cache, "up");
    let origin = Arc::new(|_gaps: ExtentList| async {
        Ok::<_, DeltaError>(OriginResponse::complete("not\ta\tpoint\tat all"))
    });

    let err = cache
        .resolve(&fp, Extent::new(0, 100), origin)
        .await
        .unwrap_err();
    assert!(matches!(err, DeltaError::Codec(_)));
    assert!(cache.store().is_empty());
    assert_eq!(cache.stats().fetch_errors, 1);
}
