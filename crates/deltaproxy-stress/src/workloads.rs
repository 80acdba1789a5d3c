use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};

use deltaproxy_service::caching::{CacheStatus, DeltaError, DeltaProxyCache, Fingerprint};
use deltaproxy_service::extents::{Extent, ExtentList, Timestamp};
use deltaproxy_service::origin::{Origin, OriginResponse};
use deltaproxy_service::series::{DataPoint, JsonCodec, SeriesCodec};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).context("failed to open workloads file")?;
        serde_yaml::from_reader(file).context("failed to parse workloads YAML")
    }
}

/// A group of dashboards polling the same set of queries.
#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Number of distinct queries the requests are spread over.
    pub queries: usize,
    /// Width of the time range of each request.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// The distance between two data points of a series.
    #[serde(with = "humantime_serde", default = "default_step")]
    pub step: Duration,
    /// Number of series in each query result.
    #[serde(default = "default_series")]
    pub series: usize,
    #[serde(default)]
    pub origin: OriginConfig,
}

fn default_step() -> Duration {
    Duration::from_secs(15)
}

fn default_series() -> usize {
    1
}

/// Behavior of the synthetic origin.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// The time the origin takes to answer a fetch.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// The probability of a fetch failing, between `0` and `1`.
    pub failure_rate: f64,
}

/// An origin that makes up data points for any requested range.
#[derive(Debug)]
pub struct SyntheticOrigin {
    step: Timestamp,
    series: Vec<Arc<str>>,
    config: OriginConfig,
}

impl SyntheticOrigin {
    pub fn new(step: Duration, series: usize, config: OriginConfig) -> Self {
        Self {
            step: (step.as_secs() as Timestamp).max(1),
            series: (0..series.max(1))
                .map(|i| Arc::from(format!("instance=\"node-{i}\"")))
                .collect(),
            config,
        }
    }

    fn generate(&self, gaps: &ExtentList) -> Result<Bytes, DeltaError> {
        let mut points = Vec::new();
        for extent in gaps {
            let first = extent.start.div_euclid(self.step) * self.step;
            let mut ts = if first < extent.start {
                first + self.step
            } else {
                first
            };
            while ts <= extent.end {
                for series in &self.series {
                    let value = (ts as f64 / 3600.0).sin();
                    points.push(DataPoint::new(Arc::clone(series), ts, value));
                }
                ts += self.step;
            }
        }
        Ok(JsonCodec.encode(&points)?)
    }
}

impl Origin for SyntheticOrigin {
    fn fetch(&self, gaps: ExtentList) -> BoxFuture<'static, Result<OriginResponse, DeltaError>> {
        let latency = self.config.latency;
        let failed = rand::rng().random_bool(self.config.failure_rate.clamp(0.0, 1.0));
        let response = self
            .generate(&gaps)
            .map(|payload| OriginResponse::covering(payload, gaps));

        async move {
            tokio::time::sleep(latency).await;
            if failed {
                return Err(DeltaError::FetchFailed("synthetic failure".into()));
            }
            response
        }
        .boxed()
    }
}

/// A workload ready to be run against a cache.
pub struct PreparedWorkload {
    fingerprints: Vec<Fingerprint>,
    window: Timestamp,
    step: Timestamp,
    origin: Arc<dyn Origin>,
}

pub fn prepare_workload(
    cache: &DeltaProxyCache,
    index: usize,
    workload: Workload,
) -> PreparedWorkload {
    let fingerprints = (0..workload.queries.max(1))
        .map(|query| {
            let expr = format!("rate(requests_total{{workload=\"{index}\"}}[{query}m])");
            cache
                .fingerprint("synthetic")
                .path("/api/v1/query_range")
                .param("query", &expr)
                .build()
        })
        .collect();

    let origin = SyntheticOrigin::new(workload.step, workload.series, workload.origin);
    PreparedWorkload {
        fingerprints,
        window: workload.window.as_secs() as Timestamp,
        step: origin.step,
        origin: Arc::new(origin),
    }
}

/// Requests the trailing window of a random query of the workload, like a refreshing dashboard.
pub async fn process_workload(
    cache: &DeltaProxyCache,
    workload: &PreparedWorkload,
) -> Result<CacheStatus, DeltaError> {
    let (fingerprint, end) = {
        let mut rng = rand::rng();
        let index = rng.random_range(0..workload.fingerprints.len());
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as Timestamp);
        (&workload.fingerprints[index], now - now % workload.step)
    };

    let requested = Extent::new(end - workload.window, end);
    let resolved = cache
        .resolve(fingerprint, requested, Arc::clone(&workload.origin))
        .await?;
    Ok(resolved.status)
}
