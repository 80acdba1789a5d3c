//! Timestamped data points and the codecs that translate them to and from opaque payloads.
//!
//! The caching engine never looks into payloads directly. It only needs to split a payload into
//! [`DataPoint`]s for merging, and to encode the merged points again. This is what a
//! [`SeriesCodec`] provides, which keeps the engine independent of the concrete wire format of a
//! backend.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extents::{ExtentList, Timestamp};

/// A single value of a single series at a point in time.
///
/// Points are identified by `(series, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// An opaque label identifying the series this point belongs to, e.g. a label set.
    pub series: Arc<str>,
    pub timestamp: Timestamp,
    pub value: f64,
}

impl DataPoint {
    pub fn new(series: impl Into<Arc<str>>, timestamp: Timestamp, value: f64) -> Self {
        Self {
            series: series.into(),
            timestamp,
            value,
        }
    }

    fn same_identity(&self, other: &DataPoint) -> bool {
        self.timestamp == other.timestamp && self.series == other.series
    }
}

/// An error decoding or encoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{codec} codec: {message}")]
pub struct CodecError {
    pub codec: &'static str,
    pub message: String,
}

/// Translates opaque payloads to and from [`DataPoint`]s.
pub trait SeriesCodec: fmt::Debug + Send + Sync + 'static {
    /// A short name of the codec, used in errors and metrics.
    fn name(&self) -> &'static str;

    /// Splits a payload into its data points.
    fn decode(&self, payload: &[u8]) -> Result<Vec<DataPoint>, CodecError>;

    /// Encodes data points into a payload.
    fn encode(&self, points: &[DataPoint]) -> Result<Bytes, CodecError>;
}

/// A codec storing points as a JSON array of `{series, timestamp, value}` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn error(&self, err: serde_json::Error) -> CodecError {
        CodecError {
            codec: self.name(),
            message: err.to_string(),
        }
    }
}

impl SeriesCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<DataPoint>, CodecError> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(payload).map_err(|e| self.error(e))
    }

    fn encode(&self, points: &[DataPoint]) -> Result<Bytes, CodecError> {
        serde_json::to_vec(points)
            .map(Bytes::from)
            .map_err(|e| self.error(e))
    }
}

/// Merges freshly fetched points into previously cached ones.
///
/// The result is ordered by timestamp, then series. When both inputs contain a point with the same
/// identity, the fetched one wins.
pub fn merge_points(cached: Vec<DataPoint>, fetched: Vec<DataPoint>) -> Vec<DataPoint> {
    let mut all = cached;
    all.extend(fetched);
    // `sort_by` is stable, so for equal identities the fetched point stays behind the cached one.
    all.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.series.cmp(&b.series))
    });

    let mut merged: Vec<DataPoint> = Vec::with_capacity(all.len());
    for point in all {
        match merged.last_mut() {
            Some(last) if last.same_identity(&point) => *last = point,
            _ => merged.push(point),
        }
    }
    merged
}

/// Keeps only the points covered by `extents`.
pub fn retain_covered(points: &mut Vec<DataPoint>, extents: &ExtentList) {
    points.retain(|p| extents.contains(p.timestamp));
}
