//! Merging fetched data into cached data, and cutting out what is written back and served.

use std::time::Duration;

use crate::extents::{Extent, ExtentList, Timestamp};
use crate::series::{DataPoint, merge_points, retain_covered};

/// Data points together with the exact time ranges they cover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coverage {
    pub extents: ExtentList,
    pub points: Vec<DataPoint>,
}

impl Coverage {
    pub fn new(extents: ExtentList, mut points: Vec<DataPoint>) -> Self {
        retain_covered(&mut points, &extents);
        Self { extents, points }
    }

    /// Merges `fetched` into this coverage, with fetched points replacing cached ones.
    pub fn merge(self, fetched: Coverage, resolution: i64) -> Coverage {
        Coverage {
            extents: self.extents.merge(&fetched.extents, resolution),
            points: merge_points(self.points, fetched.points),
        }
    }

    /// Restricts the coverage to the ranges within `bound`.
    pub fn crop(&self, bound: Extent) -> Coverage {
        let extents = self.extents.crop(bound);
        let mut points = self.points.clone();
        retain_covered(&mut points, &extents);
        Coverage { extents, points }
    }

    /// Restricts the coverage to the ranges within `other`.
    pub fn restrict(&self, other: &ExtentList) -> Coverage {
        let extents = self.extents.intersection(other);
        let mut points = self.points.clone();
        retain_covered(&mut points, &extents);
        Coverage { extents, points }
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }
}

/// The range of timestamps that may be written to the cache at `now`.
///
/// Data older than the retention window is dropped, and data within the backfill tolerance is
/// too recent to be considered final. Returns `None` if nothing may be cached.
pub fn cacheable_bound(
    now: Timestamp,
    retention_window: Option<Duration>,
    backfill_tolerance: Duration,
) -> Option<Extent> {
    let start = match retention_window {
        Some(window) => now.saturating_sub(secs(window)),
        None => Timestamp::MIN,
    };
    let end = if backfill_tolerance.is_zero() {
        Timestamp::MAX
    } else {
        now.saturating_sub(secs(backfill_tolerance))
    };
    (start <= end).then_some(Extent { start, end })
}

fn secs(duration: Duration) -> Timestamp {
    Timestamp::try_from(duration.as_secs()).unwrap_or(Timestamp::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(extents: &[(i64, i64)]) -> ExtentList {
        ExtentList::from_extents(extents.iter().map(|&(s, e)| Extent::new(s, e)), 5)
    }

    fn points(values: &[(i64, f64)]) -> Vec<DataPoint> {
        values
            .iter()
            .map(|&(ts, value)| DataPoint::new("up", ts, value))
            .collect()
    }

    #[test]
    fn test_merge_example() {
        let cached = Coverage::new(list(&[(10, 20)]), points(&[(10, 1.0), (15, 1.5), (20, 2.0)]));
        let fetched = Coverage::new(
            list(&[(15, 30)]),
            points(&[(15, 9.0), (20, 2.0), (25, 2.5), (30, 3.0)]),
        );

        let merged = cached.merge(fetched, 5);
        assert_eq!(merged.extents, list(&[(10, 30)]));
        assert_eq!(
            merged.points,
            points(&[(10, 1.0), (15, 9.0), (20, 2.0), (25, 2.5), (30, 3.0)])
        );
    }

    #[test]
    fn test_coverage_drops_uncovered_points() {
        let coverage = Coverage::new(list(&[(10, 20)]), points(&[(5, 0.5), (10, 1.0), (25, 2.5)]));
        assert_eq!(coverage.points, points(&[(10, 1.0)]));
    }

    #[test]
    fn test_crop_and_restrict() {
        let coverage = Coverage::new(
            list(&[(0, 20), (40, 60)]),
            points(&[(0, 0.0), (10, 1.0), (20, 2.0), (40, 4.0), (50, 5.0)]),
        );

        let cropped = coverage.crop(Extent::new(10, 45));
        assert_eq!(cropped.extents, list(&[(10, 20), (40, 45)]));
        assert_eq!(cropped.points, points(&[(10, 1.0), (20, 2.0), (40, 4.0)]));

        let restricted = coverage.restrict(&list(&[(15, 50)]));
        assert_eq!(restricted.extents, list(&[(15, 20), (40, 50)]));
        assert_eq!(restricted.points, points(&[(20, 2.0), (40, 4.0), (50, 5.0)]));
    }

    #[test]
    fn test_cacheable_bound() {
        let hour = Duration::from_secs(3600);
        assert_eq!(
            cacheable_bound(10_000, Some(hour), Duration::ZERO),
            Some(Extent::new(6_400, Timestamp::MAX))
        );
        assert_eq!(
            cacheable_bound(10_000, None, Duration::from_secs(60)),
            Some(Extent::new(Timestamp::MIN, 9_940))
        );
        assert_eq!(cacheable_bound(10_000, Some(Duration::from_secs(10)), hour), None);
    }

    #[test]
    fn test_retention_trimming() {
        let now = 1_000;
        let coverage = Coverage::new(
            list(&[(0, 1_000)]),
            (0..=10).map(|i| DataPoint::new("up", i * 100, i as f64)).collect(),
        );

        let bound = cacheable_bound(now, Some(Duration::from_secs(500)), Duration::ZERO).unwrap();
        let retained = coverage.crop(bound);
        assert_eq!(retained.extents, list(&[(500, 1_000)]));
        assert!(retained.points.iter().all(|p| p.timestamp >= 500));
        assert_eq!(retained.points.len(), 6);
    }
}
