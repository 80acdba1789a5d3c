//! Time ranges and canonical lists of time ranges.
//!
//! An [`Extent`] is a closed `[start, end]` range of timestamps. An [`ExtentList`] is the canonical
//! form of a set of extents: sorted ascending, with no two extents overlapping or touching.
//!
//! All operations that need to know whether two extents are "contiguous" take a `resolution`,
//! which is the smallest step between two distinct timestamps of a series. Two extents separated
//! by no more than `resolution` are contiguous, and the gap between them is empty. A resolution of
//! `0` means time is treated as continuous: only overlapping or exactly abutting extents are
//! contiguous, and gaps are reported including their bounding timestamps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A timestamp in Unix epoch seconds.
pub type Timestamp = i64;

/// A closed time range, `start` and `end` both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Extent {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Extent {
    /// Creates a new extent, swapping the bounds if they are given in the wrong order.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Whether `ts` lies within this extent.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Whether `other` lies completely within this extent.
    pub fn encloses(&self, other: &Extent) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The overlapping part of both extents, if any.
    pub fn intersect(&self, other: &Extent) -> Option<Extent> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Extent { start, end })
    }

    /// Whether the two extents overlap, or are separated by no more than `resolution`.
    fn is_contiguous_with(&self, next: &Extent, resolution: i64) -> bool {
        next.start <= self.end.saturating_add(resolution)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

/// A canonical, sorted list of non-overlapping, non-touching [`Extent`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtentList(Vec<Extent>);

impl ExtentList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a list containing a single extent.
    pub fn single(extent: Extent) -> Self {
        Self(vec![extent])
    }

    /// Builds a canonical list out of arbitrary extents.
    ///
    /// Extents closer to each other than `resolution` are merged.
    pub fn from_extents<I>(extents: I, resolution: i64) -> Self
    where
        I: IntoIterator<Item = Extent>,
    {
        let mut extents: Vec<_> = extents.into_iter().collect();
        extents.sort_unstable();

        let mut canonical: Vec<Extent> = Vec::with_capacity(extents.len());
        for extent in extents {
            match canonical.last_mut() {
                Some(last) if last.is_contiguous_with(&extent, resolution.max(0)) => {
                    last.end = last.end.max(extent.end);
                }
                _ => canonical.push(extent),
            }
        }
        Self(canonical)
    }

    /// Number of extents in this list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extent> {
        self.0.iter()
    }

    /// The smallest extent enclosing every extent of this list.
    pub fn outer(&self) -> Option<Extent> {
        let first = self.0.first()?;
        let last = self.0.last()?;
        Some(Extent::new(first.start, last.end))
    }

    /// Whether `ts` is covered by any extent of this list.
    pub fn contains(&self, ts: Timestamp) -> bool {
        // `partition_point` finds the first extent that starts after `ts`; only its predecessor
        // can contain `ts`.
        let idx = self.0.partition_point(|e| e.start <= ts);
        idx > 0 && self.0[idx - 1].contains(ts)
    }

    /// Whether all of `extent` is covered by a single extent of this list.
    pub fn covers(&self, extent: Extent) -> bool {
        let idx = self.0.partition_point(|e| e.start <= extent.start);
        idx > 0 && self.0[idx - 1].encloses(&extent)
    }

    /// Combines both lists into a new canonical list.
    ///
    /// This is idempotent and independent of the order of its inputs.
    pub fn merge(&self, other: &ExtentList, resolution: i64) -> ExtentList {
        Self::from_extents(self.0.iter().chain(other.0.iter()).copied(), resolution)
    }

    /// Computes the parts of `requested` that are not covered by this list.
    ///
    /// The result is a canonical list of disjoint gaps in ascending order. If this list is empty,
    /// the result is `requested` itself.
    ///
    /// With a non-zero `resolution`, gaps start one resolution step after the preceding covered
    /// extent and end one step before the following one. With a `resolution` of `0`, gaps include
    /// the covered boundary timestamps, i.e. `{[0,5],[10,15]}` has the gap `[5,10]` inside
    /// `[0,15]`.
    pub fn gaps(&self, requested: Extent, resolution: i64) -> ExtentList {
        let resolution = resolution.max(0);
        let mut gaps = Vec::new();
        let mut cursor = requested.start;

        for extent in &self.0 {
            if extent.end < requested.start {
                continue;
            }
            if extent.start > requested.end {
                break;
            }
            if extent.start > cursor {
                let gap_end = extent.start.saturating_sub(resolution);
                if gap_end >= cursor {
                    gaps.push(Extent::new(cursor, gap_end));
                }
            }
            if extent.end >= requested.end {
                return Self::from_extents(gaps, resolution);
            }
            cursor = cursor.max(extent.end.saturating_add(resolution));
        }

        if cursor <= requested.end {
            gaps.push(Extent::new(cursor, requested.end));
        }
        // With continuous time, gaps around a single-timestamp extent touch each other.
        Self::from_extents(gaps, resolution)
    }

    /// Restricts all extents to within `bound`, dropping or truncating the ones outside of it.
    pub fn crop(&self, bound: Extent) -> ExtentList {
        ExtentList(self.0.iter().filter_map(|e| e.intersect(&bound)).collect())
    }

    /// Removes everything covered by `other` from this list.
    pub fn subtract(&self, other: &ExtentList, resolution: i64) -> ExtentList {
        let remaining = self.0.iter().flat_map(|e| other.gaps(*e, resolution).0);
        Self::from_extents(remaining, resolution)
    }

    /// The parts covered by both lists.
    pub fn intersection(&self, other: &ExtentList) -> ExtentList {
        let common = self
            .0
            .iter()
            .flat_map(|a| other.0.iter().filter_map(move |b| a.intersect(b)));
        ExtentList(common.collect())
    }

    /// Whether every extent in this list is fully covered by `other`.
    pub fn is_subset_of(&self, other: &ExtentList, resolution: i64) -> bool {
        self.0
            .iter()
            .all(|e| other.gaps(*e, resolution).is_empty())
    }

    /// Whether any part of the two lists overlap.
    pub fn overlaps(&self, other: &ExtentList) -> bool {
        self.0
            .iter()
            .any(|a| other.0.iter().any(|b| a.intersect(b).is_some()))
    }
}

impl From<Extent> for ExtentList {
    fn from(extent: Extent) -> Self {
        Self::single(extent)
    }
}

impl<'a> IntoIterator for &'a ExtentList {
    type Item = &'a Extent;
    type IntoIter = std::slice::Iter<'a, Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ExtentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, extent) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{extent}")?;
        }
        f.write_str("}")
    }
}
