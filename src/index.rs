//! Disjoint range index for fast "which region holds this position" queries.

use crate::error::{Error, Result};
use crate::range::Range;

/// A sorted collection of pairwise-disjoint ranges.
/// Uses binary search over the sort order for O(log n) lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeIndex {
    ranges: Vec<Range>,
}

impl RangeIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Build an index from ranges in any order.
    ///
    /// Fails if two ranges overlap. A zero-length range lying strictly
    /// inside another also fails, since it would break the end ordering
    /// the lookup depends on.
    pub fn from_ranges(mut ranges: Vec<Range>) -> Result<Self> {
        ranges.sort_unstable();
        ranges.dedup();

        for pair in ranges.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.rid == next.rid && next.beg < prev.end {
                return Err(Error::InvalidInput(format!(
                    "Ranges {} and {} overlap",
                    prev, next
                )));
            }
        }

        Ok(Self { ranges })
    }

    /// Build an index over the union of possibly overlapping ranges, as
    /// needed for user-supplied region lists.
    pub fn from_union(mut ranges: Vec<Range>) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.rid == range.rid && range.beg < last.end => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        merged.dedup();
        Self { ranges: merged }
    }

    /// Position of the first stored range that could overlap `query`.
    #[inline]
    fn lower_bound(&self, query: &Range) -> usize {
        self.ranges
            .partition_point(|r| (r.rid, r.end) <= (query.rid, query.beg))
    }

    /// Find the stored range overlapping `query`, if any.
    ///
    /// Partial overlap from either side matches. When the query spans
    /// several stored ranges the leftmost one is returned.
    pub fn find_overlap(&self, query: &Range) -> Option<&Range> {
        self.ranges
            .get(self.lower_bound(query))
            .filter(|r| r.overlaps(query))
    }

    /// Like [`find_overlap`](Self::find_overlap), with a `NotFound` error.
    pub fn locate(&self, query: &Range) -> Result<Range> {
        self.find_overlap(query)
            .copied()
            .ok_or_else(|| Error::NotFound(query.to_string()))
    }

    /// Find every stored range overlapping `query`.
    pub fn find_overlaps(&self, query: &Range) -> Vec<&Range> {
        self.ranges[self.lower_bound(query)..]
            .iter()
            .take_while(|r| r.rid == query.rid && r.beg < query.end.max(query.beg + 1))
            .filter(|r| r.overlaps(query))
            .collect()
    }

    /// Check if any stored range overlaps the query.
    #[inline]
    pub fn has_overlap(&self, query: &Range) -> bool {
        self.find_overlap(query).is_some()
    }

    /// Get all ranges, sorted.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
