//! Core range type for genomic coordinates.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A genomic range on a numbered contig.
/// Uses 0-based, half-open coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub rid: u32,
    pub beg: u64,
    pub end: u64,
}

impl Range {
    /// Create a new range.
    #[inline]
    pub fn new(rid: u32, beg: u64, end: u64) -> Self {
        Self { rid, beg, end }
    }

    /// Returns the length of the range.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.beg)
    }

    /// Returns true if the range has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.beg >= self.end
    }

    /// Check if this range overlaps with another.
    #[inline]
    pub fn overlaps(&self, other: &Range) -> bool {
        self.rid == other.rid && self.beg < other.end && other.beg < self.end
    }

    /// Check if this range fully contains another.
    #[inline]
    pub fn contains(&self, other: &Range) -> bool {
        self.rid == other.rid && self.beg <= other.beg && other.end <= self.end
    }

    /// Smallest range covering both, or None across contigs.
    #[inline]
    pub fn hull(&self, other: &Range) -> Option<Range> {
        if self.rid != other.rid {
            return None;
        }
        Some(Range {
            rid: self.rid,
            beg: self.beg.min(other.beg),
            end: self.end.max(other.end),
        })
    }

    /// Compute the overlap length with another range.
    #[inline]
    pub fn overlap_length(&self, other: &Range) -> u64 {
        if !self.overlaps(other) {
            return 0;
        }
        self.end.min(other.end) - self.beg.max(other.beg)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.rid, self.beg, self.end)
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rid
            .cmp(&other.rid)
            .then(self.beg.cmp(&other.beg))
            .then(self.end.cmp(&other.end))
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_overlap() {
        let a = Range::new(0, 100, 200);
        let b = Range::new(0, 150, 250);
        let c = Range::new(0, 200, 300);
        let d = Range::new(1, 100, 200);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent
        assert!(!a.overlaps(&d)); // different contig
    }

    #[test]
    fn test_zero_length_overlap() {
        let point = Range::new(0, 150, 150);
        assert!(point.overlaps(&Range::new(0, 100, 200)));
        assert!(!point.overlaps(&Range::new(0, 150, 151)));
        assert!(!point.overlaps(&point));
    }

    #[test]
    fn test_range_hull_and_contains() {
        let a = Range::new(2, 10, 20);
        let b = Range::new(2, 15, 40);

        assert_eq!(a.hull(&b), Some(Range::new(2, 10, 40)));
        assert_eq!(a.hull(&Range::new(3, 0, 1)), None);
        assert!(Range::new(2, 10, 40).contains(&a));
        assert!(!a.contains(&b));
        assert_eq!(a.overlap_length(&b), 5);
    }

    #[test]
    fn test_range_ordering() {
        let mut ranges = [
            Range::new(1, 100, 200),
            Range::new(0, 200, 300),
            Range::new(0, 100, 250),
            Range::new(0, 100, 200),
        ];
        ranges.sort();

        assert_eq!(ranges[0], Range::new(0, 100, 200));
        assert_eq!(ranges[1], Range::new(0, 100, 250));
        assert_eq!(ranges[2], Range::new(0, 200, 300));
        assert_eq!(ranges[3].rid, 1);
    }
}
