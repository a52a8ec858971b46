//! Allele-discovery catalog: per-allele observation statistics and their merge.
//!
//! Catalogs are built independently per chunk or per source and folded
//! together with [`merge_discovered_alleles`], which is associative and
//! commutative (but not idempotent: merging the same source twice
//! double-counts).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::range::Range;

/// Default number of top quality scores retained per allele.
pub const TOP_QUALITY_CAPACITY: usize = 10;

/// Number of genotype-quality buckets (width 10; the last one collects GQ >= 90).
pub const GQ_BANDS: usize = 10;

/// Copy numbers tracked by the zygosity histogram (heterozygous, homozygous).
pub const MAX_COPY_NUMBER: usize = 2;

/// Map a genotype quality onto its histogram bucket.
#[inline]
pub fn gq_band(gq: u32) -> usize {
    ((gq / 10) as usize).min(GQ_BANDS - 1)
}

/// An allele: a specific sequence observed at a range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Allele {
    pub range: Range,
    pub dna: String,
}

impl Allele {
    pub fn new(range: Range, dna: impl Into<String>) -> Self {
        Self {
            range,
            dna: dna.into(),
        }
    }
}

/// The K highest quality scores seen, in descending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopQuality {
    capacity: usize,
    scores: Vec<u32>,
}

impl Default for TopQuality {
    fn default() -> Self {
        Self::with_capacity(TOP_QUALITY_CAPACITY)
    }
}

impl TopQuality {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            scores: Vec::with_capacity(capacity.min(TOP_QUALITY_CAPACITY)),
        }
    }

    /// Build from arbitrary scores, keeping the top `capacity`.
    pub fn from_scores(capacity: usize, scores: impl IntoIterator<Item = u32>) -> Self {
        let mut top = Self::with_capacity(capacity);
        for score in scores {
            top.insert(score);
        }
        top
    }

    /// Insert a score, evicting the minimum when full.
    pub fn insert(&mut self, score: u32) {
        if self.capacity == 0 {
            return;
        }
        if self.scores.len() == self.capacity {
            match self.scores.last() {
                Some(&min) if score > min => {
                    self.scores.pop();
                }
                _ => return,
            }
        }
        let pos = self.scores.partition_point(|&s| s >= score);
        self.scores.insert(pos, score);
    }

    /// Union with another list, truncated to the smaller capacity.
    pub fn merge(&mut self, other: &TopQuality) {
        self.capacity = self.capacity.min(other.capacity);
        self.scores.truncate(self.capacity);
        for &score in &other.scores {
            self.insert(score);
        }
    }

    pub fn scores(&self) -> &[u32] {
        &self.scores
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest score seen, if any.
    pub fn best(&self) -> Option<u32> {
        self.scores.first().copied()
    }
}

/// Histogram of samples by copy number and genotype-quality bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZygosityByQuality {
    counts: [[u64; GQ_BANDS]; MAX_COPY_NUMBER],
}

impl ZygosityByQuality {
    pub fn from_counts(counts: [[u64; GQ_BANDS]; MAX_COPY_NUMBER]) -> Self {
        Self { counts }
    }

    /// Record one sample carrying `copy_number` copies at genotype quality `gq`.
    /// Copy numbers outside 1..=2 are ignored.
    pub fn add(&mut self, copy_number: usize, gq: u32) {
        if (1..=MAX_COPY_NUMBER).contains(&copy_number) {
            self.counts[copy_number - 1][gq_band(gq)] += 1;
        }
    }

    /// Count for a copy number (1 or 2) and bucket.
    pub fn get(&self, copy_number: usize, band: usize) -> u64 {
        if (1..=MAX_COPY_NUMBER).contains(&copy_number) && band < GQ_BANDS {
            self.counts[copy_number - 1][band]
        } else {
            0
        }
    }

    pub fn counts(&self) -> &[[u64; GQ_BANDS]; MAX_COPY_NUMBER] {
        &self.counts
    }

    /// Element-wise sum.
    pub fn merge(&mut self, other: &ZygosityByQuality) {
        for (row, other_row) in self.counts.iter_mut().zip(other.counts.iter()) {
            for (cell, other_cell) in row.iter_mut().zip(other_row.iter()) {
                *cell += other_cell;
            }
        }
    }

    /// Number of samples carrying the allele.
    pub fn samples(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Number of allele copies across all samples.
    pub fn copies(&self) -> u64 {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, row)| (i as u64 + 1) * row.iter().sum::<u64>())
            .sum()
    }
}

/// Observation statistics for one discovered allele.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAlleleInfo {
    pub is_ref: bool,
    pub all_filtered: bool,
    pub top_quality: TopQuality,
    pub zygosity_by_gq: ZygosityByQuality,
}

impl Default for DiscoveredAlleleInfo {
    fn default() -> Self {
        Self {
            is_ref: false,
            all_filtered: true,
            top_quality: TopQuality::default(),
            zygosity_by_gq: ZygosityByQuality::default(),
        }
    }
}

impl DiscoveredAlleleInfo {
    /// A fresh record for an allele with no observations yet.
    pub fn new(is_ref: bool, filtered: bool) -> Self {
        Self {
            is_ref,
            all_filtered: filtered,
            ..Default::default()
        }
    }

    /// Combine field-wise with another observation of the same allele.
    pub fn merge(&mut self, other: &DiscoveredAlleleInfo) {
        self.is_ref &= other.is_ref;
        self.all_filtered &= other.all_filtered;
        self.top_quality.merge(&other.top_quality);
        self.zygosity_by_gq.merge(&other.zygosity_by_gq);
    }
}

/// The catalog. Ordered so iteration (and everything built from it) is deterministic.
pub type DiscoveredAlleles = BTreeMap<Allele, DiscoveredAlleleInfo>;

/// Fold `source` into `destination`, consuming the source.
pub fn merge_discovered_alleles(source: DiscoveredAlleles, destination: &mut DiscoveredAlleles) {
    if destination.is_empty() {
        *destination = source;
        return;
    }
    for (allele, info) in source {
        match destination.get_mut(&allele) {
            Some(existing) => existing.merge(&info),
            None => {
                destination.insert(allele, info);
            }
        }
    }
}

/// Add one observation to a catalog under construction.
pub fn observe(
    catalog: &mut DiscoveredAlleles,
    allele: Allele,
    is_ref: bool,
    filtered: bool,
    quality: Option<u32>,
    copies: Option<(usize, u32)>,
) {
    let info = catalog
        .entry(allele)
        .or_insert_with(|| DiscoveredAlleleInfo::new(is_ref, filtered));
    info.is_ref &= is_ref;
    info.all_filtered &= filtered;
    if let Some(q) = quality {
        info.top_quality.insert(q);
    }
    if let Some((copy_number, gq)) = copies {
        info.zygosity_by_gq.add(copy_number, gq);
    }
}

/// Collapse overlapping allele ranges into disjoint windows.
///
/// Sweep-line union over the catalog's (already sorted) ranges; ranges that
/// only touch stay in separate windows.
pub fn discover_windows(catalog: &DiscoveredAlleles) -> Vec<Range> {
    let mut ranges: Vec<Range> = catalog.keys().map(|a| a.range).collect();
    ranges.dedup();
    // Keys sort by range first, so `ranges` is already ordered.

    let mut windows: Vec<Range> = Vec::new();
    for range in ranges {
        match windows.last_mut() {
            Some(current) if current.rid == range.rid && range.beg < current.end => {
                current.end = current.end.max(range.end);
            }
            _ => windows.push(range),
        }
    }
    windows
}
