//! Site unification: collapse the alleles discovered in one window into a
//! canonical, frequency-annotated site.
//!
//! The site spans the hull of its input alleles. Reference alleles are
//! stitched into one reference sequence over that span, and every alternate
//! is padded with flanking reference bases to the full span. Alternates that
//! pad to the same sequence are one canonical allele. Canonical alternates
//! are ranked by copy count (descending), then by sequence.
//!
//! Every input allele ends up in the site's unification list, either mapped
//! to a canonical index or dropped with a reason.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::config::UnifierConfig;
use crate::discovery::{
    discover_windows, Allele, DiscoveredAlleleInfo, DiscoveredAlleles, ZygosityByQuality,
};
use crate::error::{Error, Result};
use crate::index::RangeIndex;
use crate::range::Range;

/// A canonical allele of a unified site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedAllele {
    pub dna: String,
    /// Cohort frequency; absent for the reference unless it stands alone.
    pub frequency: Option<f64>,
}

/// Why a discovered allele did not become (part of) a canonical allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Filtered,
    LowQuality,
    LowFrequency,
    AlleleLimit,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::Filtered => "filtered",
            DropReason::LowQuality => "low_quality",
            DropReason::LowFrequency => "low_frequency",
            DropReason::AlleleLimit => "allele_limit",
        };
        f.write_str(s)
    }
}

/// Where a discovered allele went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mapping {
    Canonical(usize),
    Dropped(DropReason),
}

/// One discovered allele and its fate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnificationEntry {
    pub range: Range,
    pub dna: String,
    pub mapping: Mapping,
}

/// The canonical output for one genomic window.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedSite {
    pub range: Range,
    /// Index 0 is the reference allele.
    pub alleles: Vec<UnifiedAllele>,
    pub quality: u32,
    /// Sorted by source range, then source sequence.
    pub unification: Vec<UnificationEntry>,
}

impl UnifiedSite {
    /// Canonical index for a discovered allele, if it was kept.
    pub fn canonical_index(&self, range: &Range, dna: &str) -> Option<usize> {
        self.unification
            .iter()
            .find(|e| e.range == *range && e.dna == dna)
            .and_then(|e| match e.mapping {
                Mapping::Canonical(i) => Some(i),
                Mapping::Dropped(_) => None,
            })
    }

    /// Check the site's structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.alleles.is_empty() {
            return Err(Error::MalformedInput(format!("Site {} has no alleles", self.range)));
        }
        for entry in &self.unification {
            if let Mapping::Canonical(i) = entry.mapping {
                if i >= self.alleles.len() {
                    return Err(Error::MalformedInput(format!(
                        "Site {} maps {} {} to allele {} of {}",
                        self.range,
                        entry.range,
                        entry.dna,
                        i,
                        self.alleles.len()
                    )));
                }
            }
        }
        let sorted = self
            .unification
            .windows(2)
            .all(|w| (w[0].range, &w[0].dna) <= (w[1].range, &w[1].dna));
        if !sorted {
            return Err(Error::MalformedInput(format!(
                "Site {} unification is not sorted",
                self.range
            )));
        }
        Ok(())
    }
}

/// Alternates sharing one padded sequence.
#[derive(Default)]
struct Cluster {
    members: Vec<usize>,
    zygosity: ZygosityByQuality,
    best_quality: u32,
}

/// Unify the alleles discovered in `window`.
///
/// `cohort_size` is the number of samples the catalog was discovered from;
/// no allele or canonical cluster may claim more samples or copies than it
/// provides.
pub fn unify_window(
    window: &Range,
    alleles: &[(Allele, DiscoveredAlleleInfo)],
    cohort_size: u64,
    config: &UnifierConfig,
) -> Result<UnifiedSite> {
    if cohort_size == 0 {
        return Err(Error::InconsistentCatalog("cohort size is zero".to_string()));
    }
    if alleles.is_empty() {
        return Err(Error::MalformedInput(format!("No alleles in window {}", window)));
    }
    let max_copies = 2 * cohort_size;

    let mut inputs: Vec<&(Allele, DiscoveredAlleleInfo)> = alleles.iter().collect();
    inputs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut site_range = inputs[0].0.range;
    for (allele, info) in &inputs {
        if !allele.range.overlaps(window) {
            return Err(Error::MalformedInput(format!(
                "Allele {} {} does not overlap window {}",
                allele.range, allele.dna, window
            )));
        }
        if !allele.dna.is_ascii() {
            return Err(Error::MalformedInput(format!(
                "Allele {} has a non-ASCII sequence",
                allele.range
            )));
        }
        let (samples, copies) = (info.zygosity_by_gq.samples(), info.zygosity_by_gq.copies());
        if samples > cohort_size || copies > max_copies {
            return Err(Error::InconsistentCatalog(format!(
                "Allele {} {} has {} samples / {} copies in a cohort of {}",
                allele.range, allele.dna, samples, copies, cohort_size
            )));
        }
        // Overlap with the window implies the same contig.
        site_range = site_range.hull(&allele.range).unwrap_or(site_range);
    }

    let reference = stitch_reference(&site_range, &inputs)?;

    let mut mappings: Vec<Option<Mapping>> = vec![None; inputs.len()];
    let mut clusters: BTreeMap<Vec<u8>, Cluster> = BTreeMap::new();
    let mut ref_quality = 0;

    for (i, (allele, info)) in inputs.iter().enumerate() {
        let best = info.top_quality.best().unwrap_or(0);
        if info.is_ref {
            mappings[i] = Some(Mapping::Canonical(0));
            ref_quality = ref_quality.max(best);
            continue;
        }
        if config.drop_filtered && info.all_filtered {
            mappings[i] = Some(Mapping::Dropped(DropReason::Filtered));
            continue;
        }
        if best < config.min_quality {
            mappings[i] = Some(Mapping::Dropped(DropReason::LowQuality));
            continue;
        }

        let padded = pad_allele(&site_range, &reference, allele);
        if padded == reference {
            mappings[i] = Some(Mapping::Canonical(0));
            continue;
        }
        let cluster = clusters.entry(padded).or_default();
        cluster.members.push(i);
        cluster.zygosity.merge(&info.zygosity_by_gq);
        cluster.best_quality = cluster.best_quality.max(best);
    }

    let mut ranked: Vec<(Vec<u8>, Cluster)> = clusters.into_iter().collect();
    for (dna, cluster) in &ranked {
        let copies = cluster.zygosity.copies();
        if copies > max_copies {
            return Err(Error::InconsistentCatalog(format!(
                "Canonical allele {} at {} has {} copies in a cohort of {}",
                String::from_utf8_lossy(dna),
                site_range,
                copies,
                cohort_size
            )));
        }
    }
    // Stable sort keeps the sequence order among equal copy counts.
    ranked.sort_by(|a, b| b.1.zygosity.copies().cmp(&a.1.zygosity.copies()));

    let mut site_alleles = vec![UnifiedAllele {
        dna: String::from_utf8_lossy(&reference).into_owned(),
        frequency: None,
    }];
    let mut quality = 0;

    for (dna, cluster) in ranked {
        let frequency = cluster.zygosity.copies() as f64 / max_copies as f64;
        let mapping = if frequency < config.min_frequency {
            Mapping::Dropped(DropReason::LowFrequency)
        } else if site_alleles.len() > config.max_alt_alleles {
            Mapping::Dropped(DropReason::AlleleLimit)
        } else {
            site_alleles.push(UnifiedAllele {
                dna: String::from_utf8_lossy(&dna).into_owned(),
                frequency: Some(frequency),
            });
            quality = quality.max(cluster.best_quality);
            Mapping::Canonical(site_alleles.len() - 1)
        };
        for member in cluster.members {
            mappings[member] = Some(mapping);
        }
    }

    if site_alleles.len() == 1 {
        // Nothing but the reference survived.
        site_alleles[0].frequency = Some(1.0);
        quality = ref_quality;
    }

    let unification = inputs
        .iter()
        .zip(mappings)
        .map(|((allele, _), mapping)| UnificationEntry {
            range: allele.range,
            dna: allele.dna.clone(),
            // Every input was classified above.
            mapping: mapping.unwrap_or(Mapping::Dropped(DropReason::Filtered)),
        })
        .collect();

    Ok(UnifiedSite {
        range: site_range,
        alleles: site_alleles,
        quality,
        unification,
    })
}

/// Assemble the reference sequence over `site` from the reference alleles.
fn stitch_reference(site: &Range, inputs: &[&(Allele, DiscoveredAlleleInfo)]) -> Result<Vec<u8>> {
    let mut bases: Vec<Option<u8>> = vec![None; site.len() as usize];

    for (allele, _) in inputs.iter().filter(|(_, info)| info.is_ref) {
        if allele.dna.len() as u64 != allele.range.len() {
            return Err(Error::MalformedInput(format!(
                "Reference allele {} {} does not match its range length",
                allele.range, allele.dna
            )));
        }
        let offset = (allele.range.beg - site.beg) as usize;
        for (i, base) in allele.dna.bytes().map(|b| b.to_ascii_uppercase()).enumerate() {
            let slot = &mut bases[offset + i];
            match slot {
                Some(existing) if *existing != base => {
                    return Err(Error::MalformedInput(format!(
                        "Reference alleles disagree at {}:{}",
                        site.rid,
                        site.beg + (offset + i) as u64
                    )));
                }
                Some(_) => {}
                None => *slot = Some(base),
            }
        }
    }

    bases
        .iter()
        .enumerate()
        .map(|(i, b)| {
            b.ok_or_else(|| {
                Error::MalformedInput(format!(
                    "No reference allele covers {}:{} in site {}",
                    site.rid,
                    site.beg + i as u64,
                    site
                ))
            })
        })
        .collect()
}

/// Extend an allele with flanking reference bases to span the whole site.
/// The result is uppercase, like the stitched reference.
fn pad_allele(site: &Range, reference: &[u8], allele: &Allele) -> Vec<u8> {
    let left = (allele.range.beg - site.beg) as usize;
    let right = (allele.range.end - site.beg) as usize;
    let mut padded = Vec::with_capacity(left + allele.dna.len() + reference.len() - right);
    padded.extend_from_slice(&reference[..left]);
    padded.extend(allele.dna.bytes().map(|b| b.to_ascii_uppercase()));
    padded.extend_from_slice(&reference[right..]);
    padded
}

/// Unify a whole catalog, consuming it.
///
/// Windows are the unions of overlapping allele ranges. With `targets`,
/// alleles overlapping no target region are left out first. Sites with only
/// a reference allele are dropped unless the config keeps them. The result
/// is sorted by range.
pub fn unify_catalog(
    catalog: DiscoveredAlleles,
    cohort_size: u64,
    config: &UnifierConfig,
    targets: Option<&RangeIndex>,
) -> Result<Vec<UnifiedSite>> {
    let mut catalog = catalog;
    if let Some(targets) = targets {
        catalog.retain(|allele, _| targets.has_overlap(&allele.range));
    }
    if let Some(empty) = catalog.keys().find(|a| a.range.is_empty()) {
        return Err(Error::MalformedInput(format!(
            "Allele {} {} has an empty range",
            empty.range, empty.dna
        )));
    }

    let windows = RangeIndex::from_ranges(discover_windows(&catalog))?;
    let mut groups: BTreeMap<Range, Vec<(Allele, DiscoveredAlleleInfo)>> = BTreeMap::new();
    for (allele, info) in catalog {
        let window = windows.locate(&allele.range)?;
        groups.entry(window).or_default().push((allele, info));
    }
    debug!(windows = groups.len(), "unifying windows");

    let groups: Vec<(Range, Vec<(Allele, DiscoveredAlleleInfo)>)> = groups.into_iter().collect();
    let sites = groups
        .into_par_iter()
        .map(|(window, alleles)| unify_window(&window, &alleles, cohort_size, config))
        .collect::<Result<Vec<_>>>()?;

    let total = sites.len();
    let mut sites: Vec<UnifiedSite> = sites
        .into_iter()
        .filter(|s| config.keep_monoallelic || s.alleles.len() > 1)
        .collect();
    sites.sort_by(|a, b| a.range.cmp(&b.range));
    info!(windows = total, sites = sites.len(), "unification complete");
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{observe, TopQuality, TOP_QUALITY_CAPACITY};

    fn record(
        range: Range,
        dna: &str,
        is_ref: bool,
        filtered: bool,
        quality: u32,
        het: u64,
        hom: u64,
    ) -> (Allele, DiscoveredAlleleInfo) {
        let mut zyg = ZygosityByQuality::default();
        for _ in 0..het {
            zyg.add(1, 60);
        }
        for _ in 0..hom {
            zyg.add(2, 60);
        }
        (
            Allele::new(range, dna),
            DiscoveredAlleleInfo {
                is_ref,
                all_filtered: filtered,
                top_quality: TopQuality::from_scores(TOP_QUALITY_CAPACITY, [quality]),
                zygosity_by_gq: zyg,
            },
        )
    }

    fn r(beg: u64, end: u64) -> Range {
        Range::new(1, beg, end)
    }

    /// Deletion AG>A plus a SNP inside it, plus an overlapping SNP ref.
    fn deletion_window() -> Vec<(Allele, DiscoveredAlleleInfo)> {
        vec![
            record(r(999, 1001), "AG", true, false, 99, 5, 0),
            record(r(1000, 1001), "G", true, false, 80, 0, 0),
            record(r(1000, 1001), "C", false, false, 70, 4, 0),
            record(r(999, 1001), "A", false, false, 317, 2, 4),
        ]
    }

    #[test]
    fn test_unify_deletion_with_snp() {
        let site =
            unify_window(&r(999, 1001), &deletion_window(), 10, &UnifierConfig::default()).unwrap();

        assert_eq!(site.range, r(999, 1001));
        let dnas: Vec<&str> = site.alleles.iter().map(|a| a.dna.as_str()).collect();
        assert_eq!(dnas, vec!["AG", "A", "AC"]);
        assert_eq!(site.alleles[0].frequency, None);
        assert_eq!(site.alleles[1].frequency, Some(10.0 / 20.0));
        assert_eq!(site.alleles[2].frequency, Some(4.0 / 20.0));
        assert_eq!(site.quality, 317);
        assert_eq!(site.canonical_index(&r(1000, 1001), "C"), Some(2));
        assert_eq!(site.canonical_index(&r(1000, 1001), "G"), Some(0));
        site.validate().unwrap();
    }

    #[test]
    fn test_unification_complete_and_sorted() {
        let mut input = deletion_window();
        input.push(record(r(1000, 1001), "T", false, true, 50, 1, 0));
        input.push(record(r(1000, 1001), "GA", false, false, 2, 1, 0));
        let config = UnifierConfig {
            min_quality: 10,
            ..Default::default()
        };

        let site = unify_window(&r(999, 1001), &input, 10, &config).unwrap();

        assert_eq!(site.unification.len(), input.len());
        for (allele, _) in &input {
            let hits = site
                .unification
                .iter()
                .filter(|e| e.range == allele.range && e.dna == allele.dna)
                .count();
            assert_eq!(hits, 1, "{} {}", allele.range, allele.dna);
        }
        let fate = |dna: &str| {
            site.unification
                .iter()
                .find(|e| e.dna == dna)
                .map(|e| e.mapping)
                .unwrap()
        };
        assert_eq!(fate("T"), Mapping::Dropped(DropReason::Filtered));
        assert_eq!(fate("GA"), Mapping::Dropped(DropReason::LowQuality));
        site.validate().unwrap();
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let config = UnifierConfig::default();
        let forward = unify_window(&r(999, 1001), &deletion_window(), 10, &config).unwrap();
        let mut reversed = deletion_window();
        reversed.reverse();
        let backward = unify_window(&r(999, 1001), &reversed, 10, &config).unwrap();

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_more_evidence_keeps_identity() {
        let config = UnifierConfig::default();
        let before = unify_window(&r(999, 1001), &deletion_window(), 10, &config).unwrap();

        let mut more = deletion_window();
        more[2].1.zygosity_by_gq.add(1, 99);
        more[2].1.top_quality.insert(400);
        let after = unify_window(&r(999, 1001), &more, 10, &config).unwrap();

        let canonical = |site: &UnifiedSite| {
            let i = site.canonical_index(&r(1000, 1001), "C").unwrap();
            site.alleles[i].dna.clone()
        };
        assert_eq!(canonical(&before), canonical(&after));
        assert_eq!(after.quality, 400);
        assert_eq!(after.alleles[2].frequency, Some(5.0 / 20.0));
    }

    #[test]
    fn test_collapse_equivalent_alternates() {
        let input = vec![
            record(r(10, 12), "AT", true, false, 99, 0, 0),
            record(r(11, 12), "T", true, false, 99, 0, 0),
            record(r(11, 12), "G", false, false, 40, 1, 0),
            record(r(10, 12), "AG", false, false, 60, 2, 0),
        ];
        let site = unify_window(&r(10, 12), &input, 5, &UnifierConfig::default()).unwrap();

        assert_eq!(site.alleles.len(), 2);
        assert_eq!(site.alleles[1].dna, "AG");
        assert_eq!(site.alleles[1].frequency, Some(3.0 / 10.0));
        assert_eq!(site.canonical_index(&r(11, 12), "G"), Some(1));
        assert_eq!(site.canonical_index(&r(10, 12), "AG"), Some(1));
        assert_eq!(site.quality, 60);
    }

    #[test]
    fn test_lowercase_reference_absorbs_equal_alternate() {
        let input = vec![
            record(r(10, 12), "at", true, false, 99, 0, 0),
            record(r(11, 12), "T", true, false, 99, 0, 0),
            record(r(10, 12), "AT", false, false, 60, 2, 0),
            record(r(11, 12), "g", false, false, 50, 1, 0),
        ];
        let site = unify_window(&r(10, 12), &input, 5, &UnifierConfig::default()).unwrap();

        let dnas: Vec<&str> = site.alleles.iter().map(|a| a.dna.as_str()).collect();
        assert_eq!(dnas, vec!["AT", "AG"]);
        assert_eq!(site.canonical_index(&r(10, 12), "AT"), Some(0));
        assert_eq!(site.canonical_index(&r(11, 12), "g"), Some(1));
        site.validate().unwrap();
    }

    #[test]
    fn test_frequency_and_allele_limit() {
        let input = vec![
            record(r(5, 6), "A", true, false, 99, 0, 0),
            record(r(5, 6), "C", false, false, 50, 1, 0),
            record(r(5, 6), "G", false, false, 50, 3, 0),
            record(r(5, 6), "T", false, false, 50, 2, 0),
        ];
        let config = UnifierConfig {
            min_frequency: 0.1,
            max_alt_alleles: 1,
            ..Default::default()
        };
        let site = unify_window(&r(5, 6), &input, 10, &config).unwrap();

        assert_eq!(site.alleles.len(), 2);
        assert_eq!(site.alleles[1].dna, "G");
        let fate = |dna: &str| site.unification.iter().find(|e| e.dna == dna).unwrap().mapping;
        assert_eq!(fate("C"), Mapping::Dropped(DropReason::LowFrequency));
        assert_eq!(fate("T"), Mapping::Dropped(DropReason::AlleleLimit));
    }

    #[test]
    fn test_reference_only_site() {
        let input = vec![
            record(r(5, 6), "A", true, false, 42, 3, 0),
            record(r(5, 6), "C", false, true, 50, 1, 0),
        ];
        let site = unify_window(&r(5, 6), &input, 10, &UnifierConfig::default()).unwrap();

        assert_eq!(site.alleles.len(), 1);
        assert_eq!(site.alleles[0].frequency, Some(1.0));
        assert_eq!(site.quality, 42);
    }

    #[test]
    fn test_malformed_inputs() {
        let config = UnifierConfig::default();

        let outside = vec![record(r(50, 51), "A", true, false, 1, 0, 0)];
        assert!(matches!(
            unify_window(&r(5, 6), &outside, 10, &config),
            Err(Error::MalformedInput(_))
        ));

        let bad_ref = vec![record(r(5, 7), "A", true, false, 1, 0, 0)];
        assert!(matches!(
            unify_window(&r(5, 7), &bad_ref, 10, &config),
            Err(Error::MalformedInput(_))
        ));

        let no_ref = vec![record(r(5, 6), "C", false, false, 1, 1, 0)];
        assert!(matches!(
            unify_window(&r(5, 6), &no_ref, 10, &config),
            Err(Error::MalformedInput(_))
        ));

        let conflict = vec![
            record(r(5, 7), "AC", true, false, 1, 0, 0),
            record(r(6, 7), "G", true, false, 1, 0, 0),
        ];
        assert!(matches!(
            unify_window(&r(5, 7), &conflict, 10, &config),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn test_inconsistent_counts() {
        let config = UnifierConfig::default();
        let too_many = vec![
            record(r(5, 6), "A", true, false, 1, 0, 0),
            record(r(5, 6), "C", false, false, 1, 0, 3),
        ];
        assert!(matches!(
            unify_window(&r(5, 6), &too_many, 2, &config),
            Err(Error::InconsistentCatalog(_))
        ));
        assert!(matches!(
            unify_window(&r(5, 6), &too_many, 0, &config),
            Err(Error::InconsistentCatalog(_))
        ));

        // Each allele fits, but the cluster they form does not.
        let cluster = vec![
            record(r(5, 7), "AT", true, false, 1, 0, 0),
            record(r(6, 7), "T", true, false, 1, 0, 0),
            record(r(5, 7), "AG", false, false, 1, 0, 2),
            record(r(6, 7), "G", false, false, 1, 0, 2),
        ];
        assert!(matches!(
            unify_window(&r(5, 7), &cluster, 3, &config),
            Err(Error::InconsistentCatalog(_))
        ));
    }

    #[test]
    fn test_unify_catalog() {
        let mut catalog = DiscoveredAlleles::new();
        for (allele, info) in deletion_window() {
            catalog.insert(allele, info);
        }
        observe(&mut catalog, Allele::new(r(2000, 2001), "T"), true, false, Some(50), None);
        observe(&mut catalog, Allele::new(r(2000, 2001), "C"), false, false, Some(30), Some((1, 30)));
        observe(&mut catalog, Allele::new(r(3000, 3001), "G"), true, false, Some(50), Some((2, 30)));

        let sites = unify_catalog(catalog.clone(), 10, &UnifierConfig::default(), None).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].range, r(999, 1001));
        assert_eq!(sites[1].range, r(2000, 2001));
        assert_eq!(sites[1].alleles[1].frequency, Some(1.0 / 20.0));

        let keep = UnifierConfig {
            keep_monoallelic: true,
            ..Default::default()
        };
        assert_eq!(unify_catalog(catalog.clone(), 10, &keep, None).unwrap().len(), 3);

        let targets = RangeIndex::from_ranges(vec![r(1990, 2010)]).unwrap();
        let targeted = unify_catalog(catalog, 10, &UnifierConfig::default(), Some(&targets)).unwrap();
        assert_eq!(targeted.len(), 1);
        assert_eq!(targeted[0].range, r(2000, 2001));
    }
}
