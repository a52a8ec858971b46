//! Catalog-level properties exercised through the public API.

use pretty_assertions::assert_eq;

use siteforge::discovery::{observe, TopQuality};
use siteforge::{
    merge_discovered_alleles, reduce_catalogs, unify_catalog, yaml, Allele, ContigTable,
    DiscoveredAlleleInfo, DiscoveredAlleles, Error, Range, RangeIndex, UnifierConfig,
};

fn scenario_index() -> RangeIndex {
    RangeIndex::from_ranges(vec![
        Range::new(1, 15, 20),
        Range::new(1, 108, 151),
        Range::new(2, 31, 50),
        Range::new(3, 1000, 1507),
    ])
    .unwrap()
}

#[test]
fn test_index_scenarios() {
    let index = scenario_index();
    assert_eq!(index.locate(&Range::new(1, 17, 18)).unwrap(), Range::new(1, 15, 20));
    assert_eq!(index.locate(&Range::new(1, 105, 110)).unwrap(), Range::new(1, 108, 151));
    assert_eq!(index.locate(&Range::new(1, 150, 155)).unwrap(), Range::new(1, 108, 151));
    assert!(matches!(index.locate(&Range::new(2, 301, 302)), Err(Error::NotFound(_))));
}

#[test]
fn test_index_rejects_nested_ranges() {
    let nested = vec![Range::new(2, 31, 50), Range::new(2, 42, 48)];
    assert!(RangeIndex::from_ranges(nested.clone()).is_err());
    assert_eq!(RangeIndex::from_union(nested).ranges(), &[Range::new(2, 31, 50)]);
}

#[test]
fn test_top_quality_merge_keeps_best() {
    let mut a = DiscoveredAlleleInfo::new(true, false);
    a.top_quality = TopQuality::from_scores(1, [99]);
    let mut b = DiscoveredAlleleInfo::new(true, false);
    b.top_quality = TopQuality::from_scores(1, [80]);

    let allele = Allele::new(Range::new(0, 10, 11), "A");
    let mut merged = DiscoveredAlleles::from([(allele.clone(), a)]);
    merge_discovered_alleles(DiscoveredAlleles::from([(allele.clone(), b)]), &mut merged);

    let info = &merged[&allele];
    assert!(info.is_ref);
    assert_eq!(info.top_quality.scores(), &[99]);
}

/// A catalog of `n` alleles on contig 0, deterministic in `seed`.
fn synthetic_catalog(seed: u64, n: u64) -> DiscoveredAlleles {
    let mut catalog = DiscoveredAlleles::new();
    for i in 0..n {
        let beg = (seed * 7 + i * 13) % 400;
        let range = Range::new(0, beg, beg + 1);
        observe(&mut catalog, Allele::new(range, "A"), true, false, Some(30), Some((1, 30)));
        let alt = ["C", "G", "T"][((seed + i) % 3) as usize];
        let quality = (seed as u32 * 11 + i as u32) % 100;
        observe(&mut catalog, Allele::new(range, alt), false, seed % 4 == 0, Some(quality), Some((1, 30)));
    }
    catalog
}

#[test]
fn test_merge_is_order_independent() {
    let parts: Vec<DiscoveredAlleles> = (0..6).map(|s| synthetic_catalog(s, 40)).collect();

    let forward = reduce_catalogs(parts.clone());
    let backward = reduce_catalogs(parts.iter().rev().cloned().collect());

    let mut folded = DiscoveredAlleles::new();
    for part in parts {
        merge_discovered_alleles(part, &mut folded);
    }

    assert_eq!(forward, backward);
    assert_eq!(forward, folded);
}

#[test]
fn test_empty_catalog_serialization() {
    let mut out = Vec::new();
    yaml::write_catalog(&mut out, 1, &ContigTable::new(), &DiscoveredAlleles::new()).unwrap();
    assert!(!out.is_empty());

    let contigs = "---\nversion: 1\ncontigs:\n- name: '1'\n  size: 500\n---\n";
    assert!(yaml::read_catalog(format!("{}[]\n...\n", contigs).as_bytes()).is_ok());
    let bad = format!("{}- range: {{ref: '1', beg: 1}}\n  dna: A\n...\n", contigs);
    assert!(yaml::read_catalog(bad.as_bytes()).is_err());
}

#[test]
fn test_unification_through_yaml_is_stable() {
    let contigs = ContigTable::from_pairs([("1", 500u64)]);
    let catalog = reduce_catalogs((0..6).map(|s| synthetic_catalog(s, 40)).collect());

    let mut text = Vec::new();
    yaml::write_catalog(&mut text, 1, &contigs, &catalog).unwrap();
    let stream = yaml::read_catalog(text.as_slice()).unwrap();
    assert_eq!(stream.catalog, catalog);

    let config = UnifierConfig {
        min_quality: 20,
        ..Default::default()
    };
    let direct = unify_catalog(catalog.clone(), 6, &config, None).unwrap();
    let via_yaml = unify_catalog(stream.catalog, 6, &config, None).unwrap();
    assert_eq!(direct, via_yaml);

    // Every discovered allele inside a site's span is accounted for.
    let accounted: usize = direct.iter().map(|s| s.unification.len()).sum();
    let covered = catalog
        .keys()
        .filter(|a| direct.iter().any(|s| s.range.contains(&a.range)))
        .count();
    assert_eq!(accounted, covered);

    let mut sites_text = Vec::new();
    yaml::write_sites(&mut sites_text, &contigs, &direct).unwrap();
    let (read_contigs, sites) = yaml::read_sites(sites_text.as_slice()).unwrap();
    assert_eq!(read_contigs, contigs);
    assert_eq!(sites.len(), direct.len());
    for (read, written) in sites.iter().zip(&direct) {
        assert_eq!(read.range, written.range);
        assert_eq!(read.unification, written.unification);
    }
}
