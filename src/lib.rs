// Clippy allows for the whole crate
#![allow(clippy::type_complexity)]

//! siteforge: population-level variant site unification.
//!
//! Per-sample variant records are discovered into allele catalogs, merged
//! into a genome-wide catalog, and collapsed window by window into canonical
//! sites. Catalogs persist in a range-keyed store that can be bulk loaded
//! from many sources in parallel and checked for iteration consistency.
//!
//! # Features
//!
//! - **Disjoint range index**: O(log n) "which window holds this position"
//! - **Associative catalog merge**: parallel discovery reduced with Rayon
//! - **Deterministic unification**: every discovered allele is accounted for
//! - **Atomic bulk loading**: one write batch per source, worker pool
//!
//! # Example
//!
//! ```rust,no_run
//! use siteforge::{unify_catalog, yaml, UnifierConfig};
//! use std::fs::File;
//!
//! let stream = yaml::read_catalog(File::open("catalog.yml").unwrap()).unwrap();
//! let sites = unify_catalog(stream.catalog, 100, &UnifierConfig::default(), None).unwrap();
//! yaml::write_sites(std::io::stdout(), &stream.contigs, &sites).unwrap();
//! ```

pub mod bed;
pub mod config;
pub mod consistency;
pub mod contigs;
pub mod discovery;
pub mod error;
pub mod index;
pub mod loader;
pub mod parallel;
pub mod range;
pub mod store;
pub mod unifier;
pub mod yaml;

// Re-export commonly used types
pub use config::{load_yaml_file, LoaderConfig, UnifierConfig};
pub use consistency::{check_iteration_consistency, ConsistencyReport, Strategy};
pub use contigs::{Contig, ContigTable};
pub use discovery::{
    discover_windows, merge_discovered_alleles, Allele, DiscoveredAlleleInfo, DiscoveredAlleles,
};
pub use error::{Error, Result};
pub use index::RangeIndex;
pub use loader::{bulk_load, BulkLoader, LoadReport, SourceState};
pub use parallel::reduce_catalogs;
pub use range::Range;
pub use store::{AlleleStore, KeyValueStore, MemoryStore};
pub use unifier::{unify_catalog, unify_window, UnifiedSite};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{LoaderConfig, UnifierConfig};
    pub use crate::contigs::ContigTable;
    pub use crate::discovery::{merge_discovered_alleles, Allele, DiscoveredAlleles};
    pub use crate::error::{Error, Result};
    pub use crate::index::RangeIndex;
    pub use crate::loader::{BulkLoader, FileSource, RecordSource};
    pub use crate::range::Range;
    pub use crate::store::{AlleleStore, KeyValueStore, MemoryStore};
    pub use crate::unifier::{unify_catalog, UnifiedSite};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TextSource;

    #[test]
    fn test_load_then_unify_workflow() {
        let store = AlleleStore::in_memory();
        let contigs = ContigTable::from_pairs([("17", 5000u64)]);
        store.init(&contigs).unwrap();

        let header = "#contig\t17\t5000\n";
        let sources: Vec<Box<dyn loader::RecordSource>> = vec![
            Box::new(TextSource::new("a", format!("{}17\t100\tA\tG\t0/1\t40\t50\tPASS\n", header))),
            Box::new(TextSource::new("b", format!("{}17\t100\tA\tG\t1/1\t60\t70\tPASS\n", header))),
            Box::new(TextSource::new("c", format!("{}17\t100\tA\t.\t0/0\t30\t.\tPASS\n", header))),
        ];
        let report = bulk_load(&store, &sources, &LoaderConfig::default(), None).unwrap();
        assert!(report.all_committed());

        let catalog = store.discovered_alleles(&[]).unwrap();
        let cohort = store.cohort_size().unwrap();
        let sites = unify_catalog(catalog, cohort, &UnifierConfig::default(), None).unwrap();

        assert_eq!(sites.len(), 1);
        let site = &sites[0];
        assert_eq!(site.range, Range::new(0, 99, 100));
        assert_eq!(site.alleles[0].dna, "A");
        assert_eq!(site.alleles[1].dna, "G");
        assert_eq!(site.alleles[1].frequency, Some(0.5));
        assert_eq!(site.quality, 70);
    }
}
