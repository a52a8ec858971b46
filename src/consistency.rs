//! Iteration-consistency checks over a persisted catalog.
//!
//! The allele key space is read through several independent traversal
//! strategies and each ordered result is compared with a plain full scan.
//! Any divergence means the store's range iteration is broken.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::ops::Bound;
use tracing::{debug, info};

use crate::contigs::ContigTable;
use crate::error::{Error, Result};
use crate::range::Range;
use crate::store::{
    all_allele_bounds, allele_key_bounds, decode_allele_key, AlleleStore, KeyValue, KeyValueStore,
};

/// Most cut points drawn per contig by the random-subrange strategy.
const MAX_CUTS: usize = 8;

/// Largest page the restart strategy reads before restarting.
const MAX_PAGE: usize = 64;

/// A way of reading the allele key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One iteration over the whole key space.
    FullScan,
    /// One bounded iteration per contig.
    PerContig,
    /// Consecutive random slices of each contig.
    RandomSubranges,
    /// Short pages, each a fresh iteration starting just after the last key.
    Restart,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::FullScan,
        Strategy::PerContig,
        Strategy::RandomSubranges,
        Strategy::Restart,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FullScan => "full_scan",
            Strategy::PerContig => "per_contig",
            Strategy::RandomSubranges => "random_subranges",
            Strategy::Restart => "restart",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub iterations: usize,
    /// Records seen by each pass.
    pub records: usize,
}

fn scan<S: KeyValueStore>(
    store: &S,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    out: &mut Vec<KeyValue>,
) -> Result<()> {
    for kv in store.iterate(lower, upper)? {
        out.push(kv?);
    }
    Ok(())
}

fn full_scan<S: KeyValueStore>(store: &S) -> Result<Vec<KeyValue>> {
    let (lower, upper) = all_allele_bounds();
    let mut out = Vec::new();
    scan(store, lower, upper, &mut out)?;
    Ok(out)
}

fn per_contig<S: KeyValueStore>(store: &S, contigs: &ContigTable) -> Result<Vec<KeyValue>> {
    let mut out = Vec::new();
    for contig in contigs.full_ranges() {
        let (lower, upper) = allele_key_bounds(&contig);
        scan(store, lower, upper, &mut out)?;
    }
    Ok(out)
}

fn random_subranges<S: KeyValueStore>(
    store: &S,
    contigs: &ContigTable,
    rng: &mut SmallRng,
) -> Result<Vec<KeyValue>> {
    let mut out = Vec::new();
    for contig in contigs.full_ranges() {
        let mut cuts: Vec<u64> = (0..rng.gen_range(1..=MAX_CUTS))
            .map(|_| rng.gen_range(0..=contig.end))
            .collect();
        cuts.push(0);
        cuts.push(contig.end);
        cuts.sort_unstable();
        cuts.dedup();
        for pair in cuts.windows(2) {
            let (lower, upper) = allele_key_bounds(&Range::new(contig.rid, pair[0], pair[1]));
            scan(store, lower, upper, &mut out)?;
        }
    }
    Ok(out)
}

fn restart<S: KeyValueStore>(store: &S, rng: &mut SmallRng) -> Result<Vec<KeyValue>> {
    let page = rng.gen_range(1..=MAX_PAGE);
    let (mut lower, upper) = all_allele_bounds();
    let mut out = Vec::new();
    loop {
        let before = out.len();
        for kv in store.iterate(lower.clone(), upper.clone())?.take(page) {
            out.push(kv?);
        }
        match out.last() {
            Some((key, _)) if out.len() - before == page => lower = Bound::Excluded(key.clone()),
            _ => return Ok(out),
        }
    }
}

fn describe(kv: Option<&KeyValue>, contigs: &ContigTable) -> String {
    match kv {
        None => "end of iteration".to_string(),
        Some((key, _)) => match decode_allele_key(key) {
            Ok(allele) => format!("{} {}", contigs.format_range(&allele.range), allele.dna),
            Err(_) => format!("undecodable key {:?}", key),
        },
    }
}

fn compare(
    iteration: usize,
    strategy: Strategy,
    expected: &[KeyValue],
    found: &[KeyValue],
    contigs: &ContigTable,
) -> Result<()> {
    let len = expected.len().max(found.len());
    for position in 0..len {
        let (e, f) = (expected.get(position), found.get(position));
        if e != f {
            let mut found_text = describe(f, contigs);
            if e.map(|kv| &kv.0) == f.map(|kv| &kv.0) {
                found_text.push_str(" with a different value");
            }
            return Err(Error::ConsistencyViolation {
                iteration,
                strategy: strategy.name().to_string(),
                position,
                expected: describe(e, contigs),
                found: found_text,
            });
        }
    }
    Ok(())
}

/// Read the store `iterations` times through every [`Strategy`] and
/// compare each result with a full scan.
///
/// Random choices are seeded from `seed` and the iteration number, so a
/// failing run can be replayed.
pub fn check_iteration_consistency<S: KeyValueStore>(
    store: &AlleleStore<S>,
    iterations: usize,
    seed: u64,
) -> Result<ConsistencyReport> {
    let contigs = store.contigs()?;
    let kv = store.inner();
    let mut records = 0;

    for iteration in 0..iterations {
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(iteration as u64));
        let expected = full_scan(kv)?;
        records = expected.len();

        for strategy in Strategy::ALL {
            let found = match strategy {
                Strategy::FullScan => full_scan(kv)?,
                Strategy::PerContig => per_contig(kv, &contigs)?,
                Strategy::RandomSubranges => random_subranges(kv, &contigs, &mut rng)?,
                Strategy::Restart => restart(kv, &mut rng)?,
            };
            compare(iteration, strategy, &expected, &found, &contigs)?;
        }
        debug!(iteration, records, "iteration consistent");
    }

    info!(iterations, records, "iteration strategies agree");
    Ok(ConsistencyReport {
        iterations,
        records,
    })
}
