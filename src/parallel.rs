//! Parallel discovery and catalog reduction using Rayon.
//!
//! Workers each own a private catalog; the reduction tree is the only place
//! catalogs meet, and every merge there has a single owner.

use crate::discovery::{merge_discovered_alleles, DiscoveredAlleles};
use crate::error::Result;
use rayon::prelude::*;

/// Merge catalogs pairwise in a parallel reduction tree.
///
/// The result does not depend on how Rayon shapes the tree, since the merge
/// is associative and commutative.
pub fn reduce_catalogs(catalogs: Vec<DiscoveredAlleles>) -> DiscoveredAlleles {
    catalogs
        .into_par_iter()
        .reduce(DiscoveredAlleles::new, |mut left, mut right| {
            // Fold the smaller catalog into the larger one.
            if left.len() < right.len() {
                std::mem::swap(&mut left, &mut right);
            }
            merge_discovered_alleles(right, &mut left);
            left
        })
}

/// Run a discovery pass per chunk in parallel, then reduce.
///
/// The first failing chunk aborts the whole discovery.
pub fn discover_chunks<T, F>(chunks: Vec<T>, discover: F) -> Result<DiscoveredAlleles>
where
    T: Send,
    F: Fn(T) -> Result<DiscoveredAlleles> + Sync + Send,
{
    let catalogs = chunks
        .into_par_iter()
        .map(discover)
        .collect::<Result<Vec<_>>>()?;
    Ok(reduce_catalogs(catalogs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{observe, Allele};
    use crate::error::Error;
    use crate::range::Range;

    fn chunk_catalog(rid: u32, beg: u64, copies: usize) -> DiscoveredAlleles {
        let mut catalog = DiscoveredAlleles::new();
        observe(
            &mut catalog,
            Allele::new(Range::new(rid, beg, beg + 1), "T"),
            false,
            false,
            Some(40),
            Some((copies, 50)),
        );
        catalog
    }

    #[test]
    fn test_reduce_matches_sequential() {
        let chunks: Vec<DiscoveredAlleles> = (0..64)
            .map(|i| chunk_catalog(i % 3, 100 + (i as u64 % 5), 1 + (i as usize % 2)))
            .collect();

        let mut sequential = DiscoveredAlleles::new();
        for c in chunks.clone() {
            merge_discovered_alleles(c, &mut sequential);
        }

        assert_eq!(reduce_catalogs(chunks), sequential);
    }

    #[test]
    fn test_discover_chunks_propagates_error() {
        let result = discover_chunks(vec![1u32, 2, 3], |i| {
            if i == 2 {
                Err(Error::MalformedInput("bad chunk".into()))
            } else {
                Ok(chunk_catalog(i, 10, 1))
            }
        });
        assert!(result.is_err());
    }
}
