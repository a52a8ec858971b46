use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::keys::{
    allele_key, allele_key_bounds, all_allele_bounds, decode_allele_key, source_key,
    CONTIGS_KEY, SOURCE_PREFIX,
};
use super::{KeyValueStore, MemoryStore, MergeOperator, WriteBatch};
use crate::contigs::ContigTable;
use crate::discovery::{Allele, DiscoveredAlleleInfo, DiscoveredAlleles};
use crate::error::{Error, Result};
use crate::range::Range;

/// What a committed source contributed, stored under its marker key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub records: u64,
    pub alleles: u64,
    pub skipped: u64,
}

/// Merge operator combining encoded [`DiscoveredAlleleInfo`] values.
pub fn allele_merge_operator() -> MergeOperator {
    Arc::new(|_key: &[u8], existing: Option<&[u8]>, operand: &[u8]| {
        let mut info: DiscoveredAlleleInfo = bincode::deserialize(operand)?;
        if let Some(existing) = existing {
            let mut current: DiscoveredAlleleInfo = bincode::deserialize(existing)?;
            current.merge(&info);
            info = current;
        }
        Ok(bincode::serialize(&info)?)
    })
}

/// Typed access to the discovered-allele catalog kept in a key/value engine.
pub struct AlleleStore<S> {
    store: S,
}

impl AlleleStore<MemoryStore> {
    /// Empty in-memory store with the allele merge operator installed.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::with_merge_operator(allele_merge_operator()))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = MemoryStore::open(path, Some(allele_merge_operator()))?;
        Ok(Self::new(store))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.store.save(path)
    }
}

impl<S: KeyValueStore> AlleleStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Record the contig table. A store is initialized exactly once.
    pub fn init(&self, contigs: &ContigTable) -> Result<()> {
        if contigs.is_empty() {
            return Err(Error::InvalidInput("Empty contig table".to_string()));
        }
        let mut batch = WriteBatch::new();
        batch.insert(CONTIGS_KEY.to_vec(), bincode::serialize(contigs)?);
        self.store
            .commit(batch)
            .map_err(|_| Error::Store("Store is already initialized".to_string()))?;
        debug!(contigs = contigs.len(), "initialized store");
        Ok(())
    }

    pub fn contigs(&self) -> Result<ContigTable> {
        match self.store.get(CONTIGS_KEY)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(Error::Store("Store has no contig table".to_string())),
        }
    }

    pub fn has_source(&self, name: &str) -> Result<bool> {
        Ok(self.store.get(&source_key(name))?.is_some())
    }

    /// Committed sources in name order.
    pub fn sources(&self) -> Result<Vec<(String, SourceSummary)>> {
        let lower = Bound::Included(vec![SOURCE_PREFIX, b':']);
        let upper = Bound::Excluded(vec![SOURCE_PREFIX, b':' + 1]);
        self.store
            .iterate(lower, upper)?
            .map(|kv| {
                let (key, value) = kv?;
                let name = String::from_utf8_lossy(&key[2..]).into_owned();
                Ok((name, bincode::deserialize(&value)?))
            })
            .collect()
    }

    /// Number of committed sources, i.e. the cohort the catalog describes.
    pub fn cohort_size(&self) -> Result<u64> {
        Ok(self.sources()?.len() as u64)
    }

    /// Commit one source's catalog in a single atomic batch.
    ///
    /// The batch holds an insert-if-absent marker for the source plus one
    /// merge operand per allele, so a repeated source name fails the whole
    /// batch and leaves the store unchanged.
    pub fn commit_source(
        &self,
        name: &str,
        catalog: &DiscoveredAlleles,
        summary: &SourceSummary,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.insert(source_key(name), bincode::serialize(summary)?);
        for (allele, info) in catalog {
            batch.merge(allele_key(allele), bincode::serialize(info)?);
        }
        let ops = batch.len();
        self.store.commit(batch).map_err(|e| match e {
            Error::Store(reason) => Error::rejected(name, reason),
            other => other,
        })?;
        debug!(source = name, ops, "committed source batch");
        Ok(())
    }

    /// Alleles whose begin lies in `range`, in key order.
    pub fn scan(&self, range: &Range) -> Result<Vec<(Allele, DiscoveredAlleleInfo)>> {
        let (lower, upper) = allele_key_bounds(range);
        self.decode_all(lower, upper)
    }

    /// The whole stored catalog, or the alleles beginning in any of `ranges`.
    pub fn discovered_alleles(&self, ranges: &[Range]) -> Result<DiscoveredAlleles> {
        let mut catalog = DiscoveredAlleles::new();
        if ranges.is_empty() {
            let (lower, upper) = all_allele_bounds();
            catalog.extend(self.decode_all(lower, upper)?);
        } else {
            for range in ranges {
                catalog.extend(self.scan(range)?);
            }
        }
        Ok(catalog)
    }

    fn decode_all(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> Result<Vec<(Allele, DiscoveredAlleleInfo)>> {
        self.store
            .iterate(lower, upper)?
            .map(|kv| {
                let (key, value) = kv?;
                Ok((decode_allele_key(&key)?, bincode::deserialize(&value)?))
            })
            .collect()
    }
}
