//! Ordered key/value storage.
//!
//! The engine is a capability behind [`KeyValueStore`]: ordered byte keys,
//! point reads and writes, lazy range iteration restartable from any key,
//! and atomic write batches. [`AlleleStore`] layers the catalog's key
//! layout on top of any engine.

mod alleles;
mod keys;
mod memory;

pub use alleles::{allele_merge_operator, AlleleStore, SourceSummary};
pub use keys::{
    all_allele_bounds, allele_key, allele_key_bounds, decode_allele_key, ALLELE_PREFIX,
};
pub use memory::{MemoryStore, MergeOperator};

use crate::error::Result;
use std::ops::Bound;

/// A key/value pair as stored.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Overwrite the value.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Combine with the existing value through the store's merge operator.
    Merge { key: Vec<u8>, operand: Vec<u8> },
    /// Write only if the key is absent; otherwise the whole batch fails.
    Insert { key: Vec<u8>, value: Vec<u8> },
}

/// Writes applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put { key, value });
    }

    pub fn merge(&mut self, key: Vec<u8>, operand: Vec<u8>) {
        self.ops.push(WriteOp::Merge { key, operand });
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Insert { key, value });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Lazy, ordered, finite sequence of stored pairs.
pub type StoreIter<'a> = Box<dyn Iterator<Item = Result<KeyValue>> + Send + 'a>;

/// An ordered byte-range key/value engine.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Iterate keys in `(lower, upper)` in ascending order.
    fn iterate(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Result<StoreIter<'_>>;

    /// Apply every op of the batch atomically: concurrent readers see all of
    /// it or none of it, and a failing op leaves the store untouched.
    fn commit(&self, batch: WriteBatch) -> Result<()>;
}
