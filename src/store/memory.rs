//! In-memory ordered engine with durable snapshots.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{KeyValue, KeyValueStore, StoreIter, WriteBatch, WriteOp};
use crate::error::{Error, Result};

/// Number of pairs a cursor copies out of its snapshot at a time.
const PAGE_SIZE: usize = 1024;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Combines `operand` into the current value of `key` (absent if `None`).
pub type MergeOperator =
    Arc<dyn Fn(&[u8], Option<&[u8]>, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// A copy-on-write `BTreeMap` behind a read/write lock.
///
/// Batches commit under the write lock, so readers observe each batch
/// entirely or not at all, and every write is visible to the next read.
/// An iterator pins the map it started on; a commit landing mid-scan
/// copies the map instead of changing the pinned one.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Arc<Map>>,
    merge_operator: Option<MergeOperator>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_merge_operator(merge_operator: MergeOperator) -> Self {
        Self {
            data: RwLock::default(),
            merge_operator: Some(merge_operator),
        }
    }

    /// Restore a snapshot written by [`save`](Self::save).
    pub fn open<P: AsRef<Path>>(path: P, merge_operator: Option<MergeOperator>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let data: Map = bincode::deserialize_from(BufReader::new(file))?;
        debug!(path = %path.as_ref().display(), keys = data.len(), "opened store snapshot");
        Ok(Self {
            data: RwLock::new(Arc::new(data)),
            merge_operator,
        })
    }

    /// Write a snapshot; the file is replaced atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let data = self.read()?;
            let mut writer = BufWriter::new(tmp.as_file_mut());
            bincode::serialize_into(&mut writer, data.as_ref())?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!(path = %path.display(), "saved store snapshot");
        Ok(())
    }

    /// Every stored pair, in key order.
    pub fn snapshot(&self) -> Result<Vec<KeyValue>> {
        Ok(self
            .read()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Arc<Map>>> {
        self.data
            .read()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Arc<Map>>> {
        self.data
            .write()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))
    }
}

/// True when no key can satisfy both bounds (BTreeMap::range panics on these).
fn bounds_empty(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

/// Lazy cursor over a pinned map: copies one page at a time and resumes
/// after the last key.
struct Cursor {
    snapshot: Arc<Map>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    page: VecDeque<KeyValue>,
    exhausted: bool,
}

impl Cursor {
    fn fill(&mut self) {
        if bounds_empty(&self.lower, &self.upper) {
            self.exhausted = true;
            return;
        }
        let page: VecDeque<KeyValue> = self
            .snapshot
            .range((self.lower.clone(), self.upper.clone()))
            .take(PAGE_SIZE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.exhausted = page.len() < PAGE_SIZE;
        if let Some((last, _)) = page.back() {
            self.lower = Bound::Excluded(last.clone());
        }
        self.page = page;
    }
}

impl Iterator for Cursor {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            self.fill();
        }
        self.page.pop_front().map(Ok)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Arc::make_mut(&mut *self.write()?).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn iterate(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Result<StoreIter<'_>> {
        let snapshot = Arc::clone(&*self.read()?);
        Ok(Box::new(Cursor {
            snapshot,
            lower,
            upper,
            page: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut data = self.write()?;

        // Stage every op first so a failure leaves `data` untouched.
        let mut staged: Map = BTreeMap::new();
        for op in batch.ops {
            match op {
                WriteOp::Put { key, value } => {
                    staged.insert(key, value);
                }
                WriteOp::Insert { key, value } => {
                    if staged.contains_key(&key) || data.contains_key(&key) {
                        return Err(Error::Store(format!(
                            "key {} already exists",
                            String::from_utf8_lossy(&key)
                        )));
                    }
                    staged.insert(key, value);
                }
                WriteOp::Merge { key, operand } => {
                    let merge = self.merge_operator.as_ref().ok_or_else(|| {
                        Error::Store("merge requested but no merge operator is set".to_string())
                    })?;
                    let existing = staged
                        .get(&key)
                        .or_else(|| data.get(&key))
                        .map(Vec::as_slice);
                    let merged = merge(&key, existing, &operand)?;
                    staged.insert(key, merged);
                }
            }
        }

        if !staged.is_empty() {
            Arc::make_mut(&mut *data).extend(staged);
        }
        Ok(())
    }
}
