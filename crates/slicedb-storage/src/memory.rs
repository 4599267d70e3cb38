//! In-memory store backend for tests and dev mode

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;
use slicedb_common::Result;

use crate::range::Range;
use crate::store::{Batch, BatchOp, Store};

/// A [`Store`] over an in-process ordered map
#[derive(Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn bounds<'a>(range: &'a Range, after: Option<&'a [u8]>) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    let lower = match after {
        Some(key) => Bound::Excluded(key),
        None => Bound::Included(range.start()),
    };
    let upper = match range.end() {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    };
    (lower, upper)
}

impl Store for MemStore {
    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: &Batch) -> Result<()> {
        let mut map = self.map.write();
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }

    fn scan_page(
        &self,
        range: &Range,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>(bounds(range, after))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last_in_range(&self, range: &Range) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>(bounds(range, None))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}
