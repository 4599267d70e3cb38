//! Durable store backend over redb

use std::ops::Bound;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use slicedb_common::{Error, Result};

use crate::range::Range;
use crate::store::{Batch, BatchOp, Store};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("slicedb");

fn storage_err(err: impl std::fmt::Display) -> Error {
    Error::storage(err.to_string())
}

/// A [`Store`] persisted in a single redb file.
///
/// Every commit is durable; redb gives snapshot-isolated readers, which
/// is what paged scans rely on.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) a store file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(storage_err)?;
        // make sure the table exists before the first read
        let txn = db.begin_write().map_err(storage_err)?;
        txn.open_table(TABLE).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;
        Ok(Self { db })
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

impl Store for RedbStore {
    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(TABLE).map_err(storage_err)?;
        let value = table.get(key).map_err(storage_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(TABLE).map_err(storage_err)?;
            table.insert(key, value).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(TABLE).map_err(storage_err)?;
            table.remove(key).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)
    }

    fn write_batch(&self, batch: &Batch) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(TABLE).map_err(storage_err)?;
            for op in batch.ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(storage_err)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(storage_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(storage_err)
    }

    fn scan_page(
        &self,
        range: &Range,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(TABLE).map_err(storage_err)?;
        let mut out = Vec::new();
        for item in table
            .range::<&[u8]>(bounds(range, after))
            .map_err(storage_err)?
        {
            let (key, value) = item.map_err(storage_err)?;
            out.push((key.value().to_vec(), value.value().to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn last_in_range(&self, range: &Range) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(TABLE).map_err(storage_err)?;
        let last = table
            .range::<&[u8]>(bounds(range, None))
            .map_err(storage_err)?
            .next_back();
        match last {
            Some(item) => {
                let (key, value) = item.map_err(storage_err)?;
                Ok(Some((key.value().to_vec(), value.value().to_vec())))
            }
            None => Ok(None),
        }
    }
}
