//! The ordered key-value store contract
//!
//! Any store offering point reads/writes, atomic batches, and ordered
//! range access over byte keys can back a SliceDB node. Scans are
//! paged: each page reads from a fresh snapshot, so iteration is never
//! invalidated by concurrent mutation.

use slicedb_common::Result;

use crate::range::Range;

/// Number of pairs fetched per scan page
pub const SCAN_PAGE_SIZE: usize = 64;

/// A single pending batch operation
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A set of writes applied atomically
#[derive(Clone, Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a delete
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Pending operation count
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Clear pending operations
    pub fn reset(&mut self) {
        self.ops.clear();
    }

    /// Pending operations in insertion order
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Interface of the ordered key-value substrate
pub trait Store: Send + Sync + 'static {
    /// Whether a key exists
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// Retrieve the value for a key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any previous one
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete the value for a key; absent keys are not an error
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply a batch of writes atomically
    fn write_batch(&self, batch: &Batch) -> Result<()>;

    /// Read up to `limit` pairs from `range`, strictly after `after`
    /// when given, in ascending key order
    fn scan_page(
        &self,
        range: &Range,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// The greatest pair within `range`, if any
    fn last_in_range(&self, range: &Range) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Paged iterator over a key range
pub struct ScanIter<'a> {
    store: &'a dyn Store,
    range: Range,
    after: Option<Vec<u8>>,
    buf: std::collections::VecDeque<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl<'a> ScanIter<'a> {
    #[must_use]
    pub fn new(store: &'a dyn Store, range: Range) -> Self {
        Self {
            store,
            range,
            after: None,
            buf: std::collections::VecDeque::new(),
            done: false,
        }
    }
}

impl Iterator for ScanIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.done {
            let page =
                match self
                    .store
                    .scan_page(&self.range, self.after.as_deref(), SCAN_PAGE_SIZE)
                {
                    Ok(page) => page,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                };
            if page.len() < SCAN_PAGE_SIZE {
                self.done = true;
            }
            if let Some((key, _)) = page.last() {
                self.after = Some(key.clone());
            }
            self.buf.extend(page);
        }
        self.buf.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStore;

    #[test]
    fn test_scan_iter_pages_through() {
        let store = MemStore::new();
        for i in 0..(SCAN_PAGE_SIZE as u32 * 2 + 3) {
            store.put(format!("k/{i:08}").as_bytes(), &i.to_be_bytes()).unwrap();
        }
        store.put(b"other", b"x").unwrap();

        let iter = ScanIter::new(&store, Range::with_bytes_prefix(b"k/"));
        let pairs: Vec<_> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(pairs.len(), SCAN_PAGE_SIZE * 2 + 3);
        assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
