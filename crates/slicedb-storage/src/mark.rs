//! Persistent blob marks
//!
//! A mark is a presence-only key under `.marks/<mark>` suffixed with
//! the raw blob key. The fault mark records blobs that still owe
//! replication to at least one intended replica.

use slicedb_common::{Error, Key, Result, KEY_LENGTH};

use crate::range::Range;
use crate::store::{ScanIter, Store};

/// Mark for blobs that must be rebroadcast by the heal loop
pub const FAULT_MARK: &str = "fault";

const MARK_PREFIX: &str = ".marks/";

fn mark_key(key: Key, mark: &str) -> Vec<u8> {
    let mut out = format!("{MARK_PREFIX}{mark}").into_bytes();
    out.extend_from_slice(key.as_bytes());
    out
}

/// Set a mark on a blob key
pub fn mark_blob(store: &dyn Store, key: Key, mark: &str) -> Result<()> {
    store.put(&mark_key(key, mark), &[])
}

/// Clear a mark from a blob key
pub fn unmark_blob(store: &dyn Store, key: Key, mark: &str) -> Result<()> {
    store.delete(&mark_key(key, mark))
}

/// Iterate every blob key carrying `mark`
#[must_use]
pub fn marked_blob_keys<'a>(store: &'a dyn Store, mark: &str) -> MarkIter<'a> {
    let prefix = format!("{MARK_PREFIX}{mark}");
    MarkIter {
        prefix_len: prefix.len(),
        inner: ScanIter::new(store, Range::with_bytes_prefix(prefix.as_bytes())),
    }
}

/// Iterator over marked blob keys
pub struct MarkIter<'a> {
    prefix_len: usize,
    inner: ScanIter<'a>,
}

impl Iterator for MarkIter<'_> {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(|(store_key, _)| {
            if store_key.len() - self.prefix_len != KEY_LENGTH {
                return Err(Error::InvalidKey("malformed blob mark".into()));
            }
            Key::from_bytes(&store_key[self.prefix_len..])
        }))
    }
}
