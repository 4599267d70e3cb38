//! Synced-slice markers
//!
//! A presence-only key under `.synced-slice/` per slice the node has
//! fully ingested. A coarser marker (such as an odd-length prefix left
//! by an earlier allocation) dominates any finer slice it covers.

use slicedb_common::Result;
use slicedb_storage::{Batch, Range, ScanIter, Store};

const SYNCED_SLICE_PREFIX: &str = ".synced-slice/";

fn marker_key(slice: &str) -> Vec<u8> {
    format!("{SYNCED_SLICE_PREFIX}{slice}").into_bytes()
}

/// Mark slices synced as one atomic write.
///
/// With `exclusive`, every existing marker is dropped first, so the
/// persisted set becomes exactly `slices`.
pub fn set_slices_synced<S: AsRef<str>>(
    store: &dyn Store,
    exclusive: bool,
    slices: &[S],
) -> Result<()> {
    let mut batch = Batch::new();
    if exclusive {
        for synced in get_synced_slices(store)? {
            batch.delete(marker_key(&synced));
        }
    }
    for slice in slices {
        batch.put(marker_key(slice.as_ref()), Vec::new());
    }
    store.write_batch(&batch)
}

/// All currently marked slices
pub fn get_synced_slices(store: &dyn Store) -> Result<Vec<String>> {
    let range = Range::with_bytes_prefix(SYNCED_SLICE_PREFIX.as_bytes());
    let mut slices = Vec::new();
    for item in ScanIter::new(store, range) {
        let (key, _) = item?;
        slices.push(String::from_utf8_lossy(&key[SYNCED_SLICE_PREFIX.len()..]).into_owned());
    }
    Ok(slices)
}

/// The subset of `allocated` no synced marker covers
pub fn get_unsynced_slices(store: &dyn Store, allocated: &[String]) -> Result<Vec<String>> {
    let synced = get_synced_slices(store)?;
    Ok(allocated
        .iter()
        .filter(|alloc| !synced.iter().any(|s| alloc.starts_with(s.as_str())))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicedb_storage::MemStore;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_set_and_get() {
        let store = MemStore::new();
        set_slices_synced(&store, false, &["0a", "0b"]).unwrap();
        set_slices_synced(&store, false, &["0c"]).unwrap();
        assert_eq!(get_synced_slices(&store).unwrap(), strings(&["0a", "0b", "0c"]));
    }

    #[test]
    fn test_exclusive_replaces_marker_set() {
        let store = MemStore::new();
        set_slices_synced(&store, false, &["0a", "0b", "0c"]).unwrap();
        set_slices_synced(&store, true, &["11", "22"]).unwrap();
        assert_eq!(get_synced_slices(&store).unwrap(), strings(&["11", "22"]));
    }

    #[test]
    fn test_unsynced_subset() {
        let store = MemStore::new();
        set_slices_synced(&store, false, &["0a"]).unwrap();
        let allocated = strings(&["0a", "0b"]);
        assert_eq!(
            get_unsynced_slices(&store, &allocated).unwrap(),
            strings(&["0b"])
        );
    }

    #[test]
    fn test_coarse_marker_dominates() {
        let store = MemStore::new();
        // a one-nibble marker covers all sixteen finer slices
        set_slices_synced(&store, false, &["0"]).unwrap();
        let allocated = strings(&["00", "0f", "10"]);
        assert_eq!(
            get_unsynced_slices(&store, &allocated).unwrap(),
            strings(&["10"])
        );
    }
}
