//! Persistent, revision-indexed spec store
//!
//! Specs are committed as JSON under `.spec/rev/<10-digit revision>`;
//! named tags under `.spec/tags/<tag>` point at revisions. The newest
//! spec and tag lookups are cached; the newest cache clears on every
//! commit, a tag's cache entry on every tag write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use slicedb_common::{Error, Result};
use slicedb_storage::{Range, Store};

use crate::spec::Spec;

/// Tag naming the greatest fully ingested revision
pub const TAG_SYNCED: &str = "synced";
/// Tag naming the revision serving reads and writes
pub const TAG_APPROVED: &str = "approved";

const REVISION_PREFIX: &str = ".spec/rev/";
const TAG_PREFIX: &str = ".spec/tags/";

fn revision_key(revision: u64) -> Vec<u8> {
    format!("{REVISION_PREFIX}{revision:010}").into_bytes()
}

fn tag_key(tag: &str) -> Vec<u8> {
    format!("{TAG_PREFIX}{tag}").into_bytes()
}

/// Manages cluster specs in the key-value substrate
pub struct SpecManager {
    store: Arc<dyn Store>,
    newest_cache: Mutex<Option<Spec>>,
    tag_cache: Mutex<HashMap<String, Spec>>,
}

impl SpecManager {
    /// Create a spec manager over a store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            newest_cache: Mutex::new(None),
            tag_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get a spec by revision
    pub fn get_by_revision(&self, revision: u64) -> Result<Option<Spec>> {
        match self.store.get(&revision_key(revision))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Store a spec, retrievable afterwards by its revision.
    ///
    /// Committing the same bytes at the same revision is a no-op;
    /// committing different bytes at an occupied revision fails.
    pub fn commit(&self, spec: &Spec) -> Result<()> {
        let data = serde_json::to_vec(spec)?;
        let key = revision_key(spec.revision);

        if let Some(existing) = self.store.get(&key)? {
            if existing != data {
                return Err(Error::InconsistentSpec);
            }
            return Ok(());
        }

        self.store.put(&key, &data)?;
        *self.newest_cache.lock() = None;
        Ok(())
    }

    /// The spec with the greatest committed revision
    pub fn get_newest(&self) -> Result<Option<Spec>> {
        if let Some(spec) = self.newest_cache.lock().clone() {
            return Ok(Some(spec));
        }

        let range = Range::with_bytes_prefix(REVISION_PREFIX.as_bytes());
        match self.store.last_in_range(&range)? {
            Some((_, data)) => {
                let spec: Spec = serde_json::from_slice(&data)?;
                *self.newest_cache.lock() = Some(spec.clone());
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// Point `tag` at a committed revision; the latest write wins
    pub fn tag(&self, revision: u64, tag: &str) -> Result<()> {
        if !self.store.has(&revision_key(revision))? {
            return Err(Error::not_found(format!("revision {revision}")));
        }
        self.store.put(&tag_key(tag), revision.to_string().as_bytes())?;
        self.tag_cache.lock().remove(tag);
        Ok(())
    }

    /// Resolve a tag to its spec
    pub fn get_by_tag(&self, tag: &str) -> Result<Option<Spec>> {
        if let Some(spec) = self.tag_cache.lock().get(tag).cloned() {
            return Ok(Some(spec));
        }

        let Some(value) = self.store.get(&tag_key(tag))? else {
            return Ok(None);
        };
        let revision: u64 = String::from_utf8_lossy(&value)
            .parse()
            .map_err(|_| Error::storage(format!("corrupt tag {tag}")))?;

        let spec = self.get_by_revision(revision)?;
        if let Some(spec) = &spec {
            self.tag_cache.lock().insert(tag.to_string(), spec.clone());
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::sat::Sat;
    use slicedb_storage::MemStore;

    fn manager() -> SpecManager {
        SpecManager::new(Arc::new(MemStore::new()))
    }

    fn spec(revision: u64, id: &str) -> Spec {
        Spec {
            revision,
            sat: Sat {
                entries: vec![Entry {
                    id: id.into(),
                    addr: "a:1".into(),
                    slices: vec!["00".into()],
                }],
            },
        }
    }

    #[test]
    fn test_commit_and_get() {
        let mgr = manager();
        assert!(mgr.get_by_revision(1).unwrap().is_none());

        let s = spec(1, "n1");
        mgr.commit(&s).unwrap();
        assert_eq!(mgr.get_by_revision(1).unwrap().unwrap(), s);
    }

    #[test]
    fn test_commit_idempotent_for_equal_content() {
        let mgr = manager();
        let s = spec(1, "n1");
        mgr.commit(&s).unwrap();
        mgr.commit(&s).unwrap();

        assert!(matches!(
            mgr.commit(&spec(1, "other")),
            Err(Error::InconsistentSpec)
        ));
        // original content untouched
        assert_eq!(mgr.get_by_revision(1).unwrap().unwrap(), s);
    }

    #[test]
    fn test_get_newest_tracks_commits() {
        let mgr = manager();
        assert!(mgr.get_newest().unwrap().is_none());

        mgr.commit(&spec(2, "n1")).unwrap();
        assert_eq!(mgr.get_newest().unwrap().unwrap().revision, 2);

        // the cache must be invalidated by the later commit
        mgr.commit(&spec(10, "n1")).unwrap();
        assert_eq!(mgr.get_newest().unwrap().unwrap().revision, 10);

        mgr.commit(&spec(5, "n1")).unwrap();
        assert_eq!(mgr.get_newest().unwrap().unwrap().revision, 10);
    }

    #[test]
    fn test_tag_requires_committed_revision() {
        let mgr = manager();
        assert!(mgr.tag(7, TAG_SYNCED).unwrap_err().is_not_found());

        mgr.commit(&spec(7, "n1")).unwrap();
        mgr.tag(7, TAG_SYNCED).unwrap();
        assert_eq!(mgr.get_by_tag(TAG_SYNCED).unwrap().unwrap().revision, 7);
        assert!(mgr.get_by_tag(TAG_APPROVED).unwrap().is_none());
    }

    #[test]
    fn test_tag_latest_write_wins() {
        let mgr = manager();
        mgr.commit(&spec(1, "n1")).unwrap();
        mgr.commit(&spec(2, "n1")).unwrap();

        mgr.tag(1, TAG_APPROVED).unwrap();
        assert_eq!(mgr.get_by_tag(TAG_APPROVED).unwrap().unwrap().revision, 1);

        // retag must invalidate the cached spec
        mgr.tag(2, TAG_APPROVED).unwrap();
        assert_eq!(mgr.get_by_tag(TAG_APPROVED).unwrap().unwrap().revision, 2);
    }
}
