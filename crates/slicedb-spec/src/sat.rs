//! Slice allocation table

use serde::{Deserialize, Serialize};

use crate::entry::Entry;

/// The assignment of slices to nodes for one spec
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sat {
    pub entries: Vec<Entry>,
}

impl Sat {
    /// Find an entry by node ID
    #[must_use]
    pub fn find_entry(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// All entries responsible for the key given in hex form
    #[must_use]
    pub fn locate(&self, hex_key: &str) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.contains_key(hex_key))
            .cloned()
            .collect()
    }
}
