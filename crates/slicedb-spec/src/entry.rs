//! One node's row in the slice allocation table

use std::fmt;

use serde::{Deserialize, Serialize};

/// A SAT entry: a node and the slices it is responsible for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Node identity
    #[serde(rename = "ID")]
    pub id: String,
    /// Node address, `host:port`
    #[serde(rename = "Addr")]
    pub addr: String,
    /// Owned slices, two lowercase hex digits each, sorted ascending
    #[serde(rename = "slices")]
    pub slices: Vec<String>,
}

impl Entry {
    /// Whether this entry is responsible for the key given in hex form
    #[must_use]
    pub fn contains_key(&self, hex_key: &str) -> bool {
        self.slices.iter().any(|slice| hex_key.starts_with(slice))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
