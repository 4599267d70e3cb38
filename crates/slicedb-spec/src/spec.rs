//! Versioned cluster spec

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use slicedb_common::{Error, Result};

use crate::sat::Sat;

/// A cluster membership document: revision plus slice allocation table.
///
/// Revisions are append-only: committing a revision twice with
/// different content is an error. Revision 0 is the bootstrap spec and
/// self-approves on propose.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    /// Revision of the spec, usually auto incremental
    pub revision: u64,
    /// Slice allocation table for the whole data collection
    pub sat: Sat,
}

impl Spec {
    /// Validate the spec; entry IDs must be unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.sat.entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::InvalidRequest(format!(
                    "duplicated entry, ID {}",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}
