//! Master-side cluster draft and the weighted slice allocator
//!
//! A draft lists candidate nodes with weights; deriving a SAT from it
//! is deterministic given the node order and weights. The allocator
//! hands out `256 × replicas` slice tokens round-robin, each node
//! bounded by its weighted share, with a stall-breaking pass that
//! ignores the share once no bounded progress is possible.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use slicedb_common::{Error, Result};

use crate::entry::Entry;
use crate::sat::Sat;

/// A candidate node in a draft
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftNode {
    pub id: String,
    pub addr: String,
    pub weight: u32,
}

/// The master's editable cluster description
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Draft {
    pub replicas: u32,
    #[serde(default)]
    pub nodes: Vec<DraftNode>,
}

/// The 256 two-hex-digit slice names, in order
fn slice_set() -> Vec<String> {
    (0u16..256).map(|i| format!("{i:02x}")).collect()
}

impl Draft {
    /// Create an empty draft with the given replication factor
    pub fn new(replicas: u32) -> Result<Self> {
        let draft = Self {
            replicas,
            nodes: Vec::new(),
        };
        draft.validate()?;
        Ok(draft)
    }

    /// Parse a draft from YAML
    pub fn from_yaml(data: &str) -> Result<Self> {
        let draft: Self = serde_yaml::from_str(data)
            .map_err(|err| Error::InvalidRequest(format!("parse draft: {err}")))?;
        draft.validate()?;
        Ok(draft)
    }

    /// Serialize the draft to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| Error::other(format!("encode draft: {err}")))
    }

    /// Validate replication factor and node uniqueness
    pub fn validate(&self) -> Result<()> {
        if self.replicas < 1 {
            return Err(Error::InvalidRequest("replicas must be >= 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(Error::InvalidRequest(format!(
                    "duplicated node, ID {}",
                    node.id
                )));
            }
        }
        Ok(())
    }

    /// Allocate slices to nodes, producing a SAT.
    ///
    /// Fails when fewer positive-weight nodes exist than replicas.
    pub fn alloc(&self) -> Result<Sat> {
        let working: Vec<&DraftNode> = self.nodes.iter().filter(|n| n.weight > 0).collect();
        let weight_sum: u64 = working.iter().map(|n| u64::from(n.weight)).sum();
        if (working.len() as u32) < self.replicas {
            return Err(Error::InvalidRequest("not enough nodes".into()));
        }

        let mut pool: Vec<String> = Vec::with_capacity(256 * self.replicas as usize);
        for _ in 0..self.replicas {
            pool.extend(slice_set());
        }

        let total = pool.len() as u64;
        let mut slots: Vec<Slot> = self
            .nodes
            .iter()
            .map(|n| Slot {
                target: u64::from(n.weight) * total / weight_sum,
                weight: n.weight,
                held: BTreeSet::new(),
            })
            .collect();

        while !pool.is_empty() {
            let remained = pool.len();
            for slot in &mut slots {
                if slot.is_full() {
                    continue;
                }
                slot.pick_one(&mut pool);
            }
            if pool.len() == remained {
                // every slot hit its share; let any working node overfill
                for slot in &mut slots {
                    if slot.weight == 0 {
                        continue;
                    }
                    slot.pick_one(&mut pool);
                }
            }
        }

        let entries = self
            .nodes
            .iter()
            .zip(slots)
            .map(|(node, slot)| Entry {
                id: node.id.clone(),
                addr: node.addr.clone(),
                slices: slot.held.into_iter().collect(),
            })
            .collect();
        Ok(Sat { entries })
    }
}

struct Slot {
    target: u64,
    weight: u32,
    held: BTreeSet<String>,
}

impl Slot {
    fn is_full(&self) -> bool {
        self.weight == 0 || self.held.len() as u64 >= self.target
    }

    /// Take the first pool token this slot does not already hold
    fn pick_one(&mut self, pool: &mut Vec<String>) {
        if let Some(pos) = pool.iter().position(|slice| !self.held.contains(slice)) {
            self.held.insert(pool.remove(pos));
        }
    }
}
