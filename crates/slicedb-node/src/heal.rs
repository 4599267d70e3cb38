//! Background fault healing
//!
//! Every ten seconds the healer walks the fault-marked blob keys and
//! rebroadcasts each blob to its responsible replicas. During a
//! migration the target set widens to the union of the approved
//! entries and the newest-only entries, so new replicas catch up
//! without waiting for the sync loop. A mark is cleared only when
//! every remote put succeeded; otherwise it is retried next tick.

use std::time::Duration;

use slicedb_common::{Blob, Error, Key, Result};
use slicedb_spec::{Entry, TAG_APPROVED};
use slicedb_storage::{blobio, mark};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::node::Node;

const HEAL_INTERVAL: Duration = Duration::from_secs(10);

impl Node {
    pub(crate) async fn heal_loop(&self, cancel: CancellationToken) {
        info!("enter faults-healing loop");
        let mut ticker = tokio::time::interval(HEAL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.heal_faults(&cancel).await {
                        error!("faults-healing: {err}");
                    }
                }
            }
        }
        info!("leave faults-healing loop");
    }

    /// One healing pass over all fault-marked keys
    pub(crate) async fn heal_faults(&self, cancel: &CancellationToken) -> Result<()> {
        let mut keys = Vec::new();
        for item in mark::marked_blob_keys(self.store().as_ref(), mark::FAULT_MARK) {
            match item {
                Ok(key) => keys.push(key),
                Err(err) => warn!("heal faults: {err}"),
            }
        }

        let total = keys.len();
        let mut healed = 0usize;
        for key in keys {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            let Some(blob) = blobio::get_blob(self.store().as_ref(), key)? else {
                warn!(key = %key, "heal faults: blob not found locally");
                continue;
            };

            let targets = self.locate_blob(key)?;
            match self.broadcast_blob(&blob, &targets).await {
                Ok(()) => {
                    mark::unmark_blob(self.store().as_ref(), key, mark::FAULT_MARK)?;
                    healed += 1;
                }
                Err(err) => {
                    // keep the mark, move on; next tick retries
                    warn!(key = %key, "heal faults: {err}");
                }
            }
        }

        if total > 0 {
            info!("heal faults: healed {healed}/{total}");
        }
        Ok(())
    }

    /// Replica entries responsible for a blob, from the approved spec
    /// widened with newest-only entries during a migration
    fn locate_blob(&self, key: Key) -> Result<Vec<Entry>> {
        let approved = self
            .spec_manager()
            .get_by_tag(TAG_APPROVED)?
            .ok_or_else(|| Error::not_found("approved spec"))?;
        let newest = self
            .spec_manager()
            .get_newest()?
            .ok_or_else(|| Error::not_found("spec"))?;

        let hex_key = key.to_hex();
        let mut entries = approved.sat.locate(&hex_key);
        if newest.revision != approved.revision {
            for entry in newest.sat.locate(&hex_key) {
                if approved.sat.find_entry(&entry.id).is_none() {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Put a blob to every remote entry; all must succeed
    async fn broadcast_blob(&self, blob: &Blob, entries: &[Entry]) -> Result<()> {
        for entry in entries {
            if entry.id == self.id() {
                continue;
            }
            self.rpc.put_blob(&entry.addr, blob).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use slicedb_spec::{Sat, Spec, SpecManager};
    use slicedb_storage::{MemStore, Store};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::node::Node;

    async fn served_node() -> (Arc<Node>, Arc<dyn Store>, String) {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let spec_mgr = Arc::new(SpecManager::new(store.clone()));
        let node = Node::new(store.clone(), spec_mgr).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let app = crate::handler::router(node.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (node, store, addr)
    }

    fn two_node_spec(a: &Node, a_addr: &str, b: &Node, b_addr: &str) -> Spec {
        let slices: Vec<String> = (0u16..256).map(|i| format!("{i:02x}")).collect();
        Spec {
            revision: 0,
            sat: Sat {
                entries: vec![
                    Entry {
                        id: a.id().to_string(),
                        addr: a_addr.to_string(),
                        slices: slices.clone(),
                    },
                    Entry {
                        id: b.id().to_string(),
                        addr: b_addr.to_string(),
                        slices,
                    },
                ],
            },
        }
    }

    #[tokio::test]
    async fn test_heal_rebroadcasts_and_clears_mark() {
        let (a, a_store, a_addr) = served_node().await;
        let (b, b_store, b_addr) = served_node().await;

        let spec = two_node_spec(&a, &a_addr, &b, &b_addr);
        a.propose_spec(&spec).unwrap();
        b.propose_spec(&spec).unwrap();

        // a blob that reached A but never made it to B
        let blob = Blob::new(b"owed to the second replica".to_vec());
        blobio::put_blob(a_store.as_ref(), &blob).unwrap();
        mark::mark_blob(a_store.as_ref(), blob.key(), mark::FAULT_MARK).unwrap();

        a.heal_faults(&CancellationToken::new()).await.unwrap();

        let healed = blobio::get_blob(b_store.as_ref(), blob.key())
            .unwrap()
            .expect("blob not replicated to peer");
        assert_eq!(healed.data(), blob.data());
        assert!(mark::marked_blob_keys(a_store.as_ref(), mark::FAULT_MARK)
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn test_heal_keeps_mark_when_peer_unreachable() {
        let (a, a_store, a_addr) = served_node().await;
        let (b, _b_store, _) = served_node().await;

        // B's entry points at a dead address
        let spec = two_node_spec(&a, &a_addr, &b, "127.0.0.1:1");
        a.propose_spec(&spec).unwrap();

        let blob = Blob::new(b"stuck".to_vec());
        blobio::put_blob(a_store.as_ref(), &blob).unwrap();
        mark::mark_blob(a_store.as_ref(), blob.key(), mark::FAULT_MARK).unwrap();

        a.heal_faults(&CancellationToken::new()).await.unwrap();

        // the pass completes but the mark survives for the next tick
        let marked: Vec<Key> = mark::marked_blob_keys(a_store.as_ref(), mark::FAULT_MARK)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(marked, vec![blob.key()]);
    }

    #[tokio::test]
    async fn test_heal_skips_locally_missing_blob() {
        let (a, a_store, a_addr) = served_node().await;
        let (b, _b_store, b_addr) = served_node().await;

        let spec = two_node_spec(&a, &a_addr, &b, &b_addr);
        a.propose_spec(&spec).unwrap();

        let key = Key::of_data(b"never stored");
        mark::mark_blob(a_store.as_ref(), key, mark::FAULT_MARK).unwrap();

        a.heal_faults(&CancellationToken::new()).await.unwrap();

        // nothing to send, the mark stays
        let marked: Vec<Key> = mark::marked_blob_keys(a_store.as_ref(), mark::FAULT_MARK)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(marked, vec![key]);
    }
}
