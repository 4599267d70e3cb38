//! The broker
//!
//! Fans client requests out to the replicas the approved spec locates,
//! decides by quorum, and finishes writes in the background: once the
//! client has its write-quorum answer, the remaining outcomes are
//! drained, delta replicas from a newer proposed spec are written, and
//! any shortfall leaves a persistent fault mark for the heal loop.

use std::sync::Arc;

use slicedb_common::{Blob, Error, Key, Result};
use slicedb_node::NodeRpc;
use slicedb_spec::{Entry, Sat, Spec, SpecManager, TAG_APPROVED};
use slicedb_storage::{mark, Store};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

/// Entry point for client access to the cluster
pub struct Broker {
    store: Arc<dyn Store>,
    spec_mgr: Arc<SpecManager>,
    rpc: NodeRpc,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Broker {
    /// Create a broker sharing the co-hosted node's store
    pub fn new(store: Arc<dyn Store>, spec_mgr: Arc<SpecManager>) -> Self {
        Self {
            store,
            spec_mgr,
            rpc: NodeRpc::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Cancel in-flight work and wait for background tasks
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn approved(&self) -> Result<Spec> {
        self.spec_mgr
            .get_by_tag(TAG_APPROVED)?
            .ok_or_else(|| Error::not_found("approved spec"))
    }

    /// Read a blob by key through a replica quorum
    pub async fn get_blob(&self, key: Key) -> Result<Option<Blob>> {
        let approved = self.approved()?;
        let entries = approved.sat.locate(&key.to_hex());
        let total = entries.len();

        let (vote_tx, mut vote_rx) = mpsc::channel(total.max(1));
        for entry in entries {
            let rpc = self.rpc.clone();
            let cancel = self.cancel.clone();
            let vote_tx = vote_tx.clone();
            self.tasks.spawn(async move {
                let vote = tokio::select! {
                    _ = cancel.cancelled() => Err(()),
                    res = rpc.get_blob(&entry.addr, key) => match res {
                        Ok(found) => Ok(found),
                        Err(err) => {
                            warn!(node = %entry, "get blob from node: {err}");
                            Err(())
                        }
                    }
                };
                let _ = vote_tx.send(vote).await;
            });
        }
        drop(vote_tx);

        crate::quorum::handle_read(&self.cancel, &mut vote_rx, total).await
    }

    /// Write a blob through a replica quorum.
    ///
    /// Returns to the caller as soon as the write quorum is reached;
    /// replica accounting, delta writes, and fault marking continue in
    /// the background.
    pub async fn put_blob(&self, blob: Blob) -> Result<()> {
        let approved = self.approved()?;
        let newest = self
            .spec_mgr
            .get_newest()?
            .ok_or_else(|| Error::not_found("spec"))?;

        let key = blob.key();
        let entries = approved.sat.locate(&key.to_hex());
        let total = entries.len();

        let (vote_tx, mut vote_rx) = mpsc::channel(total.max(1));
        let (result_tx, result_rx) = mpsc::channel(total.max(1));
        for entry in entries {
            let rpc = self.rpc.clone();
            let cancel = self.cancel.clone();
            let blob = blob.clone();
            let vote_tx = vote_tx.clone();
            let result_tx = result_tx.clone();
            self.tasks.spawn(async move {
                let ok = tokio::select! {
                    _ = cancel.cancelled() => false,
                    res = rpc.put_blob(&entry.addr, &blob) => match res {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(node = %entry, "put blob to node: {err}");
                            false
                        }
                    }
                };
                let _ = vote_tx.send(if ok { Ok(()) } else { Err(()) }).await;
                let _ = result_tx.send(ok).await;
            });
        }
        drop(vote_tx);
        drop(result_tx);

        crate::quorum::handle_write(&self.cancel, &mut vote_rx, total).await?;

        // the client is answered; finish accounting in the background
        let store = self.store.clone();
        let rpc = self.rpc.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            complete_put(store, rpc, cancel, approved.sat, newest.sat, blob, result_rx, total)
                .await;
        });
        Ok(())
    }
}

/// Drain every replica outcome, write delta replicas introduced by the
/// newest spec, and persist a fault mark on any shortfall.
#[allow(clippy::too_many_arguments)]
async fn complete_put(
    store: Arc<dyn Store>,
    rpc: NodeRpc,
    cancel: CancellationToken,
    approved: Sat,
    newest: Sat,
    blob: Blob,
    mut result_rx: mpsc::Receiver<bool>,
    total: usize,
) {
    let mut received = 0usize;
    let mut has_fault = false;
    while received < total {
        match result_rx.recv().await {
            Some(ok) => {
                received += 1;
                has_fault |= !ok;
            }
            None => {
                has_fault = true;
                break;
            }
        }
    }

    if !has_fault {
        let hex_key = blob.key().to_hex();
        let delta: Vec<Entry> = newest
            .locate(&hex_key)
            .into_iter()
            .filter(|e| approved.find_entry(&e.id).is_none())
            .collect();

        let puts = delta.iter().map(|entry| {
            let rpc = rpc.clone();
            let cancel = cancel.clone();
            let blob = &blob;
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Canceled),
                    res = rpc.put_blob(&entry.addr, blob) => res,
                }
            }
        });
        for (entry, result) in delta.iter().zip(futures::future::join_all(puts).await) {
            if let Err(err) = result {
                warn!(node = %entry, "put blob to new node: {err}");
                has_fault = true;
            }
        }
    }

    if has_fault {
        if let Err(err) = mark::mark_blob(store.as_ref(), blob.key(), mark::FAULT_MARK) {
            error!("mark fault blob: {err}");
        }
    }
}
