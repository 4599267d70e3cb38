//! The local node
//!
//! Holds the node identity, cluster membership state, and the two-phase
//! spec lifecycle: a revision is first committed (proposed), then
//! synced once every owned slice is ingested, then approved for
//! serving. Two background loops run per node: the slice sync worker
//! and the fault healer.

use std::sync::Arc;

use parking_lot::Mutex;
use slicedb_common::{Error, Identity, Result};
use slicedb_spec::{Entry, Spec, SpecManager, TAG_APPROVED, TAG_SYNCED};
use slicedb_storage::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::rpc::NodeRpc;
use crate::sync_state;
use crate::types::{Revisions, StatusResponse, SyncStatusResponse};

const NODE_KEY_KEY: &[u8] = b".node-key";
const CLUSTER_ID_KEY: &[u8] = b".cluster-id";

fn get_or_generate_node_key(store: &dyn Store) -> Result<Identity> {
    if let Some(bytes) = store.get(NODE_KEY_KEY)? {
        return Identity::from_private_key(&bytes);
    }
    let identity = Identity::generate();
    store.put(NODE_KEY_KEY, &identity.private_key())?;
    Ok(identity)
}

/// The local SliceDB node
pub struct Node {
    store: Arc<dyn Store>,
    identity: Identity,
    cluster_id: Mutex<String>,
    spec_mgr: Arc<SpecManager>,
    pub(crate) rpc: NodeRpc,

    sync_tx: mpsc::Sender<u64>,
    sync_rx: Mutex<Option<mpsc::Receiver<u64>>>,
    last_sync_request: Mutex<Option<u64>>,

    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Node {
    /// Create a node over its store, loading or generating its identity
    pub fn new(store: Arc<dyn Store>, spec_mgr: Arc<SpecManager>) -> Result<Arc<Self>> {
        let identity = get_or_generate_node_key(store.as_ref())?;
        let cluster_id = store
            .get(CLUSTER_ID_KEY)?
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default();

        let (sync_tx, sync_rx) = mpsc::channel(1);
        Ok(Arc::new(Self {
            store,
            identity,
            cluster_id: Mutex::new(cluster_id),
            spec_mgr,
            rpc: NodeRpc::new(),
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            last_sync_request: Mutex::new(None),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }))
    }

    /// Spawn the sync and heal loops
    pub fn start(self: &Arc<Self>) {
        let Some(sync_rx) = self.sync_rx.lock().take() else {
            return; // already started
        };

        let node = Arc::clone(self);
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            node.sync_loop(sync_rx, cancel).await;
        });

        let node = Arc::clone(self);
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            node.heal_loop(cancel).await;
        });
    }

    /// Stop background loops and wait until they exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Identity of the node
    pub fn id(&self) -> &str {
        self.identity.id()
    }

    /// Cluster the node belongs to, empty before the first invitation
    pub fn cluster_id(&self) -> String {
        self.cluster_id.lock().clone()
    }

    /// Local store shared by the node's blob surface and its co-hosted broker
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Spec manager holding this node's committed revisions
    pub fn spec_manager(&self) -> &Arc<SpecManager> {
        &self.spec_mgr
    }

    /// This node's SAT entry at a committed revision
    pub(crate) fn sat_entry(&self, revision: u64) -> Result<Option<Entry>> {
        let spec = self
            .spec_mgr
            .get_by_revision(revision)?
            .ok_or_else(|| Error::not_found(format!("spec @rev{revision}")))?;
        Ok(spec.sat.find_entry(self.id()).cloned())
    }

    /// Join a cluster.
    ///
    /// The first invitation fixes the cluster ID. Re-invitations must
    /// carry the same cluster ID, and an init spec older than the
    /// currently approved revision is rejected.
    pub fn invite(&self, cluster_id: &str, init_spec: Option<&Spec>) -> Result<()> {
        let mut current = self.cluster_id.lock();
        if !current.is_empty() {
            if *current != cluster_id {
                return Err(Error::InvalidRequest("already in cluster".into()));
            }
            if let (Some(init), Some(approved)) =
                (init_spec, self.spec_mgr.get_by_tag(TAG_APPROVED)?)
            {
                if init.revision < approved.revision {
                    return Err(Error::RevisionTooLow);
                }
            }
        }

        if let Some(init) = init_spec {
            init.validate()?;
            self.spec_mgr.commit(init)?;
            self.spec_mgr.tag(init.revision, TAG_APPROVED)?;
        }

        self.store.put(CLUSTER_ID_KEY, cluster_id.as_bytes())?;
        *current = cluster_id.to_string();
        info!(cluster_id, "joined cluster");
        Ok(())
    }

    /// Current status triple
    pub fn get_status(&self) -> Result<StatusResponse> {
        let rev_of = |spec: Option<Spec>| spec.map_or(-1, |s| s.revision as i64);

        Ok(StatusResponse {
            node_id: self.id().to_string(),
            cluster_id: self.cluster_id(),
            spec_revisions: Revisions {
                newest: rev_of(self.spec_mgr.get_newest()?),
                synced: rev_of(self.spec_mgr.get_by_tag(TAG_SYNCED)?),
                approved: rev_of(self.spec_mgr.get_by_tag(TAG_APPROVED)?),
            },
        })
    }

    /// Slice sync progress against the spec at `revision`
    pub fn get_sync_status(&self, revision: u64) -> Result<SyncStatusResponse> {
        let Some(entry) = self.sat_entry(revision)? else {
            return Ok(SyncStatusResponse::default());
        };

        let unsynced = sync_state::get_unsynced_slices(self.store.as_ref(), &entry.slices)?;
        Ok(SyncStatusResponse {
            synced_slice_count: entry.slices.len() - unsynced.len(),
            total_slice_count: entry.slices.len(),
        })
    }

    /// Commit a proposed spec.
    ///
    /// The proposed revision must not be below the newest committed
    /// one. Revision 0 bootstraps: the node self-approves it and marks
    /// every owned slice synced.
    pub fn propose_spec(&self, spec: &Spec) -> Result<()> {
        spec.validate()?;
        if let Some(newest) = self.spec_mgr.get_newest()? {
            if spec.revision < newest.revision {
                return Err(Error::RevisionTooLow);
            }
        }

        self.spec_mgr.commit(spec)?;

        if spec.revision == 0 {
            let entry = self
                .sat_entry(0)?
                .ok_or_else(|| Error::not_found("entry @rev0"))?;
            sync_state::set_slices_synced(self.store.as_ref(), true, &entry.slices)?;
            self.spec_mgr.tag(0, TAG_SYNCED)?;
            self.spec_mgr.tag(0, TAG_APPROVED)?;
            info!("bootstrapped at revision 0");
        }
        Ok(())
    }

    /// Ask the sync worker to bring the node up to `revision`.
    ///
    /// At most one request is pending; re-requesting the pending
    /// revision is idempotent, any other revision fails with a pending
    /// error.
    pub fn request_sync(&self, revision: u64) -> Result<()> {
        if let Some(synced) = self.spec_mgr.get_by_tag(TAG_SYNCED)? {
            if revision < synced.revision {
                return Err(Error::RevisionTooLow);
            }
        }
        if self.spec_mgr.get_by_revision(revision)?.is_none() {
            return Err(Error::not_found(format!("spec @rev{revision}")));
        }

        let mut last = self.last_sync_request.lock();
        match self.sync_tx.try_send(revision) {
            Ok(()) => {
                *last = Some(revision);
                Ok(())
            }
            Err(_) if *last == Some(revision) => Ok(()),
            Err(_) => Err(Error::SyncPending),
        }
    }

    /// Approve a synced revision for serving.
    ///
    /// Afterwards the persisted synced-slice set is exactly this
    /// node's slice set at `revision`.
    pub fn approve_spec(&self, revision: u64) -> Result<()> {
        let synced = self
            .spec_mgr
            .get_by_tag(TAG_SYNCED)?
            .ok_or_else(|| Error::not_found("synced spec"))?;
        if synced.revision != revision {
            return Err(Error::InvalidRequest("spec not synced".into()));
        }

        self.spec_mgr.tag(revision, TAG_APPROVED)?;
        let entry = self
            .sat_entry(revision)?
            .ok_or_else(|| Error::InvalidRequest("not in cluster".into()))?;
        sync_state::set_slices_synced(self.store.as_ref(), true, &entry.slices)
    }
}
