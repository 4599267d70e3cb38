//! Background slice sync
//!
//! One worker per node drains the capacity-1 sync mailbox. For each
//! unsynced slice it pulls a framed blob stream from a random peer
//! listed in the *approved* spec; only once every slice succeeded is
//! the revision tagged synced. Sourcing from the approved spec keeps a
//! partially synced node from feeding another during migration.

use rand::seq::SliceRandom;
use slicedb_common::{Error, Result};
use slicedb_spec::TAG_APPROVED;
use slicedb_storage::{blobio, Batch};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::node::Node;
use crate::sync_state;

/// Flush threshold for imported blob batches
const IMPORT_BATCH_LEN: usize = 100;

impl Node {
    pub(crate) async fn sync_loop(&self, mut rx: mpsc::Receiver<u64>, cancel: CancellationToken) {
        info!("enter sync loop");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => {
                    let Some(revision) = request else { break };
                    info!(revision, "sync slices: start");
                    match self.sync_slices(&cancel, revision).await {
                        Ok(()) => info!(revision, "sync slices: completed"),
                        Err(err) => error!(revision, "sync slices: {err}"),
                    }
                }
            }
        }
        info!("leave sync loop");
    }

    /// Sync the slices allocated to this node at `revision`
    async fn sync_slices(&self, cancel: &CancellationToken, revision: u64) -> Result<()> {
        let entry = self
            .sat_entry(revision)?
            .ok_or_else(|| Error::not_found(format!("entry @rev{revision}")))?;
        let approved = self
            .spec_manager()
            .get_by_tag(TAG_APPROVED)?
            .ok_or_else(|| Error::not_found("approved spec"))?;

        let unsynced = sync_state::get_unsynced_slices(self.store().as_ref(), &entry.slices)?;

        let mut synced_count = 0usize;
        for slice in &unsynced {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            // only rely on nodes in the approved spec
            let mut sources = approved.sat.locate(slice);
            sources.shuffle(&mut rand::thread_rng());

            for source in &sources {
                info!(slice = %slice, source = %source, "syncing slice");
                match self.import_remote_blob_slice(&source.addr, slice).await {
                    Ok(count) => {
                        sync_state::set_slices_synced(
                            self.store().as_ref(),
                            false,
                            &[slice.as_str()],
                        )?;
                        synced_count += 1;
                        info!(slice = %slice, source = %source, blobs = count, "synced slice");
                        break;
                    }
                    Err(err) => {
                        // try another node
                        warn!(slice = %slice, source = %source, "sync slice: {err}");
                    }
                }
            }
        }

        if synced_count != unsynced.len() {
            return Err(Error::other("not fully synced"));
        }
        self.spec_manager().tag(revision, slicedb_spec::TAG_SYNCED)
    }

    /// Pull one slice from a peer, batching writes into the store.
    ///
    /// Returns the number of blobs imported.
    async fn import_remote_blob_slice(&self, remote_addr: &str, prefix: &str) -> Result<usize> {
        let mut reader = self.rpc.get_blob_slice(remote_addr, prefix).await?;

        let mut count = 0usize;
        let mut batch = Batch::new();
        while let Some(blob) = blobio::read_frame(&mut reader).await? {
            count += 1;
            blobio::batch_put_blob(&mut batch, &blob);
            if batch.len() >= IMPORT_BATCH_LEN {
                self.store().write_batch(&batch)?;
                batch.reset();
            }
        }
        if !batch.is_empty() {
            self.store().write_batch(&batch)?;
        }
        Ok(count)
    }
}
