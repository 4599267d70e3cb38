//! Request and response bodies of the node surface

use serde::{Deserialize, Serialize};
use slicedb_common::Key;
use slicedb_spec::Spec;

/// The three named revisions a node reports; -1 means absent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    pub newest: i64,
    pub synced: i64,
    pub approved: i64,
}

/// Node status
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    #[serde(rename = "specRevisions")]
    pub spec_revisions: Revisions,
}

/// Slice sync progress for one revision
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    #[serde(rename = "SyncedSliceCount")]
    pub synced_slice_count: usize,
    #[serde(rename = "TotalSliceCount")]
    pub total_slice_count: usize,
}

/// Body of an invitation request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InviteRequest {
    #[serde(rename = "initSpec")]
    pub init_spec: Option<Spec>,
}

/// Body of an invitation response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteResponse {
    #[serde(rename = "nodeID")]
    pub node_id: String,
}

/// Body of a put-blob response
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PutBlobResponse {
    pub key: Key,
}
