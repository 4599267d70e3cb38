//! SliceDB node engine
//!
//! A node persists committed specs, serves blobs from its local store,
//! pulls slices from peers to catch up with a proposed spec, and heals
//! failed replications in the background. Control requests from the
//! master arrive over the signed `/node/` HTTP surface.

pub mod handler;
pub mod node;
pub mod rpc;
pub mod sync_state;
pub mod types;

mod heal;
mod sync;

pub use handler::{router, ApiError, SIGNATURE_HEADER, TARGET_ID_HEADER};
pub use node::Node;
pub use rpc::NodeRpc;
pub use types::{
    InviteRequest, InviteResponse, PutBlobResponse, Revisions, StatusResponse, SyncStatusResponse,
};
