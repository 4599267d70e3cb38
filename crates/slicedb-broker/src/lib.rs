//! Client-facing quorum broker for SliceDB
//!
//! The broker routes client reads and writes to the replicas the
//! approved spec holds responsible, decides by quorum, and records a
//! fault mark whenever a write leaves a replica behind, so the
//! co-hosted node's heal loop can finish the job.

pub mod broker;
pub mod handler;
pub mod quorum;

pub use broker::Broker;
pub use handler::router;
