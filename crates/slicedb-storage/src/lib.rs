//! Ordered key-value substrate and blob I/O for SliceDB
//!
//! The [`Store`] trait abstracts any ordered byte-keyed store offering
//! point reads/writes, atomic batches, and range scans. Two backends
//! are provided: a durable redb file store and an in-memory store for
//! tests and dev mode. On top of the substrate, [`blobio`] implements
//! the content-addressed blob contract and the wire framing used for
//! slice transfer, and [`mark`] the persistent fault marks.

pub mod blobio;
pub mod mark;
pub mod memory;
pub mod range;
pub mod redb_store;
pub mod store;

pub use memory::MemStore;
pub use range::Range;
pub use redb_store::RedbStore;
pub use store::{Batch, BatchOp, ScanIter, Store};
