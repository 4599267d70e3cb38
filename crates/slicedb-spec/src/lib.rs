//! Cluster membership model for SliceDB
//!
//! A [`Spec`] is a versioned membership document: a revision plus a
//! slice allocation table assigning the 256 one-byte key prefixes to
//! nodes. The master derives specs from a [`Draft`] through the
//! weighted allocator; every node persists committed specs in its
//! [`SpecManager`], indexed by revision and addressable through the
//! `synced` / `approved` tags.

pub mod draft;
pub mod entry;
pub mod manager;
pub mod sat;
pub mod spec;

pub use draft::{Draft, DraftNode};
pub use entry::Entry;
pub use manager::{SpecManager, TAG_APPROVED, TAG_SYNCED};
pub use sat::Sat;
pub use spec::Spec;
