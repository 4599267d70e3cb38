//! Common types for SliceDB
//!
//! Shared building blocks used by every other crate in the workspace:
//! the error taxonomy, the content digest, ECDSA identities for the
//! signed control plane, and the blob/key pair.

pub mod blob;
pub mod error;
pub mod hash;
pub mod identity;

pub use blob::{Blob, Key, KEY_LENGTH, MAX_DATA_LEN};
pub use error::{Error, Result};
pub use hash::{digest, Hash, HASH_LENGTH};
pub use identity::{abbrev_id, recover_id, Identity};
