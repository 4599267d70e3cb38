//! Content digest for SliceDB
//!
//! Blob keys and control-plane signatures are both derived from this
//! 32-byte Blake2b digest.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Length of a digest in bytes
pub const HASH_LENGTH: usize = 32;

/// A 32-byte content digest
pub type Hash = [u8; HASH_LENGTH];

type Blake2b256 = Blake2b<U32>;

/// Compute the digest of arbitrary data
#[must_use]
pub fn digest(data: &[u8]) -> Hash {
    Blake2b256::digest(data).into()
}
