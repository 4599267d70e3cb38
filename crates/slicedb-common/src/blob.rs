//! Content-addressable blobs and their keys
//!
//! A blob is an immutable payload of at most 64 KiB. Its key is the
//! first 31 bytes of the payload digest; the missing byte leaves room
//! for future key-space extension. The all-zero key never addresses a
//! real blob and doubles as the end-of-stream sentinel in slice
//! transfers.

use std::fmt;
use std::sync::OnceLock;

use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::hash::{digest, HASH_LENGTH};

/// Length of a blob key in bytes
pub const KEY_LENGTH: usize = HASH_LENGTH - 1;

/// Hard upper bound on blob payload length
pub const MAX_DATA_LEN: usize = 64 * 1024;

/// Key of a blob, derived from the blob payload
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Key([u8; KEY_LENGTH]);

impl Key {
    /// The reserved all-zero key, used as the end-of-stream sentinel
    pub const EMPTY: Key = Key([0u8; KEY_LENGTH]);

    /// Compute the key of a payload
    #[must_use]
    pub fn of_data(data: &[u8]) -> Self {
        let hash = digest(data);
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&hash[..KEY_LENGTH]);
        Self(key)
    }

    /// Create a key from raw bytes, validating the length
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(Error::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parse a lowercase hex string (without prefix) into a key
    pub fn parse_hex(s: &str) -> Result<Self> {
        let bin = hex::decode(s)?;
        Self::from_bytes(&bin)
    }

    /// Hex form of the key (without prefix)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_hex())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s).map_err(D::Error::custom)
    }
}

/// An immutable blob payload with its lazily computed key
#[derive(Clone)]
pub struct Blob {
    data: Bytes,
    cached_key: OnceLock<Key>,
}

impl Blob {
    /// Construct a blob from a payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            cached_key: OnceLock::new(),
        }
    }

    /// Blob payload
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Key of the blob payload; computed on first use and cached
    pub fn key(&self) -> Key {
        *self.cached_key.get_or_init(|| Key::of_data(&self.data))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes, key {})", self.data.len(), self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hex_round_trip() {
        let key = Key::of_data(&[]);
        let parsed = Key::parse_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_key_rejects_bad_input() {
        assert!(Key::parse_hex("zz").is_err());
        assert!(Key::parse_hex("abcd").is_err()); // wrong length
        assert!(Key::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_key_json() {
        let key = Key::of_data(b"payload");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_blob_key_not_empty() {
        let blob = Blob::new(vec![1u8, 2, 3]);
        assert_ne!(blob.key(), Key::EMPTY);
        // cached key stays stable
        assert_eq!(blob.key(), Key::of_data(&[1, 2, 3]));
    }
}
