//! Blob storage and wire framing
//!
//! Blobs live in the substrate under the `/` prefix followed by the raw
//! 31-byte key. On the wire, a slice transfer is a concatenation of
//! `(key, 4-byte big-endian length, payload)` records terminated by a
//! single all-zero key. Every record's key is re-derived from its
//! payload on read; a mismatch is fatal for the stream.

use bytes::{BufMut, Bytes, BytesMut};
use slicedb_common::{Blob, Error, Key, Result, KEY_LENGTH, MAX_DATA_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::range::Range;
use crate::store::{Batch, ScanIter, Store};

const BLOB_PREFIX: &[u8] = b"/";

/// Substrate key a blob is stored under
#[must_use]
pub fn store_key(key: Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOB_PREFIX.len() + KEY_LENGTH);
    out.extend_from_slice(BLOB_PREFIX);
    out.extend_from_slice(key.as_bytes());
    out
}

/// Fetch a blob from the store by key
pub fn get_blob(store: &dyn Store, key: Key) -> Result<Option<Blob>> {
    Ok(store.get(&store_key(key))?.map(Blob::new))
}

/// Store a blob under its content key
pub fn put_blob(store: &dyn Store, blob: &Blob) -> Result<()> {
    store.put(&store_key(blob.key()), blob.data())
}

/// Queue a blob write on a batch
pub fn batch_put_blob(batch: &mut Batch, blob: &Blob) {
    batch.put(store_key(blob.key()), blob.data());
}

/// Encode one blob as a wire frame
#[must_use]
pub fn encode_frame(blob: &Blob) -> Bytes {
    let mut buf = BytesMut::with_capacity(KEY_LENGTH + 4 + blob.len());
    buf.put_slice(blob.key().as_bytes());
    buf.put_u32(blob.len() as u32);
    buf.put_slice(blob.data());
    buf.freeze()
}

/// The end-of-stream sentinel frame
#[must_use]
pub fn end_frame() -> Bytes {
    Bytes::from_static(&[0u8; KEY_LENGTH])
}

/// Read one frame from the stream.
///
/// Returns `None` at the sentinel. A record whose key does not match
/// its payload aborts the stream with a key/value mismatch error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Blob>> {
    let mut key_bytes = [0u8; KEY_LENGTH];
    reader.read_exact(&mut key_bytes).await?;
    let key = Key::from_bytes(&key_bytes)?;
    if key == Key::EMPTY {
        return Ok(None);
    }

    let len = reader.read_u32().await? as usize;
    if len > MAX_DATA_LEN {
        return Err(Error::BlobTooLarge(len));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    let blob = Blob::new(data);
    if blob.key() != key {
        return Err(Error::KeyMismatch);
    }
    Ok(Some(blob))
}

/// Range of substrate keys for blobs whose key hex starts with `hex_prefix`
pub fn blob_range(hex_prefix: &str) -> Result<Range> {
    Range::with_hex_prefix(&format!("{}{hex_prefix}", hex::encode(BLOB_PREFIX)))
}

/// Iterator over stored blobs with a hex key prefix
pub struct BlobIter<'a> {
    inner: ScanIter<'a>,
}

impl<'a> BlobIter<'a> {
    #[must_use]
    pub fn new(store: &'a dyn Store, range: Range) -> Self {
        Self {
            inner: ScanIter::new(store, range),
        }
    }
}

impl Iterator for BlobIter<'_> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(|(key, value)| {
            let blob = Blob::new(value);
            if store_key(blob.key()) != key {
                return Err(Error::KeyMismatch);
            }
            Ok(blob)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStore;
    use rand::RngCore;

    #[test]
    fn test_store_round_trip() {
        let store = MemStore::new();
        let blob = Blob::new(b"hello".to_vec());
        put_blob(&store, &blob).unwrap();

        let got = get_blob(&store, blob.key()).unwrap().unwrap();
        assert_eq!(got.data(), blob.data());
        assert!(get_blob(&store, Key::of_data(b"absent")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut rng = rand::thread_rng();
        let mut blobs = Vec::new();
        let mut wire = Vec::new();
        for len in [0usize, 1, 100, 65_536] {
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            let blob = Blob::new(data);
            wire.extend_from_slice(&encode_frame(&blob));
            blobs.push(blob);
        }
        wire.extend_from_slice(&end_frame());

        let mut reader = wire.as_slice();
        for blob in &blobs {
            let got = read_frame(&mut reader).await.unwrap().unwrap();
            assert_eq!(got.data(), blob.data());
        }
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_wire_bytes() {
        // two known payloads, byte-for-byte layout on the wire
        let b1 = Blob::new(vec![0x01]);
        let b2 = Blob::new(vec![0x02, 0x03]);

        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(&b1));
        wire.extend_from_slice(&encode_frame(&b2));
        wire.extend_from_slice(&end_frame());

        let mut expected = Vec::new();
        expected.extend_from_slice(b1.key().as_bytes());
        expected.extend_from_slice(&[0, 0, 0, 1, 0x01]);
        expected.extend_from_slice(b2.key().as_bytes());
        expected.extend_from_slice(&[0, 0, 0, 2, 0x02, 0x03]);
        expected.extend_from_slice(&[0u8; KEY_LENGTH]);
        assert_eq!(wire, expected);

        let mut reader = wire.as_slice();
        let got1 = read_frame(&mut reader).await.unwrap().unwrap();
        let got2 = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(got1.data(), b1.data());
        assert_eq!(got2.data(), b2.data());
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_rejects_key_mismatch() {
        let blob = Blob::new(vec![0xaa, 0xbb]);
        let mut wire = encode_frame(&blob).to_vec();
        wire[0] ^= 0x01; // corrupt the key
        let mut reader = wire.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(Error::KeyMismatch)
        ));
    }

    #[test]
    fn test_blob_iter_by_prefix() {
        let store = MemStore::new();
        let mut keys = Vec::new();
        for i in 0u8..20 {
            let blob = Blob::new(vec![i; 16]);
            keys.push(blob.key());
            put_blob(&store, &blob).unwrap();
        }

        // full scan sees every blob
        let iter = BlobIter::new(&store, blob_range("").unwrap());
        let all: Vec<Blob> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(all.len(), 20);

        // prefix scan sees exactly the matching subset
        let slice = &keys[0].to_hex()[..2];
        let iter = BlobIter::new(&store, blob_range(slice).unwrap());
        let matching: Vec<Blob> = iter.collect::<Result<_>>().unwrap();
        assert!(!matching.is_empty());
        for blob in &matching {
            assert!(blob.key().to_hex().starts_with(slice));
        }
        let expected = keys
            .iter()
            .filter(|k| k.to_hex().starts_with(slice))
            .count();
        assert_eq!(matching.len(), expected);
    }
}
