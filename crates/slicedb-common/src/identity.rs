//! ECDSA-P256 identities for the signed control plane
//!
//! The master and every node are identified by a P-256 key pair. The
//! public identity string is derived from the last 20 bytes of the
//! digest of the SEC1 uncompressed public key. Signatures travel as a
//! hex-encoded JSON record `{r, s, pub}` so the signer can be recovered
//! without a prior key exchange.

use std::sync::OnceLock;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{digest, Hash};

/// Byte offset into the public-key digest where the identity starts
const ID_OFFSET: usize = 12;

/// Signature envelope carried in the control-plane header
#[derive(Serialize, Deserialize)]
struct SignatureEnvelope {
    r: String,
    s: String,
    #[serde(rename = "pub")]
    public: String,
}

fn public_key_to_id(public: &[u8]) -> String {
    hex::encode(&digest(public)[ID_OFFSET..])
}

/// A P-256 key pair identifying a master or a node
#[derive(Clone)]
pub struct Identity {
    key: SigningKey,
    cached_id: OnceLock<String>,
}

impl Identity {
    /// Generate a fresh identity
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
            cached_id: OnceLock::new(),
        }
    }

    /// Restore an identity from its private scalar bytes
    pub fn from_private_key(bytes: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|_| Error::InvalidRequest("invalid private key".into()))?;
        Ok(Self {
            key,
            cached_id: OnceLock::new(),
        })
    }

    /// Private scalar bytes, suitable for persisting
    #[must_use]
    pub fn private_key(&self) -> Vec<u8> {
        self.key.to_bytes().to_vec()
    }

    fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Identity string, derived from the public key and cached
    pub fn id(&self) -> &str {
        self.cached_id
            .get_or_init(|| public_key_to_id(&self.public_key()))
    }

    /// Sign a message digest, returning the serialized envelope
    pub fn sign(&self, msg_hash: &Hash) -> Result<Vec<u8>> {
        let sig: Signature = self
            .key
            .sign_prehash(msg_hash)
            .map_err(|_| Error::BadSignature)?;
        let (r, s) = sig.split_bytes();
        let envelope = SignatureEnvelope {
            r: hex::encode(r),
            s: hex::encode(s),
            public: hex::encode(self.public_key()),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({})", self.id())
    }
}

/// Recover the signer's identity from a message digest and envelope.
///
/// Fails with a signature error when the envelope is malformed or the
/// signature does not verify against the embedded public key.
pub fn recover_id(msg_hash: &Hash, sig: &[u8]) -> Result<String> {
    let envelope: SignatureEnvelope =
        serde_json::from_slice(sig).map_err(|_| Error::BadSignature)?;
    let r = hex::decode(&envelope.r).map_err(|_| Error::BadSignature)?;
    let s = hex::decode(&envelope.s).map_err(|_| Error::BadSignature)?;
    let mut rs = r;
    rs.extend_from_slice(&s);
    let signature = Signature::from_slice(&rs).map_err(|_| Error::BadSignature)?;

    let public = hex::decode(&envelope.public).map_err(|_| Error::BadSignature)?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&public).map_err(|_| Error::BadSignature)?;
    verifying_key
        .verify_prehash(msg_hash, &signature)
        .map_err(|_| Error::BadSignature)?;

    Ok(public_key_to_id(&public))
}

/// Abbreviate a 40-char identity for log output
#[must_use]
pub fn abbrev_id(id: &str) -> String {
    if id.len() == 40 {
        format!("{}…{}", &id[..4], &id[id.len() - 4..])
    } else {
        id.to_string()
    }
}
