use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::error::ChainError;

/// Block height. Block 1 is the genesis block.
pub type BlockNum = u32;

/// Fungible symbol id (`S#<id>` in asset strings).
pub type SymbolId = u32;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── Digest ───────────────────────────────────────────────────────────────────

/// 32-byte sha256 digest. Block ids, transaction ids and merkle nodes are
/// all digests.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn hash_bytes(data: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(data);
        Self(h.finalize().into())
    }

    /// sha256 of the canonical bincode serialization.
    pub fn hash_of<T: Serialize>(v: &T) -> Self {
        Self::hash_bytes(&bincode::serialize(v).expect("serialization is infallible"))
    }

    pub fn hash_pair(a: &Digest, b: &Digest) -> Self {
        let mut h = Sha256::new();
        h.update(a.0);
        h.update(b.0);
        Self(h.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(s).map_err(|e| ChainError::Serialization(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ChainError::Serialization("digest must be 32 bytes".into()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}…)", &self.to_hex()[..16])
    }
}

// ── PublicKey ────────────────────────────────────────────────────────────────

/// Compressed secp256k1 (K1) public key, 33 bytes. Displayed in the legacy
/// text form: `EVT` followed by base-58 of key ‖ checksum. Serialized as
/// its raw 33 bytes (serde has no derive for arrays past 32).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 33]);

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;
        impl<'de> serde::de::Visitor<'de> for KeyVisitor {
            type Value = PublicKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "33 key bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<PublicKey, E> {
                if v.len() != 33 {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut b = [0u8; 33];
                b.copy_from_slice(v);
                Ok(PublicKey(b))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<PublicKey, A::Error> {
                let mut b = [0u8; 33];
                for (i, out) in b.iter_mut().enumerate() {
                    *out = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(PublicKey(b))
            }
        }
        deserializer.deserialize_bytes(KeyVisitor)
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn to_legacy_string(&self) -> String {
        let mut buf = self.0.to_vec();
        let check = Digest::hash_bytes(&Digest::hash_bytes(&buf).0);
        buf.extend_from_slice(&check.0[..4]);
        format!("EVT{}", bs58::encode(buf).into_string())
    }

    pub fn from_legacy_string(s: &str) -> Result<Self, ChainError> {
        let body = s.strip_prefix("EVT").ok_or(ChainError::KeyFormat)?;
        let bytes = bs58::decode(body).into_vec().map_err(|_| ChainError::KeyFormat)?;
        if bytes.len() != 37 {
            return Err(ChainError::KeyFormat);
        }
        let check = Digest::hash_bytes(&Digest::hash_bytes(&bytes[..33]).0);
        if check.0[..4] != bytes[33..] {
            return Err(ChainError::KeyFormat);
        }
        let mut arr = [0u8; 33];
        arr.copy_from_slice(&bytes[..33]);
        Ok(Self(arr))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_legacy_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}…)", &self.to_legacy_string()[..12])
    }
}

// ── Signature ────────────────────────────────────────────────────────────────

/// Recoverable ECDSA signature: 64-byte compact form plus the recovery id.
/// Serialized as the canonical 65-byte wire form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub rs: [u8; 64],
    pub recovery: u8,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&self.rs);
        out[64] = self.recovery;
        out
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, ChainError> {
        if b.len() != 65 {
            return Err(ChainError::KeyFormat);
        }
        let mut rs = [0u8; 64];
        rs.copy_from_slice(&b[..64]);
        Ok(Self { rs, recovery: b[64] })
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SigVisitor;
        impl<'de> serde::de::Visitor<'de> for SigVisitor {
            type Value = Signature;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "65 signature bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Signature, E> {
                Signature::from_bytes(v).map_err(|_| E::invalid_length(v.len(), &self))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Signature, A::Error> {
                let mut b = [0u8; 65];
                for (i, out) in b.iter_mut().enumerate() {
                    *out = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(Signature { rs: b[..64].try_into().unwrap(), recovery: b[64] })
            }
        }
        deserializer.deserialize_bytes(SigVisitor)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}…)", &hex::encode(self.rs)[..16])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
