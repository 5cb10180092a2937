use jmzk_core::error::ChainError;
use jmzk_core::types::{Digest, PublicKey, Signature};

/// A secp256k1 keypair. Test fixtures and the node's producer identity use
/// this; the chain core itself only ever sees public keys and signatures.
#[derive(Clone)]
pub struct KeyPair {
    secret: libsecp256k1::SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = libsecp256k1::SecretKey::random(&mut rand::thread_rng());
        Self::from_secret(secret)
    }

    /// Deterministic keypair from a 32-byte seed; handy for reproducible
    /// test fixtures.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut digest = Digest::hash_bytes(seed);
        loop {
            if let Ok(secret) = libsecp256k1::SecretKey::parse(&digest.0) {
                return Self::from_secret(secret);
            }
            digest = Digest::hash_bytes(&digest.0);
        }
    }

    fn from_secret(secret: libsecp256k1::SecretKey) -> Self {
        let pk = libsecp256k1::PublicKey::from_secret_key(&secret);
        Self { secret, public_key: PublicKey(pk.serialize_compressed()) }
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        let msg = libsecp256k1::Message::parse(&digest.0);
        let (sig, rec) = libsecp256k1::sign(&msg, &self.secret);
        Signature { rs: sig.serialize(), recovery: rec.serialize() }
    }
}

/// Recover the signing key from a recoverable signature over `digest`.
pub fn recover(digest: &Digest, sig: &Signature) -> Result<PublicKey, ChainError> {
    let msg = libsecp256k1::Message::parse(&digest.0);
    let s = libsecp256k1::Signature::parse_standard(&sig.rs)
        .map_err(|_| ChainError::SignatureRecover)?;
    let rec = libsecp256k1::RecoveryId::parse(sig.recovery)
        .map_err(|_| ChainError::SignatureRecover)?;
    let pk = libsecp256k1::recover(&msg, &s, &rec).map_err(|_| ChainError::SignatureRecover)?;
    Ok(PublicKey(pk.serialize_compressed()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover() {
        let kp = KeyPair::generate();
        let digest = Digest::hash_bytes(b"payload");
        let sig = kp.sign(&digest);
        assert_eq!(recover(&digest, &sig).unwrap(), kp.public_key);
    }

    #[test]
    fn recover_wrong_digest_gives_wrong_key() {
        let kp = KeyPair::generate();
        let sig = kp.sign(&Digest::hash_bytes(b"a"));
        let other = recover(&Digest::hash_bytes(b"b"), &sig).unwrap();
        assert_ne!(other, kp.public_key);
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = KeyPair::from_seed(b"alice");
        let b = KeyPair::from_seed(b"alice");
        assert_eq!(a.public_key, b.public_key);
        assert_ne!(a.public_key, KeyPair::from_seed(b"bob").public_key);
    }

    #[test]
    fn legacy_text_form() {
        let kp = KeyPair::from_seed(b"alice");
        let s = kp.public_key.to_legacy_string();
        assert_eq!(PublicKey::from_legacy_string(&s).unwrap(), kp.public_key);
    }
}
