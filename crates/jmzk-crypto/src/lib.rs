//! jmzk-crypto — secp256k1 (K1) keypairs and recoverable ECDSA signatures.
//! Signing covers 32-byte sha256 digests; verification recovers the public
//! key from the signature, so transactions carry no explicit key list.

pub mod keypair;

pub use keypair::{recover, KeyPair};
