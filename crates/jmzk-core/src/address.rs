use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChainError;
use crate::name::{Name, Name128};
use crate::types::{PublicKey, SymbolId};

/// An address is either a public key, the reserved sentinel (the "destroyed
/// owner"), or a deterministic generated address owned by a system entity
/// such as `.fungible/<sym_id>` or `.lock/<name>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Address {
    Reserved,
    PublicKey(PublicKey),
    Generated { prefix: Name, key: Name128, nonce: u32 },
}

impl Address {
    pub fn generated(prefix: Name, key: Name128, nonce: u32) -> Self {
        Address::Generated { prefix, key, nonce }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, Address::Reserved)
    }

    pub fn is_public_key(&self) -> bool {
        matches!(self, Address::PublicKey(_))
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Address::Generated { .. })
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        match self {
            Address::PublicKey(pk) => Some(pk),
            _ => None,
        }
    }

    pub fn generated_prefix(&self) -> Option<Name> {
        match self {
            Address::Generated { prefix, .. } => Some(*prefix),
            _ => None,
        }
    }

    /// Canonical 33-byte encoding shared by the assets keyspace and wire
    /// format. Compressed public keys always lead with 0x02/0x03, which
    /// leaves 0x00 for the reserved sentinel and 0x01 for generated
    /// addresses.
    pub fn to_key_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        match self {
            Address::Reserved => {}
            Address::PublicKey(pk) => out.copy_from_slice(pk.as_bytes()),
            Address::Generated { prefix, key, nonce } => {
                out[0] = 1;
                out[1..9].copy_from_slice(&prefix.0.to_be_bytes());
                out[9..25].copy_from_slice(&key.0.to_be_bytes());
                out[25..29].copy_from_slice(&nonce.to_be_bytes());
            }
        }
        out
    }

    pub fn from_key_bytes(b: &[u8; 33]) -> Result<Self, ChainError> {
        match b[0] {
            0 => {
                if b.iter().any(|&x| x != 0) {
                    return Err(ChainError::AddressFormat);
                }
                Ok(Address::Reserved)
            }
            1 => {
                if b[29..].iter().any(|&x| x != 0) {
                    return Err(ChainError::AddressFormat);
                }
                let prefix = Name(u64::from_be_bytes(b[1..9].try_into().unwrap()));
                let key = Name128(u128::from_be_bytes(b[9..25].try_into().unwrap()));
                let nonce = u32::from_be_bytes(b[25..29].try_into().unwrap());
                Ok(Address::Generated { prefix, key, nonce })
            }
            2 | 3 => {
                let mut arr = [0u8; 33];
                arr.copy_from_slice(b);
                Ok(Address::PublicKey(PublicKey(arr)))
            }
            _ => Err(ChainError::AddressFormat),
        }
    }
}

impl From<PublicKey> for Address {
    fn from(pk: PublicKey) -> Self {
        Address::PublicKey(pk)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Reserved => write!(f, "EVT00000000000000000000000000000000000000000000000000"),
            Address::PublicKey(pk) => write!(f, "{pk}"),
            Address::Generated { prefix, key, nonce } => write!(f, "{prefix}/{key}#{nonce}"),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

// ── Well-known system addresses ──────────────────────────────────────────────

/// The fungible's own address holds its un-issued supply.
pub fn fungible_address(sym_id: SymbolId) -> Address {
    Address::generated(crate::n!(".fungible"), Name128::from_number(sym_id as u128), 0)
}

/// Escrowed lock assets are parked here until `tryunlock`.
pub fn lock_address(name: Name128) -> Address {
    Address::generated(crate::n!(".lock"), name, 0)
}

/// Accumulated passive-bonus funds for a fungible.
pub fn bonus_address(sym_id: SymbolId, round: u32) -> Address {
    Address::generated(crate::n!(".psvbonus"), Name128::from_number(sym_id as u128), round)
}

/// A validator's commission account.
pub fn validator_address(name: Name128, sym_id: SymbolId) -> Address {
    Address::generated(crate::n!(".validator"), name, sym_id)
}

/// The global staking pool account.
pub fn staking_address() -> Address {
    Address::generated(crate::n!(".staking"), Name128::default(), 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::n128;

    #[test]
    fn key_bytes_roundtrip() {
        let cases = [
            Address::Reserved,
            Address::PublicKey(PublicKey([2u8; 33])),
            fungible_address(3),
            lock_address(n128!("nftlock")),
            bonus_address(3, 7),
        ];
        for addr in cases {
            let b = addr.to_key_bytes();
            assert_eq!(Address::from_key_bytes(&b).unwrap(), addr);
        }
    }

    #[test]
    fn reserved_is_all_zero() {
        assert_eq!(Address::Reserved.to_key_bytes(), [0u8; 33]);
    }

    #[test]
    fn generated_addresses_distinct() {
        assert_ne!(fungible_address(1).to_key_bytes(), fungible_address(2).to_key_bytes());
        assert_ne!(bonus_address(3, 0).to_key_bytes(), bonus_address(3, 1).to_key_bytes());
    }

    #[test]
    fn bad_tag_rejected() {
        let mut b = [0u8; 33];
        b[0] = 9;
        assert!(Address::from_key_bytes(&b).is_err());
    }
}
