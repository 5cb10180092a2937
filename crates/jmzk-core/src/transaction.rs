use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::name::{Name, Name128};
use crate::types::{Digest, Signature, Timestamp};

// ── Action ───────────────────────────────────────────────────────────────────

/// One state-mutating operation. `name` picks the handler; `(domain, key)`
/// is the authorization scope the handler asserts against; `data` is the
/// bincode payload interpreted per the registry's current version.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Action {
    pub name: Name,
    pub domain: Name128,
    pub key: Name128,
    pub data: Vec<u8>,
}

impl Action {
    pub fn new<T: Serialize>(name: Name, domain: Name128, key: Name128, payload: &T) -> Self {
        Self {
            name,
            domain,
            key,
            data: bincode::serialize(payload).expect("payload serialization is infallible"),
        }
    }

    pub fn digest(&self) -> Digest {
        Digest::hash_of(self)
    }
}

/// Appended per executed action, in execution order; the block's
/// `action_mroot` is the merkle root over these digests.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub act_digest: Digest,
    pub global_sequence: u64,
}

impl ActionReceipt {
    pub fn digest(&self) -> Digest {
        Digest::hash_of(self)
    }
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// Unsigned transaction body. `ref_block_num`/`ref_block_prefix` bind it to
/// a recent block (TAPOS); `expiration` bounds its lifetime; `max_charge`
/// caps the fee the payer accepts; `payer` is the address billed for it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub expiration: Timestamp,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub actions: Vec<Action>,
    pub payer: Address,
    pub max_charge: u64,
}

impl Transaction {
    /// Transaction id: sha256 of the canonical body.
    pub fn id(&self) -> Digest {
        Digest::hash_of(self)
    }
}

/// A transaction plus its authorizing signatures.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub trx: Transaction,
    pub signatures: Vec<Signature>,
}

impl SignedTransaction {
    pub fn new(trx: Transaction, signatures: Vec<Signature>) -> Self {
        Self { trx, signatures }
    }

    pub fn id(&self) -> Digest {
        self.trx.id()
    }

    /// Distinct from `id`: also covers the signatures, so the same body
    /// signed differently dedups separately in the unapplied set.
    pub fn signed_id(&self) -> Digest {
        Digest::hash_of(self)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{n, n128};

    fn sample_trx() -> Transaction {
        Transaction {
            expiration: 1_000_000,
            ref_block_num: 42,
            ref_block_prefix: 0xdead_beef,
            actions: vec![Action {
                name: n!("transfer"),
                domain: n128!("domain1"),
                key: n128!("t1"),
                data: vec![1, 2, 3],
            }],
            payer: Address::Reserved,
            max_charge: 10_000,
        }
    }

    #[test]
    fn id_is_stable() {
        let trx = sample_trx();
        assert_eq!(trx.id(), trx.id());
    }

    #[test]
    fn id_tracks_body_changes() {
        let a = sample_trx();
        let mut b = sample_trx();
        b.max_charge += 1;
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn signed_id_covers_signatures() {
        let trx = sample_trx();
        let unsigned = SignedTransaction::new(trx.clone(), vec![]);
        let signed = SignedTransaction::new(trx, vec![Signature { rs: [7u8; 64], recovery: 0 }]);
        assert_eq!(unsigned.id(), signed.id());
        assert_ne!(unsigned.signed_id(), signed.signed_id());
    }
}
