use serde::{Deserialize, Serialize};

use crate::name::Name128;
use crate::transaction::SignedTransaction;
use crate::types::{BlockNum, Digest, PublicKey, Signature, Timestamp};

/// Milliseconds per block slot.
pub const BLOCK_INTERVAL_MS: i64 = 500;

/// Slot epoch: 2000-01-01T00:00:00Z in unix milliseconds.
pub const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;

// ── BlockTimestamp ───────────────────────────────────────────────────────────

/// Half-second slots since the year-2000 epoch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default, Debug)]
pub struct BlockTimestamp(pub u32);

impl BlockTimestamp {
    pub fn from_unix(secs: Timestamp) -> Self {
        let ms = secs * 1000 - BLOCK_TIMESTAMP_EPOCH_MS;
        Self((ms / BLOCK_INTERVAL_MS) as u32)
    }

    pub fn to_unix(&self) -> Timestamp {
        (self.0 as i64 * BLOCK_INTERVAL_MS + BLOCK_TIMESTAMP_EPOCH_MS) / 1000
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

// ── Producer schedule ────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ProducerKey {
    pub producer_name: Name128,
    pub block_signing_key: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct ProducerSchedule {
    pub version: u32,
    pub producers: Vec<ProducerKey>,
}

impl ProducerSchedule {
    /// Round-robin producer for a slot; each producer holds the slot for
    /// `PRODUCER_REPETITIONS` consecutive blocks.
    pub fn scheduled_producer(&self, slot: BlockTimestamp) -> &ProducerKey {
        let index =
            (slot.0 / crate::config::PRODUCER_REPETITIONS) as usize % self.producers.len();
        &self.producers[index]
    }

    pub fn producer_key(&self, name: Name128) -> Option<&PublicKey> {
        self.producers
            .iter()
            .find(|p| p.producer_name == name)
            .map(|p| &p.block_signing_key)
    }

    pub fn is_signing_key(&self, key: &PublicKey) -> bool {
        self.producers.iter().any(|p| &p.block_signing_key == key)
    }
}

// ── Block header ─────────────────────────────────────────────────────────────

/// Block id: sha256 of the header with the block number spliced into the
/// first four bytes, so the number is recoverable from any id.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    pub timestamp: BlockTimestamp,
    pub producer: Name128,
    /// How many prior blocks this producer confirms on top of its own.
    pub confirmed: u16,
    pub previous: Digest,
    pub transaction_mroot: Digest,
    pub action_mroot: Digest,
    pub schedule_version: u32,
    pub new_producers: Option<ProducerSchedule>,
}

impl BlockHeader {
    pub fn block_num(&self) -> BlockNum {
        Self::num_from_id(&self.previous) + 1
    }

    pub fn id(&self) -> Digest {
        let mut d = Digest::hash_of(self);
        d.0[..4].copy_from_slice(&self.block_num().to_be_bytes());
        d
    }

    pub fn num_from_id(id: &Digest) -> BlockNum {
        u32::from_be_bytes(id.0[..4].try_into().unwrap())
    }
}

// ── Transaction receipts & blocks ────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TrxStatus {
    Executed,
    SoftFail,
    HardFail,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TrxType {
    Input,
    Suspend,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub status: TrxStatus,
    pub type_: TrxType,
    pub trx: SignedTransaction,
}

impl TransactionReceipt {
    pub fn digest(&self) -> Digest {
        Digest::hash_of(self)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub producer_signature: Signature,
    pub transactions: Vec<TransactionReceipt>,
}

impl SignedBlock {
    pub fn id(&self) -> Digest {
        self.header.id()
    }

    pub fn block_num(&self) -> BlockNum {
        self.header.block_num()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
