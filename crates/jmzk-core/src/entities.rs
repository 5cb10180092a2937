use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::address::Address;
use crate::asset::{Asset, Percent, Symbol};
use crate::authority::{AuthorizerRef, PermissionDef};
use crate::name::{Name, Name128};
use crate::transaction::Transaction;
use crate::types::{BlockNum, Digest, PublicKey, Signature, SymbolId, Timestamp};

// ── Meta ─────────────────────────────────────────────────────────────────────

/// Arbitrary key/value attached to an entity. Keys with a leading '.' are
/// reserved; a small per-entity whitelist is recognized (`.disable-destroy`,
/// `.disable-set-transfer`).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Meta {
    pub key: Name128,
    pub value: String,
    pub creator: AuthorizerRef,
}

pub fn meta_value<'a>(metas: &'a [Meta], key: Name128) -> Option<&'a str> {
    metas.iter().find(|m| m.key == key).map(|m| m.value.as_str())
}

// ── Domain / Token ───────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DomainDef {
    pub name: Name128,
    pub creator: PublicKey,
    pub create_time: Timestamp,
    pub issue: PermissionDef,
    pub transfer: PermissionDef,
    pub manage: PermissionDef,
    pub metas: Vec<Meta>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TokenDef {
    pub domain: Name128,
    pub name: Name128,
    pub owner: Vec<Address>,
    pub metas: Vec<Meta>,
}

impl TokenDef {
    /// A token whose sole owner is the reserved address has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.owner.len() == 1 && self.owner[0].is_reserved()
    }

    /// A token parked under a `.lock` generated address is escrowed.
    pub fn is_locked(&self) -> bool {
        self.owner.len() == 1
            && self.owner[0].generated_prefix() == Some(crate::n!(".lock"))
    }
}

// ── Fungible ─────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FungibleDef {
    pub name: Name128,
    pub sym_name: Name128,
    pub sym: Symbol,
    pub creator: PublicKey,
    pub create_time: Timestamp,
    pub issue: PermissionDef,
    pub transfer: PermissionDef,
    pub manage: PermissionDef,
    pub total_supply: Asset,
    pub metas: Vec<Meta>,
}

/// A balance row in the assets keyspace, keyed by `(sym_id, address)`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Property {
    pub amount: i64,
    pub frozen_amount: i64,
    pub sym: Symbol,
    pub created_at: Timestamp,
    pub created_index: u32,
}

impl Property {
    pub fn new(sym: Symbol, created_at: Timestamp, created_index: u32) -> Self {
        Self { amount: 0, frozen_amount: 0, sym, created_at, created_index }
    }
}

// ── Suspend ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SuspendStatus {
    Proposed,
    Executed,
    Failed,
    Cancelled,
}

/// A proposed deferred transaction accumulating signatures until executed.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SuspendDef {
    pub name: Name128,
    pub proposer: PublicKey,
    pub status: SuspendStatus,
    pub trx: Transaction,
    pub signed_keys: BTreeSet<PublicKey>,
    pub signatures: Vec<Signature>,
}

// ── Lock ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LockStatus {
    Proposed,
    Succeed,
    Failed,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LockAsset {
    Tokens { domain: Name128, names: Vec<Name128> },
    Fungible { from: Address, amount: Asset },
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LockCondition {
    CondKeys { threshold: u32, cond_keys: Vec<PublicKey> },
}

/// Approval payload; decoding rejects tags the condition doesn't expect.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LockAprvData {
    CondKey,
}

/// Time-boxed escrow: assets move to the lock address on creation and to
/// the succeed or failed addresses at `tryunlock`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct LockDef {
    pub name: Name128,
    pub proposer: PublicKey,
    pub status: LockStatus,
    pub unlock_time: Timestamp,
    pub deadline: Timestamp,
    pub assets: Vec<LockAsset>,
    pub condition: LockCondition,
    pub signed_keys: BTreeSet<PublicKey>,
    pub succeed: Vec<Address>,
    pub failed: Vec<Address>,
}

// ── Passive bonus ────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DistReceiver {
    Address(Address),
    /// Pro-rata to every holder whose balance is at least the threshold at
    /// distribution time.
    FtHolders { threshold: Asset },
}

/// Rules evaluate in declared order: fixed amounts first, then percents of
/// the post-fixed remainder, then remaining-percents of the tail.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DistRule {
    Fixed { receiver: DistReceiver, amount: Asset },
    Percent { receiver: DistReceiver, percent: Percent },
    RemainingPercent { receiver: DistReceiver, percent: Percent },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PassiveMethod {
    /// The bonus comes out of the amount being moved.
    WithinAmount,
    /// The bonus is charged to the sender on top of the amount.
    OutsideAmount,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PassiveBonus {
    pub sym_id: SymbolId,
    pub rate: Percent,
    pub base_charge: Asset,
    pub charge_threshold: Option<Asset>,
    pub minimum_charge: Option<Asset>,
    pub dist_threshold: Asset,
    pub rules: Vec<DistRule>,
    pub methods: Vec<(Name, PassiveMethod)>,
    pub round: u32,
    pub deadline: Timestamp,
}

impl PassiveBonus {
    pub fn method_for(&self, action: Name) -> Option<PassiveMethod> {
        self.methods.iter().find(|(n, _)| *n == action).map(|(_, m)| *m)
    }

    /// Charge for moving `amount`: rate-scaled, clamped by the optional
    /// minimum and threshold, plus the flat base charge.
    pub fn charge_for(&self, amount: i64) -> i64 {
        let mut charge = self.rate.apply(amount);
        if let Some(min) = &self.minimum_charge {
            charge = charge.max(min.amount());
        }
        if let Some(max) = &self.charge_threshold {
            charge = charge.min(max.amount());
        }
        charge + self.base_charge.amount()
    }
}

/// Snapshot written per distribution round under the nonced
/// `.psvbonus-dist` key.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PassiveBonusDist {
    pub sym_id: SymbolId,
    pub round: u32,
    pub total: Asset,
    pub dist_time: Timestamp,
}

// ── Validator / Stakepool ────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum StakeType {
    Active,
    Fixed,
}

/// One parcel of stake units held by an address against a validator.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StakeShare {
    pub validator: Name128,
    pub units: i64,
    pub net_value: Asset,
    pub time: Timestamp,
    pub type_: StakeType,
    pub fixed_days: u32,
}

/// An unstake proposal waiting out the pending period. The net value at
/// proposal time is the cost basis commission is charged against.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PendingShare {
    pub validator: Name128,
    pub units: i64,
    pub net_value: Asset,
    pub time: Timestamp,
}

/// A staker's EVT balance row expands into this richer form.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PropertyStakes {
    pub amount: i64,
    pub frozen_amount: i64,
    pub sym: Symbol,
    pub created_at: Timestamp,
    pub created_index: u32,
    pub stake_shares: Vec<StakeShare>,
    pub pending_shares: Vec<PendingShare>,
}

impl From<Property> for PropertyStakes {
    fn from(p: Property) -> Self {
        Self {
            amount: p.amount,
            frozen_amount: p.frozen_amount,
            sym: p.sym,
            created_at: p.created_at,
            created_index: p.created_index,
            stake_shares: Vec::new(),
            pending_shares: Vec::new(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ValidatorDef {
    pub name: Name128,
    pub creator: PublicKey,
    pub signer: PublicKey,
    pub withdraw: PermissionDef,
    pub manage: PermissionDef,
    pub commission: Percent,
    pub create_time: Timestamp,
    pub last_updated_time: Timestamp,
    pub total_units: i64,
    pub current_net_value: Asset,
}

/// Per-symbol staking pool with the yearly-ROI curve parameters.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StakepoolDef {
    pub sym_id: SymbolId,
    pub purchase_threshold: Asset,
    pub demand_r: i64,
    pub demand_t: i64,
    pub demand_q: i64,
    pub demand_w: i64,
    pub fixed_r: i64,
    pub fixed_t: i64,
    pub begin_time: Timestamp,
    pub total: Asset,
}

// ── EVT-Link / scripts ───────────────────────────────────────────────────────

/// Accepted everiPay links index here so a link id can never pay twice.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EvtLinkObject {
    pub link_id: [u8; 16],
    pub block_num: BlockNum,
    pub trx_id: Digest,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ScriptDef {
    pub name: Name128,
    pub content: String,
    pub creator: PublicKey,
    pub create_time: Timestamp,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::lock_address;
    use crate::asset::evt_sym;
    use crate::n128;

    #[test]
    fn destroyed_and_locked_flags() {
        let pk = PublicKey([2u8; 33]);
        let mut token = TokenDef {
            domain: n128!("d"),
            name: n128!("t"),
            owner: vec![Address::PublicKey(pk)],
            metas: vec![],
        };
        assert!(!token.is_destroyed() && !token.is_locked());

        token.owner = vec![Address::Reserved];
        assert!(token.is_destroyed());

        token.owner = vec![lock_address(n128!("l1"))];
        assert!(token.is_locked());

        token.owner = vec![Address::Reserved, Address::PublicKey(pk)];
        assert!(!token.is_destroyed());
    }

    #[test]
    fn bonus_charge_clamps() {
        let bonus = PassiveBonus {
            sym_id: 3,
            rate: "0.15".parse().unwrap(),
            base_charge: Asset::new(10, Symbol::new(5, 3)),
            charge_threshold: Some(Asset::new(1_000, Symbol::new(5, 3))),
            minimum_charge: Some(Asset::new(100, Symbol::new(5, 3))),
            dist_threshold: Asset::new(100_000, Symbol::new(5, 3)),
            rules: vec![],
            methods: vec![],
            round: 0,
            deadline: 0,
        };
        // 15% of 200 = 30, clamped up to the minimum 100, plus base 10.
        assert_eq!(bonus.charge_for(200), 110);
        // 15% of 100_000 = 15_000, clamped down to 1_000, plus base 10.
        assert_eq!(bonus.charge_for(100_000), 1_010);
    }

    #[test]
    fn property_stakes_from_property() {
        let p = Property::new(evt_sym(), 7, 1);
        let ps = PropertyStakes::from(p.clone());
        assert_eq!(ps.amount, p.amount);
        assert!(ps.stake_shares.is_empty());
    }
}
