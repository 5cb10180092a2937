//! Typed payloads for the closed action set. The binary form of an action
//! is interpreted against the registry's current version for its name;
//! superfluous trailing bytes are rejected at decode time.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::asset::{Asset, Percent, Symbol};
use crate::authority::{AuthorizerRef, Group, PermissionDef};
use crate::block::ProducerSchedule;
use crate::entities::{DistRule, LockAprvData, LockAsset, LockCondition, PassiveMethod, StakeType};
use crate::error::ChainError;
use crate::link::EvtLink;
use crate::name::{Name, Name128};
use crate::transaction::Transaction;
use crate::types::{PublicKey, Signature, SymbolId, Timestamp};

/// Strict decode: every byte of `data` must be consumed.
pub fn decode_exact<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, ChainError> {
    let mut cursor = std::io::Cursor::new(data);
    let v: T = bincode::deserialize_from(&mut cursor)?;
    if (cursor.position() as usize) < data.len() {
        return Err(ChainError::RawUnpack);
    }
    Ok(v)
}

// ── Domains / tokens / groups ────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewDomain {
    pub name: Name128,
    pub creator: PublicKey,
    pub issue: PermissionDef,
    pub transfer: PermissionDef,
    pub manage: PermissionDef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateDomain {
    pub name: Name128,
    pub issue: Option<PermissionDef>,
    pub transfer: Option<PermissionDef>,
    pub manage: Option<PermissionDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueToken {
    pub domain: Name128,
    pub names: Vec<Name128>,
    pub owner: Vec<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferToken {
    pub domain: Name128,
    pub name: Name128,
    pub to: Vec<Address>,
    pub memo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestroyToken {
    pub domain: Name128,
    pub name: Name128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: Name128,
    pub group: Group,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateGroup {
    pub name: Name128,
    pub group: Group,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddMeta {
    pub key: Name128,
    pub value: String,
    pub creator: AuthorizerRef,
}

// ── Fungibles ────────────────────────────────────────────────────────────────

/// v1 form: no transfer permission; the handler synthesizes an owner-only
/// transfer permission on upgrade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewFungibleV1 {
    pub name: Name128,
    pub sym_name: Name128,
    pub sym: Symbol,
    pub creator: PublicKey,
    pub issue: PermissionDef,
    pub manage: PermissionDef,
    pub total_supply: Asset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewFungible {
    pub name: Name128,
    pub sym_name: Name128,
    pub sym: Symbol,
    pub creator: PublicKey,
    pub issue: PermissionDef,
    pub transfer: PermissionDef,
    pub manage: PermissionDef,
    pub total_supply: Asset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdFungibleV1 {
    pub sym_id: SymbolId,
    pub issue: Option<PermissionDef>,
    pub manage: Option<PermissionDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdFungible {
    pub sym_id: SymbolId,
    pub issue: Option<PermissionDef>,
    pub transfer: Option<PermissionDef>,
    pub manage: Option<PermissionDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueFungible {
    pub address: Address,
    pub number: Asset,
    pub memo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferFt {
    pub from: Address,
    pub to: Address,
    pub number: Asset,
    pub memo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecycleFt {
    pub address: Address,
    pub number: Asset,
    pub memo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestroyFt {
    pub address: Address,
    pub number: Asset,
    pub memo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evt2Pevt {
    pub from: Address,
    pub to: Address,
    pub number: Asset,
    pub memo: String,
}

// ── Suspends ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSuspend {
    pub name: Name128,
    pub proposer: PublicKey,
    pub trx: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AprvSuspend {
    pub name: Name128,
    pub signatures: Vec<Signature>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelSuspend {
    pub name: Name128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecSuspend {
    pub name: Name128,
    pub executor: PublicKey,
}

// ── Charges / links ──────────────────────────────────────────────────────────

/// Implicit action synthesized by TransactionContext::finalize; never valid
/// as user input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayCharge {
    pub payer: Address,
    pub charge: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EveriPassV1 {
    pub link: EvtLink,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EveriPass {
    pub link: EvtLink,
    pub memo: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EveriPayV1 {
    pub link: EvtLink,
    pub payee: Address,
    pub number: Asset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EveriPay {
    pub link: EvtLink,
    pub payee: Address,
    pub number: Asset,
    pub memo: String,
}

// ── Producer governance ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProdVote {
    pub producer: Name128,
    pub key: Name128,
    pub value: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdSched {
    pub producers: ProducerSchedule,
}

// ── Locks ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewLock {
    pub name: Name128,
    pub proposer: PublicKey,
    pub unlock_time: Timestamp,
    pub deadline: Timestamp,
    pub assets: Vec<LockAsset>,
    pub condition: LockCondition,
    pub succeed: Vec<Address>,
    pub failed: Vec<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AprvLock {
    pub name: Name128,
    pub approver: PublicKey,
    pub data: LockAprvData,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TryUnlock {
    pub name: Name128,
    pub executor: PublicKey,
}

// ── Passive bonus ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetPsvBonus {
    pub sym: Symbol,
    pub rate: Percent,
    pub base_charge: Asset,
    pub charge_threshold: Option<Asset>,
    pub minimum_charge: Option<Asset>,
    pub dist_threshold: Asset,
    pub rules: Vec<DistRule>,
    pub methods: Vec<(Name, PassiveMethod)>,
}

/// v2 stores percents in their decimal string form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetPsvBonusV2 {
    pub sym_id: SymbolId,
    pub rate: String,
    pub base_charge: Asset,
    pub charge_threshold: Option<Asset>,
    pub minimum_charge: Option<Asset>,
    pub dist_threshold: Asset,
    pub rules: Vec<DistRuleV2>,
    pub methods: Vec<(Name, PassiveMethod)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DistRuleV2 {
    Fixed { receiver: crate::entities::DistReceiver, amount: Asset },
    Percent { receiver: crate::entities::DistReceiver, percent: String },
    RemainingPercent { receiver: crate::entities::DistReceiver, percent: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistPsvBonus {
    pub sym_id: SymbolId,
}

// ── Staking ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewStakepool {
    pub sym_id: SymbolId,
    pub purchase_threshold: Asset,
    pub demand_r: i64,
    pub demand_t: i64,
    pub demand_q: i64,
    pub demand_w: i64,
    pub fixed_r: i64,
    pub fixed_t: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdStakepool {
    pub sym_id: SymbolId,
    pub purchase_threshold: Option<Asset>,
    pub demand_r: Option<i64>,
    pub demand_t: Option<i64>,
    pub demand_q: Option<i64>,
    pub demand_w: Option<i64>,
    pub fixed_r: Option<i64>,
    pub fixed_t: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewValidator {
    pub name: Name128,
    pub creator: PublicKey,
    pub signer: PublicKey,
    pub withdraw: PermissionDef,
    pub manage: PermissionDef,
    pub commission: Percent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeTkns {
    pub staker: PublicKey,
    pub validator: Name128,
    pub amount: Asset,
    pub type_: StakeType,
    pub fixed_days: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum UnstakeOp {
    Propose,
    Cancel,
    Settle,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnstakeTkns {
    pub staker: PublicKey,
    pub validator: Name128,
    pub units: i64,
    pub sym_id: SymbolId,
    pub op: UnstakeOp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToActiveTkns {
    pub staker: PublicKey,
    pub validator: Name128,
    pub sym_id: SymbolId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValiWithdraw {
    pub name: Name128,
    pub addr: Address,
    pub amount: Asset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecvStkBonus {
    pub validator: Name128,
    pub sym_id: SymbolId,
}

// ── Scripts / blacklist ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewScript {
    pub name: Name128,
    pub content: String,
    pub creator: PublicKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdScript {
    pub name: Name128,
    pub content: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlackAddr {
    pub addrs: Vec<Address>,
}
