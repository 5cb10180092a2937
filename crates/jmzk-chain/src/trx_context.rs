use std::collections::BTreeSet;
use std::time::Instant;

use tracing::debug;

use jmzk_core::address::Address;
use jmzk_core::block::{TransactionReceipt, TrxStatus, TrxType};
use jmzk_core::error::ChainError;
use jmzk_core::n128;
use jmzk_core::payloads::PayCharge;
use jmzk_core::transaction::{Action, ActionReceipt, SignedTransaction};
use jmzk_core::types::{Digest, PublicKey};

use crate::authorizer::AuthorityChecker;
use crate::charge::ChargeManager;
use crate::context::{ApplyContext, BlockEnv, ChainServices, PendingOut};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrxKind {
    /// Signed transaction arriving from the outside.
    Input,
    /// Synthesized by the chain itself (paycharge); no checks, no receipt.
    Implicit,
    /// A suspend proposal's embedded transaction run by execsuspend;
    /// authorization was re-checked against the accumulated signatures.
    Suspend,
}

/// Outcome of one transaction, whether it stuck or rolled back.
pub struct TransactionTrace {
    pub id: Digest,
    pub signed_id: Digest,
    pub status: Option<TrxStatus>,
    pub charge: u64,
    pub elapsed_us: u128,
    pub except: Option<ChainError>,
}

impl TransactionTrace {
    pub fn failed(&self) -> bool {
        self.except.is_some()
    }
}

/// Signatures cover `sha256(chain_id ‖ trx_id)`.
pub fn signing_digest(chain_id: &Digest, trx_id: &Digest) -> Digest {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&chain_id.0);
    buf[32..].copy_from_slice(&trx_id.0);
    Digest::hash_bytes(&buf)
}

pub fn recover_keys(
    strx: &SignedTransaction,
    chain_id: &Digest,
) -> Result<BTreeSet<PublicKey>, ChainError> {
    let digest = signing_digest(chain_id, &strx.id());
    let mut keys = BTreeSet::new();
    for sig in &strx.signatures {
        keys.insert(jmzk_crypto::recover(&digest, sig)?);
    }
    Ok(keys)
}

/// TAPOS: the transaction's `ref_block_num` slot must still hold a block
/// whose id prefix matches `ref_block_prefix`.
pub fn validate_tapos(services: &ChainServices, strx: &SignedTransaction) -> Result<(), ChainError> {
    let summary = services.state.block_summary(strx.trx.ref_block_num)?;
    let prefix = u32::from_le_bytes(summary.0[8..12].try_into().unwrap());
    if prefix != strx.trx.ref_block_prefix {
        return Err(ChainError::InvalidRefBlock);
    }
    Ok(())
}

/// The id-prefix pair a client would cite to reference `id`.
pub fn ref_block_parts(id: &Digest) -> (u16, u32) {
    let num = jmzk_core::block::BlockHeader::num_from_id(id);
    let prefix = u32::from_le_bytes(id.0[8..12].try_into().unwrap());
    ((num & 0xffff) as u16, prefix)
}

/// Run one transaction against the pending block. All mutations confine to
/// a nested savepoint pair that squashes into the block's frame on success
/// and unwinds on failure; the pending block itself stays intact either
/// way.
pub fn push_transaction(
    services: &ChainServices,
    env: &BlockEnv,
    out: &mut PendingOut,
    strx: &SignedTransaction,
    kind: TrxKind,
    deadline: Option<Instant>,
) -> TransactionTrace {
    let start = Instant::now();
    let mut trace = TransactionTrace {
        id: strx.id(),
        signed_id: strx.signed_id(),
        status: None,
        charge: 0,
        elapsed_us: 0,
        except: None,
    };

    let result = execute(services, env, out, strx, kind, deadline, &mut trace);
    trace.elapsed_us = start.elapsed().as_micros();

    match result {
        Ok(()) => {
            trace.status = Some(TrxStatus::Executed);
            if kind != TrxKind::Implicit {
                out.receipts.push(TransactionReceipt {
                    status: TrxStatus::Executed,
                    type_: if kind == TrxKind::Suspend { TrxType::Suspend } else { TrxType::Input },
                    trx: strx.clone(),
                });
            }
        }
        Err(e) => {
            let status =
                if e.is_subjective() { TrxStatus::SoftFail } else { TrxStatus::HardFail };
            debug!(trx = %trace.id, error = %e, "transaction failed");
            trace.status = Some(status);
            trace.except = Some(e);
            // Failed suspend executions still leave a receipt; failed input
            // transactions are simply dropped by the producer.
            if kind == TrxKind::Suspend {
                out.receipts.push(TransactionReceipt {
                    status,
                    type_: TrxType::Suspend,
                    trx: strx.clone(),
                });
            }
        }
    }
    trace
}

fn execute(
    services: &ChainServices,
    env: &BlockEnv,
    out: &mut PendingOut,
    strx: &SignedTransaction,
    kind: TrxKind,
    deadline: Option<Instant>,
    trace: &mut TransactionTrace,
) -> Result<(), ChainError> {
    if strx.trx.actions.is_empty() {
        return Err(ChainError::TrxNoActions);
    }

    let gpo = services.state.global_property()?;

    // Init: lifetime, TAPOS and dedup apply to transactions that enter
    // from the outside; implicit ones are the chain talking to itself.
    let keys = match kind {
        TrxKind::Input => {
            let now = env.pending_block_time;
            if strx.trx.expiration <= now {
                return Err(ChainError::TrxExpired);
            }
            if strx.trx.expiration - now > gpo.configuration.max_transaction_lifetime as i64 {
                return Err(ChainError::TrxLifetime);
            }
            validate_tapos(services, strx)?;
            recover_keys(strx, &services.chain_id)?
        }
        TrxKind::Suspend => recover_keys(strx, &services.chain_id)?,
        TrxKind::Implicit => BTreeSet::new(),
    };

    // Per-trx undo frames over both stores.
    let token_session = services.cache.db().new_savepoint_session_auto()?;
    let state_seq = services.state.revision() + 1;
    let state_session = services.state.start_undo_session(state_seq)?;

    if kind == TrxKind::Input {
        services.state.insert_trx(&trace.id, strx.trx.expiration)?;

        if !env.skip_auth_check {
            let schedule = env.active_schedule.clone();
            let mut checker =
                AuthorityChecker::new(services, &keys, gpo.configuration.max_authority_depth);
            for act in &strx.trx.actions {
                checker.satisfied(act, schedule.as_ref())?;
            }
            if let Address::PublicKey(payer_key) = &strx.trx.payer {
                if !keys.contains(payer_key) {
                    return Err(ChainError::Payer);
                }
            }
        }
        if strx.trx.payer.is_reserved() {
            return Err(ChainError::Payer);
        }
    }

    // Execute actions in declared order; receipts append in execution
    // order and feed the block's action merkle root.
    let mut executed: Vec<ActionReceipt> = Vec::with_capacity(strx.trx.actions.len() + 1);
    for act in &strx.trx.actions {
        if let Some(d) = deadline {
            if Instant::now() > d {
                return Err(ChainError::Deadline);
            }
        }
        apply_one(services, env, out, strx, &keys, act, &mut executed)?;
    }

    // Finalize: compute and collect the charge.
    if kind != TrxKind::Implicit && !env.charge_free_mode {
        let packed = bincode::serialize(strx)?;
        let charge = ChargeManager::new(&gpo.configuration).charge(strx, packed.len());
        trace.charge = charge;
        if charge > strx.trx.max_charge {
            return Err(ChainError::ChargeExceeded { charge, max: strx.trx.max_charge });
        }
        if charge > 0 {
            let paycharge = Action::new(
                jmzk_core::n!("paycharge"),
                n128!(".charge"),
                n128!(".payer"),
                &PayCharge { payer: strx.trx.payer, charge },
            );
            apply_one(services, env, out, strx, &keys, &paycharge, &mut executed)?;
        }
    }

    // Success: receipts surface into the block and both frames merge into
    // the block-level savepoints.
    out.actions.append(&mut executed);
    state_session.squash()?;
    token_session.squash()?;
    Ok(())
}

fn apply_one(
    services: &ChainServices,
    env: &BlockEnv,
    out: &mut PendingOut,
    strx: &SignedTransaction,
    keys: &BTreeSet<PublicKey>,
    act: &Action,
    executed: &mut Vec<ActionReceipt>,
) -> Result<(), ChainError> {
    let mut ctx = ApplyContext { services, env, out, act, trx: strx, trx_keys: keys };
    services.exec.apply(&mut ctx)?;
    executed.push(ActionReceipt {
        act_digest: act.digest(),
        global_sequence: services.state.next_action_seq()?,
    });
    Ok(())
}
