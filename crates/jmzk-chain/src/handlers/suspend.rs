use std::collections::BTreeSet;

use tracing::info;

use jmzk_core::address::Address;
use jmzk_core::entities::{SuspendDef, SuspendStatus};
use jmzk_core::error::ChainError;
use jmzk_core::payloads::{decode_exact, AprvSuspend, CancelSuspend, ExecSuspend, NewSuspend};
use jmzk_core::transaction::SignedTransaction;
use jmzk_core::types::PublicKey;
use jmzk_core::{n, n128};
use jmzk_tokendb::{ActionOp, TokenType};

use crate::authorizer::AuthorityChecker;
use crate::context::ApplyContext;
use crate::trx_context::{self, push_transaction, TrxKind};

pub fn apply_newsuspend(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewSuspend = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".suspend"), act.name)?;

    let now = ctx.env.pending_block_time;
    if act.trx.expiration <= now {
        return Err(ChainError::SuspendExpired);
    }
    let wrapper = SignedTransaction::new(act.trx.clone(), vec![]);
    trx_context::validate_tapos(ctx.services, &wrapper)?;

    ctx.check_name_reserved(act.name)?;
    for inner in &act.trx.actions {
        if inner.domain == n128!(".suspend")
            || inner.name == n!("everipay")
            || inner.name == n!("everipass")
        {
            return Err(ChainError::SuspendInvalidAction);
        }
    }

    if ctx.cache().exists_token(TokenType::Suspend, None, act.name)? {
        return Err(ChainError::SuspendDuplicate(act.name.to_string()));
    }

    let suspend = SuspendDef {
        name: act.name,
        proposer: act.proposer,
        status: SuspendStatus::Proposed,
        trx: act.trx,
        signed_keys: BTreeSet::new(),
        signatures: vec![],
    };
    ctx.cache().put_token(TokenType::Suspend, ActionOp::Add, None, act.name, suspend)
}

/// The keys that would participate in authorizing the embedded
/// transaction, out of `candidates`. Satisfaction itself is not required
/// here; it is re-checked in full at execution.
fn suspend_required_keys(
    ctx: &ApplyContext,
    suspend: &SuspendDef,
    candidates: &BTreeSet<PublicKey>,
) -> Result<BTreeSet<PublicKey>, ChainError> {
    let gpo = ctx.services.state.global_property()?;
    let mut checker =
        AuthorityChecker::new(ctx.services, candidates, gpo.configuration.max_authority_depth);
    for act in &suspend.trx.actions {
        let _ = checker.satisfied(act, ctx.env.active_schedule.as_ref());
    }
    let mut required = checker.used_keys();
    // The payer's signature always counts.
    if let Address::PublicKey(payer) = &suspend.trx.payer {
        if candidates.contains(payer) {
            required.insert(*payer);
        }
    }
    Ok(required)
}

pub fn apply_aprvsuspend(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: AprvSuspend = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".suspend"), act.name)?;

    let mut suspend = (*ctx.cache().read_token_required::<SuspendDef, _>(
        TokenType::Suspend,
        None,
        act.name,
        || ChainError::UnknownSuspend(act.name.to_string()),
    )?)
    .clone();

    if suspend.status != SuspendStatus::Proposed {
        return Err(ChainError::SuspendStatus);
    }

    // Recover the keys behind the provided signatures over the embedded
    // transaction, and require every one of them to be useful.
    let digest =
        trx_context::signing_digest(&ctx.services.chain_id, &suspend.trx.id());
    let mut signed_keys = BTreeSet::new();
    for sig in &act.signatures {
        signed_keys.insert(jmzk_crypto::recover(&digest, sig)?);
    }
    let required = suspend_required_keys(ctx, &suspend, &signed_keys)?;
    if signed_keys != required {
        return Err(ChainError::SuspendNotRequiredKeys);
    }
    for key in &signed_keys {
        if suspend.signed_keys.contains(key) {
            return Err(ChainError::SuspendDuplicateKey);
        }
    }

    suspend.signed_keys.extend(signed_keys);
    suspend.signatures.extend(act.signatures);
    ctx.cache().put_token(TokenType::Suspend, ActionOp::Update, None, act.name, suspend)
}

pub fn apply_cancelsuspend(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: CancelSuspend = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".suspend"), act.name)?;

    let mut suspend = (*ctx.cache().read_token_required::<SuspendDef, _>(
        TokenType::Suspend,
        None,
        act.name,
        || ChainError::UnknownSuspend(act.name.to_string()),
    )?)
    .clone();

    if suspend.status != SuspendStatus::Proposed {
        return Err(ChainError::SuspendStatus);
    }
    suspend.status = SuspendStatus::Cancelled;
    ctx.cache().put_token(TokenType::Suspend, ActionOp::Update, None, act.name, suspend)
}

pub fn apply_execsuspend(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: ExecSuspend = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".suspend"), act.name)?;

    let mut suspend = (*ctx.cache().read_token_required::<SuspendDef, _>(
        TokenType::Suspend,
        None,
        act.name,
        || ChainError::UnknownSuspend(act.name.to_string()),
    )?)
    .clone();

    if !suspend.signed_keys.contains(&act.executor) {
        return Err(ChainError::SuspendExecutor);
    }
    if suspend.status != SuspendStatus::Proposed {
        return Err(ChainError::SuspendStatus);
    }
    let now = ctx.env.pending_block_time;
    if suspend.trx.expiration <= now {
        return Err(ChainError::SuspendExpired);
    }

    // Authorization and payer run against the accumulated keys instead of
    // fresh transaction signatures.
    let gpo = ctx.services.state.global_property()?;
    {
        let mut checker = AuthorityChecker::new(
            ctx.services,
            &suspend.signed_keys,
            gpo.configuration.max_authority_depth,
        );
        for inner in &suspend.trx.actions {
            checker.satisfied(inner, ctx.env.active_schedule.as_ref())?;
        }
    }
    if let Address::PublicKey(payer) = &suspend.trx.payer {
        if !suspend.signed_keys.contains(payer) {
            return Err(ChainError::Payer);
        }
    }

    let strx = SignedTransaction::new(suspend.trx.clone(), suspend.signatures.clone());
    let trace = push_transaction(ctx.services, ctx.env, ctx.out, &strx, TrxKind::Suspend, None);

    suspend.status = if trace.failed() {
        info!(suspend = %act.name, error = %trace.except.as_ref().unwrap(), "suspend execution failed");
        SuspendStatus::Failed
    } else {
        SuspendStatus::Executed
    };
    ctx.cache().put_token(TokenType::Suspend, ActionOp::Update, None, act.name, suspend)
}
