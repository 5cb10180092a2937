use jmzk_core::address::lock_address;
use jmzk_core::asset::PEVT_SYM_ID;
use jmzk_core::entities::{LockAprvData, LockAsset, LockCondition, LockDef, LockStatus, TokenDef};
use jmzk_core::error::ChainError;
use jmzk_core::n128;
use jmzk_core::payloads::{decode_exact, AprvLock, NewLock, TransferFt, TransferToken, TryUnlock};
use jmzk_core::transaction::Action;
use jmzk_core::name::Name128;
use jmzk_tokendb::{ActionOp, TokenType};

use crate::authorizer::AuthorityChecker;
use crate::context::ApplyContext;

/// Authority over every escrowed asset is proven by checking the transfer
/// action the lock implies, against the outer transaction's keys.
fn check_asset_authority(ctx: &ApplyContext, assets: &[LockAsset]) -> Result<bool, ChainError> {
    let gpo = ctx.services.state.global_property()?;
    let mut has_fungible = false;
    for asset in assets {
        match asset {
            LockAsset::Tokens { domain, names } => {
                if names.is_empty() {
                    return Err(ChainError::LockAssets);
                }
                for name in names {
                    let tt = TransferToken {
                        domain: *domain,
                        name: *name,
                        to: vec![],
                        memo: String::new(),
                    };
                    let ttact = Action::new(jmzk_core::n!("transfer"), *domain, *name, &tt);
                    let mut checker = AuthorityChecker::new(
                        ctx.services,
                        ctx.trx_keys,
                        gpo.configuration.max_authority_depth,
                    );
                    checker.satisfied(&ttact, ctx.env.active_schedule.as_ref())?;
                }
            }
            LockAsset::Fungible { from, amount } => {
                if amount.sym().id() == PEVT_SYM_ID {
                    return Err(ChainError::LockAssets);
                }
                has_fungible = true;
                let tf = TransferFt {
                    from: *from,
                    to: lock_address(n128!(".pending")),
                    number: *amount,
                    memo: String::new(),
                };
                let tfact = Action::new(
                    jmzk_core::n!("transferft"),
                    n128!(".fungible"),
                    Name128::from_number(amount.sym().id() as u128),
                    &tf,
                );
                let mut checker = AuthorityChecker::new(
                    ctx.services,
                    ctx.trx_keys,
                    gpo.configuration.max_authority_depth,
                );
                checker.satisfied(&tfact, ctx.env.active_schedule.as_ref())?;
            }
        }
    }
    Ok(has_fungible)
}

pub fn apply_newlock(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewLock = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".lock"), act.name)?;

    if ctx.cache().exists_token(TokenType::Lock, None, act.name)? {
        return Err(ChainError::LockDuplicate(act.name.to_string()));
    }

    let now = ctx.env.pending_block_time;
    if act.unlock_time <= now {
        return Err(ChainError::LockUnlockTime);
    }
    if act.deadline <= now || act.deadline <= act.unlock_time {
        return Err(ChainError::LockUnlockTime);
    }

    match &act.condition {
        LockCondition::CondKeys { threshold, cond_keys } => {
            if *threshold == 0 || cond_keys.len() < *threshold as usize {
                return Err(ChainError::LockCondition);
            }
        }
    }

    for addr in act.succeed.iter().chain(&act.failed) {
        ctx.check_address_reserved(addr)?;
    }
    if act.assets.is_empty() {
        return Err(ChainError::LockAssets);
    }

    let has_fungible = check_asset_authority(ctx, &act.assets)?;
    if has_fungible {
        // Fungible holdings cannot split across multiple payout targets.
        if act.succeed.len() != 1 || act.failed.len() != 1 {
            return Err(ChainError::LockAddress);
        }
    } else if act.succeed.is_empty() || act.failed.is_empty() {
        return Err(ChainError::LockAddress);
    }

    // Escrow everything at the lock's generated address.
    let laddr = lock_address(act.name);
    for asset in &act.assets {
        match asset {
            LockAsset::Tokens { domain, names } => {
                for name in names {
                    let mut token = (*ctx.cache().read_token_required::<TokenDef, _>(
                        TokenType::Token,
                        Some(*domain),
                        *name,
                        || ChainError::UnknownToken(domain.to_string(), name.to_string()),
                    )?)
                    .clone();
                    if token.is_destroyed() {
                        return Err(ChainError::TokenDestroyed);
                    }
                    if token.is_locked() {
                        return Err(ChainError::TokenLocked);
                    }
                    token.owner = vec![laddr];
                    ctx.cache().put_token(
                        TokenType::Token,
                        ActionOp::Update,
                        Some(*domain),
                        *name,
                        token,
                    )?;
                }
            }
            LockAsset::Fungible { from, amount } => {
                ctx.transfer_funds(from, &laddr, amount)?;
            }
        }
    }

    let lock = LockDef {
        name: act.name,
        proposer: act.proposer,
        status: LockStatus::Proposed,
        unlock_time: act.unlock_time,
        deadline: act.deadline,
        assets: act.assets,
        condition: act.condition,
        signed_keys: Default::default(),
        succeed: act.succeed,
        failed: act.failed,
    };
    ctx.cache().put_token(TokenType::Lock, ActionOp::Add, None, act.name, lock)
}

pub fn apply_aprvlock(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: AprvLock = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".lock"), act.name)?;

    let mut lock = (*ctx.cache().read_token_required::<LockDef, _>(
        TokenType::Lock,
        None,
        act.name,
        || ChainError::UnknownLock(act.name.to_string()),
    )?)
    .clone();

    if lock.unlock_time <= ctx.env.pending_block_time {
        return Err(ChainError::LockExpired);
    }

    match &lock.condition {
        LockCondition::CondKeys { cond_keys, .. } => {
            if act.data != LockAprvData::CondKey {
                return Err(ChainError::LockAprvData);
            }
            if !cond_keys.contains(&act.approver) {
                return Err(ChainError::LockAprvData);
            }
            if lock.signed_keys.contains(&act.approver) {
                return Err(ChainError::LockDuplicateKey);
            }
        }
    }

    lock.signed_keys.insert(act.approver);
    ctx.cache().put_token(TokenType::Lock, ActionOp::Update, None, act.name, lock)
}

pub fn apply_tryunlock(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: TryUnlock = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".lock"), act.name)?;

    let mut lock = (*ctx.cache().read_token_required::<LockDef, _>(
        TokenType::Lock,
        None,
        act.name,
        || ChainError::UnknownLock(act.name.to_string()),
    )?)
    .clone();

    if lock.status != LockStatus::Proposed {
        return Err(ChainError::LockExpired);
    }
    let now = ctx.env.pending_block_time;
    if lock.unlock_time >= now {
        return Err(ChainError::LockNotReachUnlockTime);
    }

    let satisfied = match &lock.condition {
        LockCondition::CondKeys { threshold, .. } => {
            lock.signed_keys.len() >= *threshold as usize
        }
    };
    let receivers = if satisfied {
        lock.status = LockStatus::Succeed;
        lock.succeed.clone()
    } else {
        // Conditions unmet: funds fall through to the failure path only
        // after the deadline passes.
        if lock.deadline >= now {
            return Err(ChainError::LockNotReachDeadline);
        }
        lock.status = LockStatus::Failed;
        lock.failed.clone()
    };

    let laddr = lock_address(act.name);
    for asset in &lock.assets {
        match asset {
            LockAsset::Tokens { domain, names } => {
                for name in names {
                    let mut token = (*ctx.cache().read_token_required::<TokenDef, _>(
                        TokenType::Token,
                        Some(*domain),
                        *name,
                        || ChainError::UnknownToken(domain.to_string(), name.to_string()),
                    )?)
                    .clone();
                    token.owner = receivers.clone();
                    ctx.cache().put_token(
                        TokenType::Token,
                        ActionOp::Update,
                        Some(*domain),
                        *name,
                        token,
                    )?;
                }
            }
            LockAsset::Fungible { amount, .. } => {
                debug_assert_eq!(receivers.len(), 1);
                ctx.transfer_funds(&laddr, &receivers[0], amount)?;
            }
        }
    }

    ctx.cache().put_token(TokenType::Lock, ActionOp::Update, None, act.name, lock)
}
