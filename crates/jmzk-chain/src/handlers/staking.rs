use tracing::info;

use jmzk_core::address::{staking_address, validator_address, Address};
use jmzk_core::asset::{evt_sym, nav_sym, Asset, EVT_SYM_ID, PERCENT_SCALE};
use jmzk_core::entities::{
    PendingShare, StakeShare, StakeType, StakepoolDef, ValidatorDef,
};
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::payloads::{
    decode_exact, NewStakepool, NewValidator, RecvStkBonus, StakeTkns, ToActiveTkns, UnstakeOp,
    UnstakeTkns, UpdStakepool, ValiWithdraw,
};
use jmzk_core::n128;
use jmzk_tokendb::{ActionOp, TokenType};

use crate::context::ApplyContext;
use crate::handlers::check_permission;

const SECS_PER_DAY: i64 = 24 * 3600;
const DAYS_PER_YEAR: i64 = 365;

fn stakepool_key(sym_id: u32) -> Name128 {
    Name128::from_number(sym_id as u128)
}

fn read_stakepool(ctx: &ApplyContext, sym_id: u32) -> Result<StakepoolDef, ChainError> {
    Ok((*ctx.cache().read_token_required::<StakepoolDef, _>(
        TokenType::Stakepool,
        None,
        stakepool_key(sym_id),
        || ChainError::UnknownStakepool(sym_id),
    )?)
    .clone())
}

fn read_validator(ctx: &ApplyContext, name: Name128) -> Result<ValidatorDef, ChainError> {
    Ok((*ctx.cache().read_token_required::<ValidatorDef, _>(
        TokenType::Validator,
        None,
        name,
        || ChainError::UnknownValidator(name.to_string()),
    )?)
    .clone())
}

fn put_stakepool(ctx: &ApplyContext, pool: &StakepoolDef) -> Result<(), ChainError> {
    ctx.cache().put_token(
        TokenType::Stakepool,
        ActionOp::Update,
        None,
        stakepool_key(pool.sym_id),
        pool.clone(),
    )
}

fn put_validator(ctx: &ApplyContext, validator: &ValidatorDef) -> Result<(), ChainError> {
    ctx.cache().put_token(
        TokenType::Validator,
        ActionOp::Update,
        None,
        validator.name,
        validator.clone(),
    )
}

// ── Unit arithmetic ──────────────────────────────────────────────────────────
//
// Net values carry 12 decimals; EVT carries 5. One stake unit is worth
// `net_value` whole EVT, so base-unit conversions shift by 10^7.

const NAV_SHIFT: i64 = 10_000_000;

fn units_for(amount_base: i64, nv: &Asset) -> Result<i64, ChainError> {
    if nv.amount() <= 0 {
        return Err(ChainError::MathOverflow);
    }
    Ok(((amount_base as i128 * NAV_SHIFT as i128) / nv.amount() as i128) as i64)
}

fn evt_base_for(units: i64, nv: &Asset) -> i64 {
    ((units as i128 * nv.amount() as i128) / NAV_SHIFT as i128) as i64
}

/// Yearly ROI of the demand curve, in PERCENT_SCALE units, evaluated at
/// the pool's current size (whole EVT staked).
fn demand_yroi(pool: &StakepoolDef) -> i64 {
    let staked = pool.total.amount() / 100_000;
    let denom = pool.demand_t.saturating_mul(staked).saturating_add(pool.demand_q);
    if denom == 0 {
        return pool.demand_w.clamp(0, PERCENT_SCALE as i64);
    }
    (pool.demand_r / denom + pool.demand_w).clamp(0, PERCENT_SCALE as i64)
}

fn fixed_yroi(pool: &StakepoolDef) -> i64 {
    pool.fixed_r.clamp(0, PERCENT_SCALE as i64)
}

/// Daily-compounded growth over `days`, applied to a 12-decimal net value.
fn compound(nv: &Asset, yroi: i64, days: i64) -> Asset {
    let daily = yroi / DAYS_PER_YEAR; // PERCENT_SCALE units
    let mut amount = nv.amount() as i128;
    for _ in 0..days.clamp(0, 100 * DAYS_PER_YEAR) {
        amount += amount * daily as i128 / PERCENT_SCALE as i128;
    }
    Asset::new(amount as i64, nv.sym())
}

/// Simple-interest unit bonus for a matured fixed share.
fn fixed_bonus_units(units: i64, yroi: i64, days: i64) -> i64 {
    ((units as i128 * yroi as i128 * days as i128)
        / (PERCENT_SCALE as i128 * DAYS_PER_YEAR as i128)) as i64
}

// ── Handlers ─────────────────────────────────────────────────────────────────

pub fn apply_newstakepool(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewStakepool = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), stakepool_key(act.sym_id))?;

    // The EVT pool is seeded at genesis; this creates pools for other
    // symbols.
    if ctx.cache().exists_token(TokenType::Stakepool, None, stakepool_key(act.sym_id))? {
        return Err(ChainError::StakepoolDuplicate(act.sym_id));
    }
    if act.purchase_threshold.sym().id() != act.sym_id || act.purchase_threshold.amount() < 0 {
        return Err(ChainError::AssetSymbol("bad purchase threshold".into()));
    }

    let pool = StakepoolDef {
        sym_id: act.sym_id,
        purchase_threshold: act.purchase_threshold,
        demand_r: act.demand_r,
        demand_t: act.demand_t,
        demand_q: act.demand_q,
        demand_w: act.demand_w,
        fixed_r: act.fixed_r,
        fixed_t: act.fixed_t,
        begin_time: ctx.env.pending_block_time,
        total: Asset::zero(act.purchase_threshold.sym()),
    };
    ctx.cache().put_token(TokenType::Stakepool, ActionOp::Add, None, stakepool_key(act.sym_id), pool)
}

pub fn apply_updstakepool(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UpdStakepool = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), stakepool_key(act.sym_id))?;

    let mut pool = read_stakepool(ctx, act.sym_id)?;
    if let Some(threshold) = act.purchase_threshold {
        if threshold.sym().id() != act.sym_id || threshold.amount() < 0 {
            return Err(ChainError::AssetSymbol("bad purchase threshold".into()));
        }
        pool.purchase_threshold = threshold;
    }
    if let Some(v) = act.demand_r {
        pool.demand_r = v;
    }
    if let Some(v) = act.demand_t {
        pool.demand_t = v;
    }
    if let Some(v) = act.demand_q {
        pool.demand_q = v;
    }
    if let Some(v) = act.demand_w {
        pool.demand_w = v;
    }
    if let Some(v) = act.fixed_r {
        pool.fixed_r = v;
    }
    if let Some(v) = act.fixed_t {
        pool.fixed_t = v;
    }
    put_stakepool(ctx, &pool)
}

pub fn apply_newvalidator(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewValidator = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), act.name)?;
    ctx.check_name_reserved(act.name)?;

    if ctx.cache().exists_token(TokenType::Validator, None, act.name)? {
        return Err(ChainError::ValidatorDuplicate(act.name.to_string()));
    }
    if !act.commission.is_valid_ratio() {
        return Err(ChainError::PercentValue(act.commission.to_string()));
    }
    check_permission(ctx, &act.withdraw, "withdraw", false, false)?;
    check_permission(ctx, &act.manage, "manage", false, true)?;

    let now = ctx.env.pending_block_time;
    let validator = ValidatorDef {
        name: act.name,
        creator: act.creator,
        signer: act.signer,
        withdraw: act.withdraw,
        manage: act.manage,
        commission: act.commission,
        create_time: now,
        last_updated_time: now,
        total_units: 0,
        current_net_value: Asset::from_units(1, nav_sym()),
    };
    ctx.cache().put_token(TokenType::Validator, ActionOp::Add, None, act.name, validator)
}

pub fn apply_staketkns(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: StakeTkns = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), act.validator)?;

    if act.amount.sym() != evt_sym() {
        return Err(ChainError::AssetSymbol("stakes are EVT only".into()));
    }
    let pool = read_stakepool(ctx, EVT_SYM_ID)?;
    if act.amount.amount() < pool.purchase_threshold.amount() {
        return Err(ChainError::StakingAmount);
    }
    let conf = ctx.services.state.global_property()?.staking_configuration;
    match act.type_ {
        StakeType::Active => {
            if act.fixed_days != 0 {
                return Err(ChainError::StakingDays);
            }
        }
        StakeType::Fixed => {
            if act.fixed_days < conf.fixed_days_min || act.fixed_days > conf.fixed_days_max {
                return Err(ChainError::StakingDays);
            }
        }
    }

    let mut validator = read_validator(ctx, act.validator)?;
    let staker = Address::PublicKey(act.staker);
    let units = units_for(act.amount.amount(), &validator.current_net_value)?;
    if units <= 0 {
        return Err(ChainError::StakingAmount);
    }

    // Principal moves into the pool's own address.
    ctx.transfer_funds(&staker, &staking_address(), &act.amount)?;

    let mut prop = ctx.read_stakes_or_new(&staker)?;
    prop.stake_shares.push(StakeShare {
        validator: act.validator,
        units,
        net_value: validator.current_net_value,
        time: ctx.env.pending_block_time,
        type_: act.type_,
        fixed_days: act.fixed_days,
    });
    ctx.put_stakes(&staker, &prop)?;

    validator.total_units += units;
    put_validator(ctx, &validator)?;

    let mut pool = pool;
    pool.total = pool.total.checked_add(act.amount.amount())?;
    put_stakepool(ctx, &pool)
}

pub fn apply_toactivetkns(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: ToActiveTkns = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), act.validator)?;

    let mut pool = read_stakepool(ctx, act.sym_id)?;
    let mut validator = read_validator(ctx, act.validator)?;
    let staker = Address::PublicKey(act.staker);
    let mut prop = ctx.read_stakes(&staker)?;

    let now = ctx.env.pending_block_time;
    let yroi = fixed_yroi(&pool);
    let mut minted_units = 0i64;
    let mut converted = false;

    for share in prop.stake_shares.iter_mut() {
        if share.validator != act.validator || share.type_ != StakeType::Fixed {
            continue;
        }
        if share.time + share.fixed_days as i64 * SECS_PER_DAY > now {
            continue;
        }
        // Maturity bonus mints extra units at the fixed curve's rate.
        let bonus = fixed_bonus_units(share.units, yroi, share.fixed_days as i64);
        share.units += bonus;
        share.type_ = StakeType::Active;
        share.fixed_days = 0;
        share.net_value = validator.current_net_value;
        share.time = now;
        minted_units += bonus;
        converted = true;
    }
    if !converted {
        return Err(ChainError::StakingShares);
    }

    ctx.put_stakes(&staker, &prop)?;

    if minted_units > 0 {
        validator.total_units += minted_units;
        let minted_base = evt_base_for(minted_units, &validator.current_net_value);
        // Maturity bonuses draw down the un-issued supply like accrual.
        ctx.transfer_funds(
            &jmzk_core::address::fungible_address(EVT_SYM_ID),
            &staking_address(),
            &Asset::new(minted_base, evt_sym()),
        )?;
        pool.total = pool.total.checked_add(minted_base)?;
    }
    put_validator(ctx, &validator)?;
    put_stakepool(ctx, &pool)
}

pub fn apply_unstaketkns(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UnstakeTkns = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), act.validator)?;

    if act.units <= 0 {
        return Err(ChainError::StakingNotEnough);
    }
    let mut pool = read_stakepool(ctx, act.sym_id)?;
    let mut validator = read_validator(ctx, act.validator)?;
    let staker = Address::PublicKey(act.staker);
    let mut prop = ctx.read_stakes(&staker)?;
    let now = ctx.env.pending_block_time;

    match act.op {
        UnstakeOp::Propose => {
            // Only active shares unstake; fixed ones convert first.
            let mut needed = act.units;
            let mut kept = Vec::with_capacity(prop.stake_shares.len());
            for mut share in prop.stake_shares.drain(..) {
                if needed == 0
                    || share.validator != act.validator
                    || share.type_ != StakeType::Active
                {
                    kept.push(share);
                    continue;
                }
                if share.units <= needed {
                    needed -= share.units;
                } else {
                    share.units -= needed;
                    needed = 0;
                    kept.push(share);
                }
            }
            if needed > 0 {
                prop.stake_shares = kept;
                return Err(ChainError::StakingNotEnough);
            }
            prop.stake_shares = kept;
            prop.pending_shares.push(PendingShare {
                validator: act.validator,
                units: act.units,
                net_value: validator.current_net_value,
                time: now,
            });
            ctx.put_stakes(&staker, &prop)
        }
        UnstakeOp::Cancel => {
            let mut cancelled = 0i64;
            prop.pending_shares.retain(|p| {
                if p.validator == act.validator {
                    cancelled += p.units;
                    false
                } else {
                    true
                }
            });
            if cancelled == 0 {
                return Err(ChainError::StakingNotEnough);
            }
            prop.stake_shares.push(StakeShare {
                validator: act.validator,
                units: cancelled,
                net_value: validator.current_net_value,
                time: now,
                type_: StakeType::Active,
                fixed_days: 0,
            });
            ctx.put_stakes(&staker, &prop)
        }
        UnstakeOp::Settle => {
            let conf = ctx.services.state.global_property()?.staking_configuration;
            let wait = conf.unstake_pending_days as i64 * SECS_PER_DAY;
            let mut settled_units = 0i64;
            let mut gross = 0i64;
            let mut commission = 0i64;
            let nv = validator.current_net_value;
            let mut kept = Vec::with_capacity(prop.pending_shares.len());
            for pending in prop.pending_shares.drain(..) {
                if pending.validator != act.validator || pending.time + wait > now {
                    kept.push(pending);
                    continue;
                }
                settled_units += pending.units;
                let value = evt_base_for(pending.units, &nv);
                gross += value;
                // Commission applies to the gain over the proposal basis.
                let basis = evt_base_for(pending.units, &pending.net_value);
                if value > basis {
                    commission += validator.commission.apply(value - basis);
                }
            }
            prop.pending_shares = kept;
            if settled_units == 0 {
                return Err(ChainError::StakingPending);
            }

            ctx.put_stakes(&staker, &prop)?;

            let payout = Asset::new(gross - commission, evt_sym());
            ctx.transfer_funds(&staking_address(), &staker, &payout)?;
            if commission > 0 {
                let vaddr = validator_address(validator.name, EVT_SYM_ID);
                ctx.transfer_funds(&staking_address(), &vaddr, &Asset::new(commission, evt_sym()))?;
            }

            validator.total_units -= settled_units;
            put_validator(ctx, &validator)?;
            pool.total = pool.total.checked_sub(gross)?;
            put_stakepool(ctx, &pool)
        }
    }
}

pub fn apply_valiwithdraw(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: ValiWithdraw = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), act.name)?;

    let validator = read_validator(ctx, act.name)?;
    if act.amount.sym() != evt_sym() || act.amount.amount() <= 0 {
        return Err(ChainError::AssetSymbol("withdrawals are EVT only".into()));
    }
    ctx.check_address_reserved(&act.addr)?;

    let vaddr = validator_address(validator.name, EVT_SYM_ID);
    ctx.transfer_funds(&vaddr, &act.addr, &act.amount)
}

pub fn apply_recvstkbonus(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: RecvStkBonus = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".staking"), act.validator)?;

    let mut pool = read_stakepool(ctx, act.sym_id)?;
    let mut validator = read_validator(ctx, act.validator)?;

    let now = ctx.env.pending_block_time;
    let days = (now - validator.last_updated_time) / SECS_PER_DAY;
    if days <= 0 {
        return Ok(());
    }

    // The net value rides the demand curve; the pool grows by the value
    // the validator's outstanding units gained.
    let yroi = demand_yroi(&pool);
    let old_nv = validator.current_net_value;
    let new_nv = compound(&old_nv, yroi, days);
    validator.current_net_value = new_nv;
    validator.last_updated_time += days * SECS_PER_DAY;

    let growth = evt_base_for(validator.total_units, &new_nv)
        - evt_base_for(validator.total_units, &old_nv);
    if growth > 0 {
        // Rewards draw down the un-issued EVT supply so later settlements
        // are fully funded at the pool address.
        ctx.transfer_funds(
            &jmzk_core::address::fungible_address(EVT_SYM_ID),
            &staking_address(),
            &Asset::new(growth, evt_sym()),
        )?;
        pool.total = pool.total.checked_add(growth)?;
    }

    info!(
        validator = %act.validator,
        days,
        net_value = %validator.current_net_value,
        "stake bonus accrued"
    );
    put_validator(ctx, &validator)?;
    put_stakepool(ctx, &pool)
}
