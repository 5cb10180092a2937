use tracing::info;

use jmzk_core::address::{bonus_address, Address};
use jmzk_core::asset::{Asset, Percent, EVT_SYM_ID, PEVT_SYM_ID};
use jmzk_core::entities::{DistReceiver, DistRule, PassiveBonus, PassiveBonusDist, Property};
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::payloads::{decode_exact, DistPsvBonus, DistRuleV2, SetPsvBonus, SetPsvBonusV2};
use jmzk_core::{n, n128};
use jmzk_tokendb::{ActionOp, TokenType};

use crate::context::ApplyContext;
use crate::handlers::fungible::read_fungible;

fn bonus_key(sym_id: u32) -> Name128 {
    Name128::from_number(sym_id as u128)
}

fn dist_key(sym_id: u32, round: u32) -> Name128 {
    Name128::from_number(((sym_id as u128) << 32) | round as u128)
}

fn ratio(p: &Percent) -> Result<Percent, ChainError> {
    if p.0 == 0 || !p.is_valid_ratio() {
        return Err(ChainError::BonusPercentValue);
    }
    Ok(*p)
}

fn check_receiver(receiver: &DistReceiver, sym_id: u32) -> Result<(), ChainError> {
    match receiver {
        DistReceiver::Address(addr) => {
            if addr.is_reserved() {
                return Err(ChainError::BonusReceiver);
            }
        }
        DistReceiver::FtHolders { threshold } => {
            if threshold.amount() < 0 || threshold.sym().id() != sym_id {
                return Err(ChainError::BonusReceiver);
            }
        }
    }
    Ok(())
}

/// Rules must consume the distribution threshold exactly: fixed amounts,
/// then percents of the threshold, then remaining-percents summing to one.
fn validate_rules(rules: &[DistRule], dist_threshold: &Asset) -> Result<(), ChainError> {
    if rules.is_empty() {
        return Err(ChainError::BonusRules("rules cannot be empty".into()));
    }
    let sym_id = dist_threshold.sym().id();

    let mut stage = 0u8; // 0 fixed, 1 percent, 2 remaining-percent
    let mut consumed: i64 = 0;
    let mut remaining_sum: u64 = 0;
    for rule in rules {
        match rule {
            DistRule::Fixed { receiver, amount } => {
                if stage > 0 {
                    return Err(ChainError::BonusRulesOrder);
                }
                check_receiver(receiver, sym_id)?;
                if amount.amount() <= 0 || amount.sym() != dist_threshold.sym() {
                    return Err(ChainError::BonusRules("bad fixed amount".into()));
                }
                consumed = consumed.checked_add(amount.amount()).ok_or(ChainError::MathOverflow)?;
                if consumed > dist_threshold.amount() {
                    return Err(ChainError::BonusRules(
                        "fixed amounts exceed the distribution threshold".into(),
                    ));
                }
            }
            DistRule::Percent { receiver, percent } => {
                if stage > 1 {
                    return Err(ChainError::BonusRulesOrder);
                }
                stage = 1;
                check_receiver(receiver, sym_id)?;
                let p = ratio(percent)?;
                consumed = consumed
                    .checked_add(p.apply(dist_threshold.amount()))
                    .ok_or(ChainError::MathOverflow)?;
                if consumed > dist_threshold.amount() {
                    return Err(ChainError::BonusRules(
                        "percents exceed the distribution threshold".into(),
                    ));
                }
            }
            DistRule::RemainingPercent { receiver, percent } => {
                stage = 2;
                check_receiver(receiver, sym_id)?;
                let p = ratio(percent)?;
                remaining_sum += p.0 as u64;
                if remaining_sum > jmzk_core::asset::PERCENT_SCALE as u64 {
                    return Err(ChainError::BonusPercentValue);
                }
            }
        }
    }

    if consumed < dist_threshold.amount()
        && remaining_sum != jmzk_core::asset::PERCENT_SCALE as u64
    {
        return Err(ChainError::BonusRulesNotFullfill);
    }
    Ok(())
}

fn convert_v2(act: SetPsvBonusV2) -> Result<SetPsvBonus, ChainError> {
    let mut rules = Vec::with_capacity(act.rules.len());
    for rule in act.rules {
        rules.push(match rule {
            DistRuleV2::Fixed { receiver, amount } => DistRule::Fixed { receiver, amount },
            DistRuleV2::Percent { receiver, percent } => {
                DistRule::Percent { receiver, percent: percent.parse()? }
            }
            DistRuleV2::RemainingPercent { receiver, percent } => {
                DistRule::RemainingPercent { receiver, percent: percent.parse()? }
            }
        });
    }
    Ok(SetPsvBonus {
        sym: act.dist_threshold.sym(),
        rate: act.rate.parse()?,
        base_charge: act.base_charge,
        charge_threshold: act.charge_threshold,
        minimum_charge: act.minimum_charge,
        dist_threshold: act.dist_threshold,
        rules,
        methods: act.methods,
    })
}

pub fn apply_setpsvbonus(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: SetPsvBonus = match ctx.services.exec.current_version(n!("setpsvbonus"))? {
        1 => decode_exact(&ctx.act.data)?,
        _ => convert_v2(decode_exact::<SetPsvBonusV2>(&ctx.act.data)?)?,
    };
    let sym = act.sym;
    ctx.has_authorized(n128!(".bonus"), bonus_key(sym.id()))?;

    if sym.id() == EVT_SYM_ID || sym.id() == PEVT_SYM_ID {
        return Err(ChainError::BonusRules("native symbols cannot carry a bonus".into()));
    }
    let fungible = read_fungible(ctx, sym.id())?;
    if fungible.sym != sym {
        return Err(ChainError::AssetSymbol("bonus symbol mismatch".into()));
    }
    if ctx.cache().exists_token(TokenType::Psvbonus, None, bonus_key(sym.id()))? {
        return Err(ChainError::BonusDuplicate(sym.id()));
    }

    ratio(&act.rate)?;
    if act.base_charge.amount() < 0 || act.base_charge.sym() != sym {
        return Err(ChainError::BonusRules("bad base charge".into()));
    }
    if let Some(threshold) = &act.charge_threshold {
        if threshold.amount() < 0 || threshold.sym() != sym {
            return Err(ChainError::BonusRules("bad charge threshold".into()));
        }
    }
    if let Some(min) = &act.minimum_charge {
        if min.amount() < 0 || min.sym() != sym {
            return Err(ChainError::BonusRules("bad minimum charge".into()));
        }
        if let Some(threshold) = &act.charge_threshold {
            if min.amount() > threshold.amount() {
                return Err(ChainError::BonusRules(
                    "minimum charge above the charge threshold".into(),
                ));
            }
        }
    }
    if act.dist_threshold.amount() <= 0 || act.dist_threshold.sym() != sym {
        return Err(ChainError::BonusRules("bad distribution threshold".into()));
    }
    validate_rules(&act.rules, &act.dist_threshold)?;

    if act.methods.is_empty() {
        return Err(ChainError::BonusMethod("<empty>".into()));
    }
    for (i, (action, _)) in act.methods.iter().enumerate() {
        if *action != n!("transferft") && *action != n!("everipay") {
            return Err(ChainError::BonusMethod(action.to_string()));
        }
        if act.methods[..i].iter().any(|(a, _)| a == action) {
            return Err(ChainError::BonusMethod(action.to_string()));
        }
    }

    let bonus = PassiveBonus {
        sym_id: sym.id(),
        rate: act.rate,
        base_charge: act.base_charge,
        charge_threshold: act.charge_threshold,
        minimum_charge: act.minimum_charge,
        dist_threshold: act.dist_threshold,
        rules: act.rules,
        methods: act.methods,
        round: 0,
        deadline: 0,
    };
    ctx.cache().put_token(TokenType::Psvbonus, ActionOp::Add, None, bonus_key(sym.id()), bonus)
}

/// Pro-rata payout to every public-key holder at or above the threshold.
/// System addresses (the supply pool, locks, earlier bonus rounds) never
/// collect.
fn pay_ftholders(
    ctx: &ApplyContext,
    pool: &Address,
    threshold: &Asset,
    share: i64,
) -> Result<i64, ChainError> {
    let sym = threshold.sym();
    let mut holders: Vec<(Address, i64)> = Vec::new();
    let mut total: i64 = 0;
    ctx.services.cache.db().read_assets_range(sym.id(), 0, |addr_bytes, value| {
        if let Ok(addr) = Address::from_key_bytes(addr_bytes) {
            if addr.is_public_key() {
                if let Ok(prop) = bincode::deserialize::<Property>(value) {
                    if prop.amount >= threshold.amount() && prop.amount > 0 {
                        total += prop.amount;
                        holders.push((addr, prop.amount));
                    }
                }
            }
        }
        true
    })?;

    if total == 0 {
        return Ok(0);
    }
    let mut paid = 0i64;
    for (addr, balance) in holders {
        let cut = ((share as i128 * balance as i128) / total as i128) as i64;
        if cut > 0 {
            ctx.transfer_funds(pool, &addr, &Asset::new(cut, sym))?;
            paid += cut;
        }
    }
    Ok(paid)
}

pub fn apply_distpsvbonus(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: DistPsvBonus = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".bonus"), bonus_key(act.sym_id))?;

    let mut bonus = (*ctx.cache().read_token_required::<PassiveBonus, _>(
        TokenType::Psvbonus,
        None,
        bonus_key(act.sym_id),
        || ChainError::UnknownBonus(act.sym_id),
    )?)
    .clone();

    let fungible = read_fungible(ctx, act.sym_id)?;
    let sym = fungible.sym;
    let pool = bonus_address(act.sym_id, bonus.round);
    let accumulated = ctx.balance(&pool, sym)?;
    if accumulated < bonus.dist_threshold.amount() {
        return Err(ChainError::BonusUnreachedThreshold);
    }

    // Fixed amounts first, percents of what they leave, remaining-percents
    // of the tail.
    let mut remainder = accumulated;
    for rule in &bonus.rules {
        if let DistRule::Fixed { receiver, amount } = rule {
            match receiver {
                DistReceiver::Address(addr) => {
                    ctx.transfer_funds(&pool, addr, amount)?;
                    remainder -= amount.amount();
                }
                DistReceiver::FtHolders { threshold } => {
                    remainder -= pay_ftholders(ctx, &pool, threshold, amount.amount())?;
                }
            }
        }
    }
    let after_fixed = remainder;
    for rule in &bonus.rules {
        if let DistRule::Percent { receiver, percent } = rule {
            let share = percent.apply(after_fixed);
            if share == 0 {
                continue;
            }
            match receiver {
                DistReceiver::Address(addr) => {
                    ctx.transfer_funds(&pool, addr, &Asset::new(share, sym))?;
                    remainder -= share;
                }
                DistReceiver::FtHolders { threshold } => {
                    remainder -= pay_ftholders(ctx, &pool, threshold, share)?;
                }
            }
        }
    }
    let tail = remainder;
    for rule in &bonus.rules {
        if let DistRule::RemainingPercent { receiver, percent } = rule {
            let share = percent.apply(tail);
            if share == 0 {
                continue;
            }
            match receiver {
                DistReceiver::Address(addr) => {
                    ctx.transfer_funds(&pool, addr, &Asset::new(share, sym))?;
                    remainder -= share;
                }
                DistReceiver::FtHolders { threshold } => {
                    remainder -= pay_ftholders(ctx, &pool, threshold, share)?;
                }
            }
        }
    }

    // Open the next round; rounding dust rolls forward with it.
    let now = ctx.env.pending_block_time;
    bonus.round += 1;
    bonus.deadline = now;
    let next_pool = bonus_address(act.sym_id, bonus.round);
    if remainder > 0 {
        ctx.transfer_funds(&pool, &next_pool, &Asset::new(remainder, sym))?;
    }

    let dist = PassiveBonusDist {
        sym_id: act.sym_id,
        round: bonus.round,
        total: Asset::new(accumulated, sym),
        dist_time: now,
    };
    ctx.cache().put_token(
        TokenType::PsvbonusDist,
        ActionOp::Add,
        None,
        dist_key(act.sym_id, bonus.round),
        dist,
    )?;

    info!(sym_id = act.sym_id, round = bonus.round, total = accumulated, "passive bonus distributed");
    ctx.cache().put_token(TokenType::Psvbonus, ActionOp::Update, None, bonus_key(act.sym_id), bonus)
}
