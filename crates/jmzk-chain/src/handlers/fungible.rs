use jmzk_core::address::{bonus_address, fungible_address, Address};
use jmzk_core::asset::{evt_sym, pevt_sym, Asset, PEVT_SYM_ID};
use jmzk_core::entities::{FungibleDef, PassiveBonus, PassiveMethod};
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::payloads::{
    decode_exact, DestroyFt, Evt2Pevt, IssueFungible, NewFungible, NewFungibleV1, RecycleFt,
    TransferFt, UpdFungible, UpdFungibleV1,
};
use jmzk_core::{n, n128};
use jmzk_tokendb::{ActionOp, TokenType};

use crate::context::ApplyContext;
use crate::handlers::check_permission;

fn fungible_key(sym_id: u32) -> Name128 {
    Name128::from_number(sym_id as u128)
}

pub(crate) fn read_fungible(
    ctx: &ApplyContext,
    sym_id: u32,
) -> Result<std::sync::Arc<FungibleDef>, ChainError> {
    ctx.cache().read_token_required(TokenType::Fungible, None, fungible_key(sym_id), || {
        ChainError::UnknownFungible(sym_id)
    })
}

pub fn apply_newfungible(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewFungible = match ctx.services.exec.current_version(n!("newfungible"))? {
        1 => {
            let v1: NewFungibleV1 = decode_exact(&ctx.act.data)?;
            // v1 had no transfer permission: holders transfer their own.
            NewFungible {
                name: v1.name,
                sym_name: v1.sym_name,
                sym: v1.sym,
                creator: v1.creator,
                issue: v1.issue,
                transfer: jmzk_core::authority::PermissionDef::new(n!("transfer"), 1)
                    .with(jmzk_core::authority::AuthorizerRef::Owner, 1),
                manage: v1.manage,
                total_supply: v1.total_supply,
            }
        }
        _ => decode_exact(&ctx.act.data)?,
    };

    ctx.has_authorized(n128!(".fungible"), fungible_key(act.sym.id()))?;

    if act.name.is_empty() || act.sym_name.is_empty() {
        return Err(ChainError::FungibleName);
    }
    if act.sym.id() == 0 || !act.sym.valid() {
        return Err(ChainError::AssetSymbol(act.sym.to_string()));
    }
    if act.total_supply.sym() != act.sym {
        return Err(ChainError::AssetSymbol("total_supply symbol mismatch".into()));
    }
    if act.total_supply.amount() <= 0 || act.total_supply.amount() > Asset::MAX_AMOUNT {
        return Err(ChainError::FungibleSupply);
    }
    if ctx.cache().exists_token(TokenType::Fungible, None, fungible_key(act.sym.id()))? {
        return Err(ChainError::FungibleDuplicate(act.sym.id()));
    }

    check_permission(ctx, &act.issue, "issue", false, false)?;
    check_permission(ctx, &act.transfer, "transfer", true, true)?;
    check_permission(ctx, &act.manage, "manage", false, true)?;

    let fungible = FungibleDef {
        name: act.name,
        sym_name: act.sym_name,
        sym: act.sym,
        creator: act.creator,
        // Head block time, not pending: kept for bit-exact replay.
        create_time: ctx.env.head_block_time,
        issue: act.issue,
        transfer: act.transfer,
        manage: act.manage,
        total_supply: act.total_supply,
        metas: vec![],
    };
    ctx.cache().put_token(
        TokenType::Fungible,
        ActionOp::Add,
        None,
        fungible_key(act.sym.id()),
        fungible,
    )?;

    // The fungible's own address holds the entire un-issued supply.
    ctx.credit(&fungible_address(act.sym.id()), &act.total_supply)
}

pub fn apply_updfungible(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UpdFungible = match ctx.services.exec.current_version(n!("updfungible"))? {
        1 => {
            let v1: UpdFungibleV1 = decode_exact(&ctx.act.data)?;
            UpdFungible { sym_id: v1.sym_id, issue: v1.issue, transfer: None, manage: v1.manage }
        }
        _ => decode_exact(&ctx.act.data)?,
    };

    ctx.has_authorized(n128!(".fungible"), fungible_key(act.sym_id))?;

    let mut fungible = (*read_fungible(ctx, act.sym_id)?).clone();

    if let Some(issue) = act.issue {
        check_permission(ctx, &issue, "issue", false, false)?;
        fungible.issue = issue;
    }
    if let Some(transfer) = act.transfer {
        if jmzk_core::entities::meta_value(&fungible.metas, n128!(".disable-set-transfer"))
            == Some("true")
        {
            return Err(ChainError::PermissionType(
                "transfer permission updates are disabled for this fungible".into(),
            ));
        }
        check_permission(ctx, &transfer, "transfer", true, true)?;
        fungible.transfer = transfer;
    }
    if let Some(manage) = act.manage {
        check_permission(ctx, &manage, "manage", false, true)?;
        fungible.manage = manage;
    }

    ctx.cache().put_token(
        TokenType::Fungible,
        ActionOp::Update,
        None,
        fungible_key(act.sym_id),
        fungible,
    )
}

pub fn apply_issuefungible(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: IssueFungible = decode_exact(&ctx.act.data)?;
    let sym = act.number.sym();
    ctx.has_authorized(n128!(".fungible"), fungible_key(sym.id()))?;
    ctx.check_address_reserved(&act.address)?;

    let fungible = read_fungible(ctx, sym.id())?;
    if fungible.sym.precision() != sym.precision() {
        return Err(ChainError::AssetPrecision {
            expected: fungible.sym.precision(),
            got: sym.precision(),
        });
    }

    let supply_addr = fungible_address(sym.id());
    if supply_addr == act.address {
        return Err(ChainError::FungibleAddress);
    }
    if ctx.balance(&supply_addr, sym)? < act.number.amount() {
        return Err(ChainError::FungibleSupply);
    }

    ctx.transfer_funds(&supply_addr, &act.address, &act.number)
}

/// Collect a registered passive bonus for `action`, if any. Returns how
/// much of the stated amount the bonus consumed (nonzero only for the
/// within-amount method).
pub(crate) fn collect_bonus_for(
    ctx: &ApplyContext,
    action: jmzk_core::name::Name,
    from: &Address,
    number: &Asset,
) -> Result<i64, ChainError> {
    let sym = number.sym();
    let Some(bonus) = ctx.cache().read_token::<PassiveBonus>(
        TokenType::Psvbonus,
        None,
        fungible_key(sym.id()),
    )?
    else {
        return Ok(0);
    };
    let Some(method) = bonus.method_for(action) else {
        return Ok(0);
    };
    let charge = bonus.charge_for(number.amount());
    if charge == 0 {
        return Ok(0);
    }
    let pool = bonus_address(sym.id(), bonus.round);
    match method {
        // The receiver's share shrinks; the sender pays what they stated.
        PassiveMethod::WithinAmount => {
            if charge >= number.amount() {
                return Err(ChainError::BonusRules("charge consumes the whole amount".into()));
            }
        }
        // The sender pays the charge on top of the stated amount.
        PassiveMethod::OutsideAmount => {}
    }
    ctx.transfer_funds(from, &pool, &Asset::new(charge, sym))?;
    Ok(match method {
        PassiveMethod::WithinAmount => charge,
        PassiveMethod::OutsideAmount => 0,
    })
}

pub fn apply_transferft(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: TransferFt = decode_exact(&ctx.act.data)?;
    let sym = act.number.sym();
    ctx.has_authorized(n128!(".fungible"), fungible_key(sym.id()))?;

    if act.from == act.to {
        return Err(ChainError::FungibleAddress);
    }
    if sym == pevt_sym() || sym.id() == PEVT_SYM_ID {
        return Err(ChainError::AssetSymbol("pinned EVT cannot be transferred".into()));
    }
    ctx.check_address_reserved(&act.to)?;

    let fungible = read_fungible(ctx, sym.id())?;
    if fungible.sym.precision() != sym.precision() {
        return Err(ChainError::AssetPrecision {
            expected: fungible.sym.precision(),
            got: sym.precision(),
        });
    }

    let within = collect_bonus_for(ctx, n!("transferft"), &act.from, &act.number)?;
    let pay = Asset::new(act.number.amount() - within, sym);
    ctx.transfer_funds(&act.from, &act.to, &pay)
}

pub fn apply_recycleft(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: RecycleFt = decode_exact(&ctx.act.data)?;
    let sym = act.number.sym();
    ctx.has_authorized(n128!(".fungible"), fungible_key(sym.id()))?;

    if sym.id() == PEVT_SYM_ID {
        return Err(ChainError::AssetSymbol("pinned EVT cannot be recycled".into()));
    }
    read_fungible(ctx, sym.id())?;

    ctx.transfer_funds(&act.address, &fungible_address(sym.id()), &act.number)
}

pub fn apply_destroyft(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: DestroyFt = decode_exact(&ctx.act.data)?;
    let sym = act.number.sym();
    ctx.has_authorized(n128!(".fungible"), fungible_key(sym.id()))?;

    if sym.id() == PEVT_SYM_ID {
        return Err(ChainError::AssetSymbol("pinned EVT cannot be destroyed".into()));
    }
    read_fungible(ctx, sym.id())?;

    ctx.transfer_funds(&act.address, &Address::Reserved, &act.number)
}

pub fn apply_evt2pevt(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: Evt2Pevt = decode_exact(&ctx.act.data)?;
    if act.number.sym() != evt_sym() {
        return Err(ChainError::AssetSymbol("only EVT converts to pinned EVT".into()));
    }
    ctx.has_authorized(n128!(".fungible"), fungible_key(evt_sym().id()))?;
    ctx.check_address_reserved(&act.to)?;

    // EVT burns into the reserved ledger; the matching PEVT mints out of
    // the PEVT supply address. Both symbols keep their supply equations.
    ctx.transfer_funds(&act.from, &Address::Reserved, &act.number)?;

    let minted = Asset::new(act.number.amount(), pevt_sym());
    let pevt_supply = fungible_address(pevt_sym().id());
    if ctx.balance(&pevt_supply, pevt_sym())? < minted.amount() {
        return Err(ChainError::FungibleSupply);
    }
    ctx.transfer_funds(&pevt_supply, &act.to, &minted)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fungible_keys_are_decimal_names() {
        assert_eq!(fungible_key(3), n128!("3"));
        assert_eq!(fungible_key(4018), n128!("4018"));
    }

    #[test]
    fn symbols_are_guarded() {
        assert_eq!(pevt_sym().id(), PEVT_SYM_ID);
        assert_ne!(evt_sym(), pevt_sym());
    }
}
