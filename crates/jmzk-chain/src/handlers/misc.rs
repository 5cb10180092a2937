use std::collections::BTreeMap;

use tracing::info;

use jmzk_core::address::{fungible_address, Address};
use jmzk_core::asset::{evt_sym, pevt_sym, Asset, EVT_SYM_ID};
use jmzk_core::entities::ScriptDef;
use jmzk_core::error::ChainError;
use jmzk_core::payloads::{
    decode_exact, BlackAddr, NewScript, PayCharge, ProdVote, UpdScript, UpdSched,
};
use jmzk_core::n128;
use jmzk_core::types::PublicKey;
use jmzk_tokendb::{ActionOp, TokenType};

use crate::context::ApplyContext;

/// Implicit fee collection. The payer settles in EVT first, then pinned
/// EVT; the scheduled producer is credited in EVT either way, with the
/// pinned portion burning against the un-issued supply so both symbols
/// keep their books.
pub fn apply_paycharge(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: PayCharge = decode_exact(&ctx.act.data)?;
    let charge = act.charge as i64;

    let evt_balance = ctx.balance(&act.payer, evt_sym())?;
    let paid_evt = charge.min(evt_balance);
    let remain = charge - paid_evt;
    if remain > 0 {
        let pevt_balance = ctx.balance(&act.payer, pevt_sym())?;
        if pevt_balance < remain {
            return Err(ChainError::ChargeExceeded { charge: act.charge, max: act.charge });
        }
    }

    let producer = Address::PublicKey(ctx.env.producer_signing_key);
    if paid_evt > 0 {
        ctx.transfer_funds(&act.payer, &producer, &Asset::new(paid_evt, evt_sym()))?;
    }
    if remain > 0 {
        // Pinned EVT burns; the producer's matching EVT comes out of the
        // un-issued supply.
        ctx.transfer_funds(&act.payer, &Address::Reserved, &Asset::new(remain, pevt_sym()))?;
        ctx.transfer_funds(
            &fungible_address(EVT_SYM_ID),
            &producer,
            &Asset::new(remain, evt_sym()),
        )?;
    }
    Ok(())
}

const PRODVOTE_KEYS: [&str; 4] = [
    "network-charge-factor",
    "storage-charge-factor",
    "cpu-charge-factor",
    "global-charge-factor",
];

pub fn apply_prodvote(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: ProdVote = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".prodvote"), act.key)?;

    if act.value <= 0 || act.value >= 1_000_000 {
        return Err(ChainError::ProdvoteValue(act.value));
    }
    let key_str = act.key.as_str();
    if !PRODVOTE_KEYS.contains(&key_str.as_str()) {
        return Err(ChainError::ProdvoteKey(key_str));
    }

    let schedule = ctx.env.active_schedule.clone();
    let producer_key = *schedule
        .producer_key(act.producer)
        .ok_or_else(|| ChainError::ProdvoteProducer(act.producer.to_string()))?;

    // Tally: one standing vote per producer key, latest value wins.
    let mut votes: BTreeMap<PublicKey, i64> = ctx
        .cache()
        .read_token(TokenType::Prodvote, None, act.key)?
        .map(|v: std::sync::Arc<BTreeMap<PublicKey, i64>>| (*v).clone())
        .unwrap_or_default();
    votes.insert(producer_key, act.value);
    ctx.cache().put_token(TokenType::Prodvote, ActionOp::Put, None, act.key, votes.clone())?;

    let mut values: Vec<i64> = schedule
        .producers
        .iter()
        .filter_map(|p| votes.get(&p.block_signing_key).copied())
        .collect();

    let n = schedule.producers.len();
    let quorum = (2 * n + 2) / 3; // ceil(2N/3)
    if values.len() < quorum {
        return Ok(());
    }

    values.sort_unstable();
    let new_value = if values.len() % 2 == 0 {
        (values[values.len() / 2 - 1] + values[values.len() / 2]) / 2
    } else {
        values[values.len() / 2]
    };

    let mut gpo = ctx.services.state.global_property()?;
    match key_str.as_str() {
        "network-charge-factor" => gpo.configuration.base_network_charge_factor = new_value as u32,
        "storage-charge-factor" => gpo.configuration.base_storage_charge_factor = new_value as u32,
        "cpu-charge-factor" => gpo.configuration.base_cpu_charge_factor = new_value as u32,
        _ => gpo.configuration.global_charge_factor = new_value as u32,
    }
    ctx.services.state.set_global_property(&gpo)?;
    info!(key = %act.key, value = new_value, "chain configuration updated by producer vote");
    Ok(())
}

pub fn apply_updsched(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UpdSched = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".prodsched"), n128!(".update"))?;

    if act.producers.producers.is_empty()
        || act.producers.producers.len() > jmzk_core::config::MAX_PRODUCERS
    {
        return Err(ChainError::BlockValidate("invalid proposed schedule size".into()));
    }

    let mut proposed = act.producers;
    proposed.version = ctx.env.active_schedule.version + 1;

    let mut gpo = ctx.services.state.global_property()?;
    gpo.proposed_schedule_block_num = Some(ctx.env.pending_block_num);
    gpo.proposed_schedule = Some(proposed);
    ctx.services.state.set_global_property(&gpo)?;
    Ok(())
}

pub fn apply_newscript(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewScript = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".script"), act.name)?;
    ctx.check_name_reserved(act.name)?;

    if ctx.cache().exists_token(TokenType::Script, None, act.name)? {
        return Err(ChainError::TokenDatabase(format!("script {} already exists", act.name)));
    }
    let script = ScriptDef {
        name: act.name,
        content: act.content,
        creator: act.creator,
        create_time: ctx.env.pending_block_time,
    };
    ctx.cache().put_token(TokenType::Script, ActionOp::Add, None, act.name, script)
}

pub fn apply_updscript(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UpdScript = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".script"), act.name)?;

    let mut script = (*ctx.cache().read_token_required::<ScriptDef, _>(
        TokenType::Script,
        None,
        act.name,
        || ChainError::UnknownScript(act.name.to_string()),
    )?)
    .clone();
    script.content = act.content;
    ctx.cache().put_token(TokenType::Script, ActionOp::Update, None, act.name, script)
}

pub fn apply_blackaddr(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: BlackAddr = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".blackaddr"), n128!(".update"))?;

    let mut list = ctx.services.state.blacklist()?;
    for addr in act.addrs {
        ctx.check_address_reserved(&addr)?;
        if !list.contains(&addr) {
            list.push(addr);
        }
    }
    ctx.services.state.set_blacklist(&list)?;
    Ok(())
}
