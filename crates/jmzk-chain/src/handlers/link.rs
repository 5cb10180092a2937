use std::collections::BTreeSet;

use jmzk_core::address::Address;
use jmzk_core::asset::PEVT_SYM_ID;
use jmzk_core::entities::{EvtLinkObject, TokenDef};
use jmzk_core::error::ChainError;
use jmzk_core::link::{self, EvtLink};
use jmzk_core::name::Name128;
use jmzk_core::payloads::{decode_exact, DestroyToken, EveriPass, EveriPassV1, EveriPay, EveriPayV1};
use jmzk_core::transaction::Action;
use jmzk_core::types::PublicKey;
use jmzk_core::{n, n128};
use jmzk_tokendb::{ActionOp, TokenType};

use crate::authorizer::AuthorityChecker;
use crate::context::ApplyContext;
use crate::handlers::fungible::read_fungible;

fn restore_keys(link: &EvtLink) -> Result<BTreeSet<PublicKey>, ChainError> {
    let digest = link.signing_digest();
    let mut keys = BTreeSet::new();
    for sig in &link.signatures {
        keys.insert(jmzk_crypto::recover(&digest, sig)?);
    }
    Ok(keys)
}

fn check_link_expiration(ctx: &ApplyContext, link: &EvtLink) -> Result<(), ChainError> {
    if ctx.env.loadtest_mode {
        return Ok(());
    }
    let ts = link.int(link::TIMESTAMP)? as i64;
    let gpo = ctx.services.state.global_property()?;
    let since = (ctx.env.pending_block_time - ts).abs();
    if since > gpo.configuration.evt_link_expired_secs as i64 {
        return Err(ChainError::EvtLinkExpiration);
    }
    Ok(())
}

pub fn apply_everipass(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: EveriPass = match ctx.services.exec.current_version(n!("everipass"))? {
        1 => {
            let v1: EveriPassV1 = decode_exact(&ctx.act.data)?;
            EveriPass { link: v1.link, memo: String::new() }
        }
        _ => decode_exact(&ctx.act.data)?,
    };
    let flags = act.link.header;

    if flags & link::VERSION1 == 0 {
        return Err(ChainError::EvtLinkVersion);
    }
    if flags & link::EVERIPASS == 0 {
        return Err(ChainError::EvtLinkType);
    }

    let domain = Name128::new(act.link.str_(link::DOMAIN)?)?;
    let token_name = Name128::new(act.link.str_(link::TOKEN)?)?;
    ctx.has_authorized(domain, token_name)?;
    check_link_expiration(ctx, &act.link)?;

    let keys = restore_keys(&act.link)?;

    let mut token = (*ctx.cache().read_token_required::<TokenDef, _>(
        TokenType::Token,
        Some(domain),
        token_name,
        || ChainError::UnknownToken(domain.to_string(), token_name.to_string()),
    )?)
    .clone();

    if token.is_destroyed() {
        return Err(ChainError::TokenDestroyed);
    }
    if token.is_locked() {
        return Err(ChainError::TokenLocked);
    }

    if flags & link::DESTROY != 0 {
        // The holder asked the pass to consume the token: the link keys
        // must carry destroy authority.
        let dt = DestroyToken { domain, name: token_name };
        let dtact = Action::new(n!("destroytoken"), domain, token_name, &dt);
        let gpo = ctx.services.state.global_property()?;
        let mut checker =
            AuthorityChecker::new(ctx.services, &keys, gpo.configuration.max_authority_depth);
        checker.satisfied(&dtact, ctx.env.active_schedule.as_ref())?;

        token.owner = vec![Address::Reserved];
        ctx.cache().put_token(TokenType::Token, ActionOp::Update, Some(domain), token_name, token)
    } else {
        // Pure pass: the link signatures must be exactly the owner set.
        if token.owner.len() != keys.len() {
            return Err(ChainError::Everipass("owner and key counts differ".into()));
        }
        for owner in &token.owner {
            match owner.public_key() {
                Some(pk) if keys.contains(pk) => {}
                _ => return Err(ChainError::Everipass("owner did not sign the link".into())),
            }
        }
        Ok(())
    }
}

pub fn apply_everipay(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: EveriPay = match ctx.services.exec.current_version(n!("everipay"))? {
        1 => {
            let v1: EveriPayV1 = decode_exact(&ctx.act.data)?;
            EveriPay { link: v1.link, payee: v1.payee, number: v1.number, memo: String::new() }
        }
        _ => decode_exact(&ctx.act.data)?,
    };
    ctx.check_address_reserved(&act.payee)?;

    let flags = act.link.header;
    if flags & link::VERSION1 == 0 {
        return Err(ChainError::EvtLinkVersion);
    }
    if flags & link::EVERIPAY == 0 {
        return Err(ChainError::EvtLinkType);
    }

    let link_sym_id = act.link.int(link::SYMBOL_ID)?;
    ctx.has_authorized(n128!(".fungible"), Name128::from_number(link_sym_id as u128))?;
    check_link_expiration(ctx, &act.link)?;

    // A link id pays exactly once, ever.
    let link_id = act.link.link_id()?;
    let link_key = Name128::from_bytes(link_id);
    if ctx.cache().exists_token(TokenType::Evtlink, None, link_key)? {
        return Err(ChainError::EvtLinkDupe(hex::encode(link_id)));
    }
    let link_obj = EvtLinkObject {
        link_id,
        block_num: ctx.env.pending_block_num,
        trx_id: ctx.trx.id(),
    };
    ctx.cache().put_token(TokenType::Evtlink, ActionOp::Add, None, link_key, link_obj)?;

    let keys = restore_keys(&act.link)?;
    if keys.len() != 1 {
        return Err(ChainError::Everipay("exactly one signature is required".into()));
    }

    let sym = act.number.sym();
    if link_sym_id != sym.id() {
        return Err(ChainError::Everipay("link and payment symbols differ".into()));
    }
    if sym.id() == PEVT_SYM_ID {
        return Err(ChainError::Everipay("pinned EVT cannot pay".into()));
    }
    let fungible = read_fungible(ctx, sym.id())?;
    if fungible.sym.precision() != sym.precision() {
        return Err(ChainError::AssetPrecision {
            expected: fungible.sym.precision(),
            got: sym.precision(),
        });
    }

    let max_pay = act.link.max_pay()?;
    if act.number.amount() as u64 > max_pay {
        return Err(ChainError::Everipay("amount exceeds the link's max pay".into()));
    }

    let payer = Address::PublicKey(*keys.iter().next().unwrap());
    if payer == act.payee {
        return Err(ChainError::Everipay("payer and payee are the same".into()));
    }

    let within =
        super::fungible::collect_bonus_for(ctx, n!("everipay"), &payer, &act.number)?;
    let pay = jmzk_core::asset::Asset::new(act.number.amount() - within, sym);
    ctx.transfer_funds(&payer, &act.payee, &pay)
}
