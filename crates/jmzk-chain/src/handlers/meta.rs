use jmzk_core::authority::{AuthorizerRef, Group, PermissionDef};
use jmzk_core::entities::{DomainDef, FungibleDef, Meta, TokenDef};
use jmzk_core::error::ChainError;
use jmzk_core::n128;
use jmzk_core::name::Name128;
use jmzk_core::payloads::{decode_exact, AddMeta};
use jmzk_core::types::PublicKey;
use jmzk_tokendb::{ActionOp, TokenType};

use crate::context::ApplyContext;

fn check_meta_key_reserved(key: Name128) -> Result<(), ChainError> {
    if key.is_reserved() {
        return Err(ChainError::MetaKey);
    }
    Ok(())
}

fn check_duplicate(metas: &[Meta], key: Name128) -> Result<(), ChainError> {
    if metas.iter().any(|m| m.key == key) {
        return Err(ChainError::MetaKey);
    }
    Ok(())
}

fn permission_involves(
    ctx: &ApplyContext,
    permission: &PermissionDef,
    creator: &AuthorizerRef,
) -> Result<bool, ChainError> {
    for aw in &permission.authorizers {
        match (&aw.ref_, creator) {
            (AuthorizerRef::Account(a), AuthorizerRef::Account(c)) if a == c => return Ok(true),
            (AuthorizerRef::Group(name), AuthorizerRef::Account(c)) => {
                let group = ctx.cache().read_token_required::<Group, _>(
                    TokenType::Group,
                    None,
                    *name,
                    || ChainError::UnknownGroup(name.to_string()),
                )?;
                if group.root.involves_key(c) {
                    return Ok(true);
                }
            }
            (AuthorizerRef::Group(name), AuthorizerRef::Group(c)) if name == c => return Ok(true),
            _ => {}
        }
    }
    Ok(false)
}

fn owner_involves(token: &TokenDef, key: &PublicKey) -> bool {
    token
        .owner
        .iter()
        .any(|addr| addr.public_key() == Some(key))
}

/// Domain meta keys recognized despite the reserved-prefix rule; all of
/// them are booleans.
fn domain_reserved_key_ok(key: Name128, value: &str) -> Result<bool, ChainError> {
    if key == n128!(".disable-destroy") || key == n128!(".disable-set-transfer") {
        if value == "true" || value == "false" {
            return Ok(true);
        }
        return Err(ChainError::MetaValue);
    }
    Ok(false)
}

pub fn apply_addmeta(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let amact: AddMeta = decode_exact(&ctx.act.data)?;
    let meta = Meta { key: amact.key, value: amact.value.clone(), creator: amact.creator.clone() };

    if ctx.act.domain == n128!(".group") {
        check_meta_key_reserved(amact.key)?;

        let mut group = (*ctx.cache().read_token_required::<Group, _>(
            TokenType::Group,
            None,
            ctx.act.key,
            || ChainError::UnknownGroup(ctx.act.key.to_string()),
        )?)
        .clone();

        check_duplicate(&group.metas, amact.key)?;
        match &amact.creator {
            AuthorizerRef::Group(g) => {
                if *g != group.name {
                    return Err(ChainError::MetaInvolve);
                }
            }
            AuthorizerRef::Account(pk) => {
                // Only the group manager, its key, may annotate the group.
                if group.key.public_key() != Some(pk) {
                    return Err(ChainError::MetaInvolve);
                }
            }
            AuthorizerRef::Owner => return Err(ChainError::MetaInvolve),
        }

        group.metas.push(meta);
        return ctx.cache().put_token(TokenType::Group, ActionOp::Update, None, ctx.act.key, group);
    }

    if ctx.act.domain == n128!(".fungible") {
        check_meta_key_reserved(amact.key)?;

        let sym_id: u32 = ctx
            .act
            .key
            .as_str()
            .parse()
            .map_err(|_| ChainError::UnknownFungible(0))?;
        let mut fungible = (*ctx.cache().read_token_required::<FungibleDef, _>(
            TokenType::Fungible,
            None,
            Name128::from_number(sym_id as u128),
            || ChainError::UnknownFungible(sym_id),
        )?)
        .clone();

        check_duplicate(&fungible.metas, amact.key)?;
        let involved = match &amact.creator {
            AuthorizerRef::Account(pk) => {
                fungible.creator == *pk
                    || permission_involves(ctx, &fungible.manage, &amact.creator)?
            }
            _ => permission_involves(ctx, &fungible.manage, &amact.creator)?,
        };
        if !involved {
            return Err(ChainError::MetaInvolve);
        }

        fungible.metas.push(meta);
        return ctx.cache().put_token(
            TokenType::Fungible,
            ActionOp::Update,
            None,
            Name128::from_number(sym_id as u128),
            fungible,
        );
    }

    if ctx.act.key == n128!(".meta") {
        // Domain meta: the action key is the sentinel, the payload key
        // names the domain.
        let domain_name = ctx.act.domain;
        if amact.key.is_reserved() && !domain_reserved_key_ok(amact.key, &amact.value)? {
            return Err(ChainError::MetaKey);
        }

        let mut domain = (*ctx.cache().read_token_required::<DomainDef, _>(
            TokenType::Domain,
            None,
            domain_name,
            || ChainError::UnknownDomain(domain_name.to_string()),
        )?)
        .clone();

        check_duplicate(&domain.metas, amact.key)?;
        if !permission_involves(ctx, &domain.manage, &amact.creator)? {
            return Err(ChainError::MetaInvolve);
        }

        domain.metas.push(meta);
        return ctx.cache().put_token(TokenType::Domain, ActionOp::Update, None, domain_name, domain);
    }

    // Token meta.
    check_meta_key_reserved(amact.key)?;

    let mut token = (*ctx.cache().read_token_required::<TokenDef, _>(
        TokenType::Token,
        Some(ctx.act.domain),
        ctx.act.key,
        || ChainError::UnknownToken(ctx.act.domain.to_string(), ctx.act.key.to_string()),
    )?)
    .clone();

    if token.is_destroyed() {
        return Err(ChainError::TokenDestroyed);
    }
    if token.is_locked() {
        return Err(ChainError::TokenLocked);
    }
    check_duplicate(&token.metas, amact.key)?;

    let domain = ctx.cache().read_token_required::<DomainDef, _>(
        TokenType::Domain,
        None,
        ctx.act.domain,
        || ChainError::UnknownDomain(ctx.act.domain.to_string()),
    )?;

    let involved = match &amact.creator {
        AuthorizerRef::Account(pk) => {
            owner_involves(&token, pk)
                || permission_involves(ctx, &domain.issue, &amact.creator)?
                || permission_involves(ctx, &domain.transfer, &amact.creator)?
        }
        _ => {
            permission_involves(ctx, &domain.issue, &amact.creator)?
                || permission_involves(ctx, &domain.transfer, &amact.creator)?
        }
    };
    if !involved {
        return Err(ChainError::MetaInvolve);
    }

    token.metas.push(meta);
    ctx.cache().put_token(TokenType::Token, ActionOp::Update, Some(ctx.act.domain), ctx.act.key, token)
}
