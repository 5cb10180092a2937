use jmzk_core::address::Address;
use jmzk_core::authority::Group;
use jmzk_core::entities::{meta_value, DomainDef, TokenDef};
use jmzk_core::error::ChainError;
use jmzk_core::n128;
use jmzk_core::payloads::{
    decode_exact, DestroyToken, IssueToken, NewDomain, NewGroup, TransferToken, UpdateDomain,
    UpdateGroup,
};
use jmzk_tokendb::{ActionOp, TokenType};

use crate::context::ApplyContext;
use crate::handlers::check_permission;

pub fn apply_newdomain(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewDomain = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(act.name, n128!(".create"))?;
    ctx.check_name_reserved(act.name)?;

    if ctx.cache().exists_token(TokenType::Domain, None, act.name)? {
        return Err(ChainError::DomainDuplicate(act.name.to_string()));
    }

    check_permission(ctx, &act.issue, "issue", false, false)?;
    check_permission(ctx, &act.transfer, "transfer", true, true)?;
    // Manage threshold 0 freezes the domain's permissions forever.
    check_permission(ctx, &act.manage, "manage", false, true)?;

    let domain = DomainDef {
        name: act.name,
        creator: act.creator,
        // NOTICE: pending_block_time would be correct here, but the head
        // block time is what the chain has always written.
        create_time: ctx.env.head_block_time,
        issue: act.issue,
        transfer: act.transfer,
        manage: act.manage,
        metas: vec![],
    };
    ctx.cache().put_token(TokenType::Domain, ActionOp::Add, None, domain.name, domain)
}

pub fn apply_updatedomain(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UpdateDomain = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(act.name, n128!(".update"))?;

    let mut domain = (*ctx.cache().read_token_required::<DomainDef, _>(
        TokenType::Domain,
        None,
        act.name,
        || ChainError::UnknownDomain(act.name.to_string()),
    )?)
    .clone();

    if let Some(issue) = act.issue {
        check_permission(ctx, &issue, "issue", false, false)?;
        domain.issue = issue;
    }
    if let Some(transfer) = act.transfer {
        if meta_value(&domain.metas, n128!(".disable-set-transfer")) == Some("true") {
            return Err(ChainError::PermissionType(
                "transfer permission updates are disabled for this domain".into(),
            ));
        }
        check_permission(ctx, &transfer, "transfer", true, true)?;
        domain.transfer = transfer;
    }
    if let Some(manage) = act.manage {
        check_permission(ctx, &manage, "manage", false, true)?;
        domain.manage = manage;
    }

    ctx.cache().put_token(TokenType::Domain, ActionOp::Update, None, act.name, domain)
}

pub fn apply_issuetoken(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: IssueToken = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(act.domain, n128!(".issue"))?;

    if act.owner.is_empty() {
        return Err(ChainError::TokenOwner);
    }
    for owner in &act.owner {
        ctx.check_address_reserved(owner)?;
    }
    if !ctx.cache().exists_token(TokenType::Domain, None, act.domain)? {
        return Err(ChainError::UnknownDomain(act.domain.to_string()));
    }

    let mut values = Vec::with_capacity(act.names.len());
    for name in &act.names {
        ctx.check_name_reserved(*name)?;
        if ctx.cache().exists_token(TokenType::Token, Some(act.domain), *name)? {
            return Err(ChainError::TokenDuplicate(act.domain.to_string(), name.to_string()));
        }
        let token =
            TokenDef { domain: act.domain, name: *name, owner: act.owner.clone(), metas: vec![] };
        values.push(bincode::serialize(&token)?);
    }

    ctx.cache()
        .db()
        .put_tokens(TokenType::Token, ActionOp::Add, Some(act.domain), &act.names, &values)
}

pub fn apply_transfer(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: TransferToken = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(act.domain, act.name)?;

    if act.to.is_empty() {
        return Err(ChainError::TokenOwner);
    }
    for addr in &act.to {
        ctx.check_address_reserved(addr)?;
    }

    let mut token = (*ctx.cache().read_token_required::<TokenDef, _>(
        TokenType::Token,
        Some(act.domain),
        act.name,
        || ChainError::UnknownToken(act.domain.to_string(), act.name.to_string()),
    )?)
    .clone();

    if token.is_destroyed() {
        return Err(ChainError::TokenDestroyed);
    }
    if token.is_locked() {
        return Err(ChainError::TokenLocked);
    }

    token.owner = act.to;
    ctx.cache().put_token(TokenType::Token, ActionOp::Update, Some(act.domain), act.name, token)
}

pub fn apply_destroytoken(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: DestroyToken = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(act.domain, act.name)?;

    let domain = ctx.cache().read_token_required::<DomainDef, _>(
        TokenType::Domain,
        None,
        act.domain,
        || ChainError::UnknownDomain(act.domain.to_string()),
    )?;
    if meta_value(&domain.metas, n128!(".disable-destroy")) == Some("true") {
        return Err(ChainError::TokenCannotDestroy(act.domain.to_string()));
    }

    let mut token = (*ctx.cache().read_token_required::<TokenDef, _>(
        TokenType::Token,
        Some(act.domain),
        act.name,
        || ChainError::UnknownToken(act.domain.to_string(), act.name.to_string()),
    )?)
    .clone();

    if token.is_destroyed() {
        return Err(ChainError::TokenDestroyed);
    }
    if token.is_locked() {
        return Err(ChainError::TokenLocked);
    }

    token.owner = vec![Address::Reserved];
    ctx.cache().put_token(TokenType::Token, ActionOp::Update, Some(act.domain), act.name, token)
}

pub fn apply_newgroup(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: NewGroup = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".group"), act.name)?;

    if act.group.key.is_generated() || act.group.key.is_reserved() {
        return Err(ChainError::GroupKey);
    }
    if act.name != act.group.name {
        return Err(ChainError::GroupName {
            act: act.name.to_string(),
            group: act.group.name.to_string(),
        });
    }
    ctx.check_name_reserved(act.name)?;

    if ctx.cache().exists_token(TokenType::Group, None, act.name)? {
        return Err(ChainError::GroupDuplicate(act.name.to_string()));
    }
    act.group.validate()?;

    ctx.cache().put_token(TokenType::Group, ActionOp::Add, None, act.name, act.group)
}

pub fn apply_updategroup(ctx: &mut ApplyContext) -> Result<(), ChainError> {
    let act: UpdateGroup = decode_exact(&ctx.act.data)?;
    ctx.has_authorized(n128!(".group"), act.name)?;

    if act.name != act.group.name {
        return Err(ChainError::GroupName {
            act: act.name.to_string(),
            group: act.group.name.to_string(),
        });
    }

    let existing = ctx.cache().read_token_required::<Group, _>(
        TokenType::Group,
        None,
        act.name,
        || ChainError::UnknownGroup(act.name.to_string()),
    )?;
    if existing.key.is_reserved() {
        return Err(ChainError::GroupKey);
    }
    act.group.validate()?;

    ctx.cache().put_token(TokenType::Group, ActionOp::Update, None, act.name, act.group)
}
