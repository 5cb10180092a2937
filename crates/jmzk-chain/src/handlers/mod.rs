//! The closed set of state-mutating operations. Every handler runs inside
//! the current transaction's savepoint: it asserts the action's declared
//! `(domain, key)` scope, validates inputs against the token database, and
//! writes through the typed cache.

pub mod bonus;
pub mod fungible;
pub mod link;
pub mod lock;
pub mod meta;
pub mod misc;
pub mod staking;
pub mod suspend;
pub mod token;

use jmzk_core::authority::{AuthorizerRef, PermissionDef};
use jmzk_core::error::ChainError;
use jmzk_core::n;
use jmzk_tokendb::TokenType;

use crate::context::ApplyContext;

/// Shared permission validation: the permission's name must match its
/// slot, authorizers must be well-formed, referenced groups must exist,
/// and the owner sentinel may only appear where `allow_owner` says so.
pub(crate) fn check_permission(
    ctx: &ApplyContext,
    permission: &PermissionDef,
    slot: &str,
    allow_owner: bool,
    threshold_may_be_zero: bool,
) -> Result<(), ChainError> {
    if permission.name != n!(slot) {
        return Err(ChainError::PermissionType(format!(
            "name {} does not match the {slot} permission",
            permission.name
        )));
    }
    if permission.threshold == 0 && !threshold_may_be_zero {
        return Err(ChainError::PermissionType(format!("{slot} threshold cannot be zero")));
    }
    if !permission.validate() {
        return Err(ChainError::PermissionType(format!(
            "{slot} permission has zero-weight, duplicated or unreachable authorizers"
        )));
    }
    for aw in &permission.authorizers {
        match &aw.ref_ {
            AuthorizerRef::Account(_) => {}
            AuthorizerRef::Owner => {
                if !allow_owner {
                    return Err(ChainError::PermissionType(format!(
                        "owner sentinel only appears in transfer, not {slot}"
                    )));
                }
            }
            AuthorizerRef::Group(name) => {
                if !ctx.cache().exists_token(TokenType::Group, None, *name)? {
                    return Err(ChainError::UnknownGroup(name.to_string()));
                }
            }
        }
    }
    Ok(())
}
