use std::collections::HashMap;

use jmzk_core::error::ChainError;
use jmzk_core::name::Name;
use jmzk_core::n;

use crate::context::ApplyContext;
use crate::handlers;

pub type ApplyFn = fn(&mut ApplyContext) -> Result<(), ChainError>;

/// One registered action: its wire type name, the version its binary form
/// is currently interpreted as, the highest version this build understands,
/// and the handler.
pub struct ActionEntry {
    pub type_name: &'static str,
    pub current_version: u32,
    pub max_version: u32,
    pub handler: ApplyFn,
}

/// The closed, versioned action registry. Dispatch is a flat name lookup;
/// versions move only through in-protocol upgrades.
pub struct ExecutionContext {
    entries: HashMap<Name, ActionEntry>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! register {
    ($map:expr, $name:literal, $type_name:literal, $cur:literal, $max:literal, $handler:path) => {
        $map.insert(
            n!($name),
            ActionEntry {
                type_name: $type_name,
                current_version: $cur,
                max_version: $max,
                handler: $handler,
            },
        );
    };
}

impl ExecutionContext {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        register!(map, "newdomain", "newdomain", 1, 1, handlers::token::apply_newdomain);
        register!(map, "updatedomain", "updatedomain", 1, 1, handlers::token::apply_updatedomain);
        register!(map, "issuetoken", "issuetoken", 1, 1, handlers::token::apply_issuetoken);
        register!(map, "transfer", "transfer", 1, 1, handlers::token::apply_transfer);
        register!(map, "destroytoken", "destroytoken", 1, 1, handlers::token::apply_destroytoken);
        register!(map, "newgroup", "newgroup", 1, 1, handlers::token::apply_newgroup);
        register!(map, "updategroup", "updategroup", 1, 1, handlers::token::apply_updategroup);
        register!(map, "addmeta", "addmeta", 1, 1, handlers::meta::apply_addmeta);
        register!(map, "newfungible", "newfungible", 2, 2, handlers::fungible::apply_newfungible);
        register!(map, "updfungible", "updfungible", 2, 2, handlers::fungible::apply_updfungible);
        register!(map, "issuefungible", "issuefungible", 1, 1, handlers::fungible::apply_issuefungible);
        register!(map, "transferft", "transferft", 1, 1, handlers::fungible::apply_transferft);
        register!(map, "recycleft", "recycleft", 1, 1, handlers::fungible::apply_recycleft);
        register!(map, "destroyft", "destroyft", 1, 1, handlers::fungible::apply_destroyft);
        register!(map, "evt2pevt", "evt2pevt", 1, 1, handlers::fungible::apply_evt2pevt);
        register!(map, "newsuspend", "newsuspend", 1, 1, handlers::suspend::apply_newsuspend);
        register!(map, "aprvsuspend", "aprvsuspend", 1, 1, handlers::suspend::apply_aprvsuspend);
        register!(map, "cancelsuspend", "cancelsuspend", 1, 1, handlers::suspend::apply_cancelsuspend);
        register!(map, "execsuspend", "execsuspend", 1, 1, handlers::suspend::apply_execsuspend);
        register!(map, "paycharge", "paycharge", 1, 1, handlers::misc::apply_paycharge);
        register!(map, "everipass", "everipass", 2, 2, handlers::link::apply_everipass);
        register!(map, "everipay", "everipay", 2, 2, handlers::link::apply_everipay);
        register!(map, "prodvote", "prodvote", 1, 1, handlers::misc::apply_prodvote);
        register!(map, "updsched", "updsched", 1, 1, handlers::misc::apply_updsched);
        register!(map, "newlock", "newlock", 1, 1, handlers::lock::apply_newlock);
        register!(map, "aprvlock", "aprvlock", 1, 1, handlers::lock::apply_aprvlock);
        register!(map, "tryunlock", "tryunlock", 1, 1, handlers::lock::apply_tryunlock);
        register!(map, "setpsvbonus", "setpsvbonus", 1, 2, handlers::bonus::apply_setpsvbonus);
        register!(map, "distpsvbonus", "distpsvbonus", 1, 1, handlers::bonus::apply_distpsvbonus);
        register!(map, "newstakepool", "newstakepool", 1, 1, handlers::staking::apply_newstakepool);
        register!(map, "updstakepool", "updstakepool", 1, 1, handlers::staking::apply_updstakepool);
        register!(map, "newvalidator", "newvalidator", 1, 1, handlers::staking::apply_newvalidator);
        register!(map, "staketkns", "staketkns", 1, 1, handlers::staking::apply_staketkns);
        register!(map, "unstaketkns", "unstaketkns", 1, 1, handlers::staking::apply_unstaketkns);
        register!(map, "toactivetkns", "toactivetkns", 1, 1, handlers::staking::apply_toactivetkns);
        register!(map, "valiwithdraw", "valiwithdraw", 1, 1, handlers::staking::apply_valiwithdraw);
        register!(map, "recvstkbonus", "recvstkbonus", 1, 1, handlers::staking::apply_recvstkbonus);
        register!(map, "newscript", "newscript", 1, 1, handlers::misc::apply_newscript);
        register!(map, "updscript", "updscript", 1, 1, handlers::misc::apply_updscript);
        register!(map, "blackaddr", "blackaddr", 1, 1, handlers::misc::apply_blackaddr);
        Self { entries: map }
    }

    pub fn entry(&self, name: Name) -> Result<&ActionEntry, ChainError> {
        self.entries
            .get(&name)
            .ok_or_else(|| ChainError::UnknownAction(name.to_string()))
    }

    pub fn current_version(&self, name: Name) -> Result<u32, ChainError> {
        Ok(self.entry(name)?.current_version)
    }

    /// In-protocol version bump (producer vote or hard-fork point).
    pub fn set_version(&mut self, name: Name, version: u32) -> Result<(), ChainError> {
        let entry = self
            .entries
            .get_mut(&name)
            .ok_or_else(|| ChainError::UnknownAction(name.to_string()))?;
        if version == 0 || version > entry.max_version {
            return Err(ChainError::ActionVersion { got: version, current: entry.current_version });
        }
        entry.current_version = version;
        Ok(())
    }

    pub fn apply(&self, ctx: &mut ApplyContext) -> Result<(), ChainError> {
        let entry = self.entry(ctx.act.name)?;
        (entry.handler)(ctx)
    }

    /// Schema published to clients: (action, type, current version).
    pub fn actions(&self) -> Vec<(Name, &'static str, u32)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(n, e)| (*n, e.type_name, e.current_version))
            .collect();
        out.sort_by_key(|(n, _, _)| *n);
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_closed_set() {
        let exec = ExecutionContext::new();
        for name in ["newdomain", "transferft", "everipay", "execsuspend", "recvstkbonus"] {
            assert!(exec.entry(n!(name)).is_ok(), "{name} missing");
        }
        assert!(exec.entry(n!("nosuch")).is_err());
    }

    #[test]
    fn version_bounds_enforced() {
        let mut exec = ExecutionContext::new();
        assert_eq!(exec.current_version(n!("setpsvbonus")).unwrap(), 1);
        exec.set_version(n!("setpsvbonus"), 2).unwrap();
        assert_eq!(exec.current_version(n!("setpsvbonus")).unwrap(), 2);
        assert!(exec.set_version(n!("setpsvbonus"), 3).is_err());
        assert!(exec.set_version(n!("setpsvbonus"), 0).is_err());
    }
}
