use std::collections::BTreeSet;

use jmzk_core::address::Address;
use jmzk_core::authority::{AuthorizerRef, Group, GroupNode, PermissionDef};
use jmzk_core::entities::{DomainDef, FungibleDef, ScriptDef, SuspendDef, TokenDef, ValidatorDef};
use jmzk_core::error::ChainError;
use jmzk_core::n;
use jmzk_core::name::Name128;
use jmzk_core::payloads::{self, decode_exact};
use jmzk_core::transaction::Action;
use jmzk_core::types::PublicKey;
use jmzk_tokendb::TokenType;

use crate::context::ChainServices;

/// Recursive satisfaction check over permissions, groups and keys. The
/// checker also records the minimal signing-key set that participated,
/// which `get_required_keys` reports back to wallets.
pub struct AuthorityChecker<'a> {
    services: &'a ChainServices,
    keys: &'a BTreeSet<PublicKey>,
    max_depth: u16,
    used_keys: BTreeSet<PublicKey>,
}

impl<'a> AuthorityChecker<'a> {
    pub fn new(services: &'a ChainServices, keys: &'a BTreeSet<PublicKey>, max_depth: u16) -> Self {
        Self { services, keys, max_depth, used_keys: BTreeSet::new() }
    }

    pub fn used_keys(self) -> BTreeSet<PublicKey> {
        self.used_keys
    }

    fn err(&self, act: &Action) -> ChainError {
        ChainError::UnsatisfiedAuthorization {
            domain: act.domain.to_string(),
            key: act.key.to_string(),
            name: act.name.to_string(),
        }
    }

    fn has_key(&mut self, key: &PublicKey) -> bool {
        if self.keys.contains(key) {
            self.used_keys.insert(*key);
            true
        } else {
            false
        }
    }

    /// All listed owner addresses that are public keys must have signed;
    /// generated owners cannot sign at all.
    fn owners_signed(&mut self, owners: &[Address]) -> bool {
        if owners.is_empty() {
            return false;
        }
        owners.iter().all(|addr| match addr {
            Address::PublicKey(pk) => self.has_key(&pk.clone()),
            _ => false,
        })
    }

    fn group_node_weight(&mut self, group: &Group, node: &GroupNode, depth: u16) -> Result<u32, ChainError> {
        if depth > self.max_depth {
            return Err(ChainError::AuthorityDepth);
        }
        match node {
            GroupNode::Leaf { key, weight } => {
                let key = *key;
                Ok(if self.has_key(&key) { *weight } else { 0 })
            }
            GroupNode::Branch { threshold, weight, nodes } => {
                let mut sum: u64 = 0;
                for child in nodes {
                    sum += self.group_node_weight(group, child, depth + 1)? as u64;
                    if sum >= *threshold as u64 {
                        return Ok(*weight);
                    }
                }
                Ok(0)
            }
        }
    }

    fn group_satisfied(&mut self, name: Name128, depth: u16) -> Result<bool, ChainError> {
        let group: std::sync::Arc<Group> = self.services.cache.read_token_required(
            TokenType::Group,
            None,
            name,
            || ChainError::UnknownGroup(name.to_string()),
        )?;
        match &group.root {
            GroupNode::Leaf { key, .. } => {
                let key = *key;
                Ok(self.has_key(&key))
            }
            GroupNode::Branch { threshold, nodes, .. } => {
                let mut sum: u64 = 0;
                for child in nodes {
                    sum += self.group_node_weight(&group, child, depth + 1)? as u64;
                    if sum >= *threshold as u64 {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Weighted satisfaction of one permission. `owners` resolves the
    /// owner sentinel where a caller admits one.
    fn permission_satisfied(
        &mut self,
        permission: &PermissionDef,
        owners: Option<&[Address]>,
    ) -> Result<bool, ChainError> {
        if permission.threshold == 0 {
            // Frozen permission: nothing satisfies it.
            return Ok(false);
        }
        let mut total: u64 = 0;
        for aw in &permission.authorizers {
            let hit = match &aw.ref_ {
                AuthorizerRef::Account(pk) => {
                    let pk = *pk;
                    self.has_key(&pk)
                }
                AuthorizerRef::Owner => match owners {
                    Some(owners) => self.owners_signed(owners),
                    None => false,
                },
                AuthorizerRef::Group(name) => self.group_satisfied(*name, 0)?,
            };
            if hit {
                total += aw.weight as u64;
                if total >= permission.threshold as u64 {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn domain(&self, name: Name128) -> Result<std::sync::Arc<DomainDef>, ChainError> {
        self.services.cache.read_token_required(TokenType::Domain, None, name, || {
            ChainError::UnknownDomain(name.to_string())
        })
    }

    fn fungible_by_key(&self, key: Name128) -> Result<std::sync::Arc<FungibleDef>, ChainError> {
        let sym_id: u32 = key
            .as_str()
            .parse()
            .map_err(|_| ChainError::UnknownFungible(0))?;
        self.services.cache.read_token_required(
            TokenType::Fungible,
            None,
            Name128::from_number(sym_id as u128),
            || ChainError::UnknownFungible(sym_id),
        )
    }

    /// Check one action against the signing keys.
    pub fn satisfied(
        &mut self,
        act: &Action,
        schedule: &jmzk_core::block::ProducerSchedule,
    ) -> Result<(), ChainError> {
        let name = act.name;
        let ok = if name == n!("newdomain") {
            let p: payloads::NewDomain = decode_exact(&act.data)?;
            self.has_key(&p.creator)
        } else if name == n!("updatedomain") {
            let domain = self.domain(act.domain)?;
            self.permission_satisfied(&domain.manage, None)?
        } else if name == n!("issuetoken") {
            let domain = self.domain(act.domain)?;
            self.permission_satisfied(&domain.issue, None)?
        } else if name == n!("transfer") || name == n!("destroytoken") {
            let domain = self.domain(act.domain)?;
            let token: std::sync::Arc<TokenDef> = self.services.cache.read_token_required(
                TokenType::Token,
                Some(act.domain),
                act.key,
                || ChainError::UnknownToken(act.domain.to_string(), act.key.to_string()),
            )?;
            self.permission_satisfied(&domain.transfer, Some(&token.owner))?
        } else if name == n!("newgroup") {
            let p: payloads::NewGroup = decode_exact(&act.data)?;
            match p.group.key {
                Address::PublicKey(pk) => self.has_key(&pk),
                _ => false,
            }
        } else if name == n!("updategroup") {
            let group: std::sync::Arc<Group> = self.services.cache.read_token_required(
                TokenType::Group,
                None,
                act.key,
                || ChainError::UnknownGroup(act.key.to_string()),
            )?;
            match group.key {
                Address::PublicKey(pk) => self.has_key(&pk),
                _ => false,
            }
        } else if name == n!("addmeta") {
            let p: payloads::AddMeta = decode_exact(&act.data)?;
            match &p.creator {
                AuthorizerRef::Account(pk) => {
                    let pk = *pk;
                    self.has_key(&pk)
                }
                AuthorizerRef::Group(g) => self.group_satisfied(*g, 0)?,
                AuthorizerRef::Owner => false,
            }
        } else if name == n!("newfungible") {
            let creator = match self.services.exec.current_version(name)? {
                1 => decode_exact::<payloads::NewFungibleV1>(&act.data)?.creator,
                _ => decode_exact::<payloads::NewFungible>(&act.data)?.creator,
            };
            self.has_key(&creator)
        } else if name == n!("updfungible") || name == n!("setpsvbonus") || name == n!("distpsvbonus")
        {
            let fungible = self.fungible_by_key(act.key)?;
            self.permission_satisfied(&fungible.manage, None)?
        } else if name == n!("issuefungible") {
            let fungible = self.fungible_by_key(act.key)?;
            self.permission_satisfied(&fungible.issue, None)?
        } else if name == n!("transferft") {
            let p: payloads::TransferFt = decode_exact(&act.data)?;
            let fungible = self.fungible_by_key(act.key)?;
            self.permission_satisfied(&fungible.transfer, Some(&[p.from]))?
        } else if name == n!("recycleft") {
            let p: payloads::RecycleFt = decode_exact(&act.data)?;
            let fungible = self.fungible_by_key(act.key)?;
            self.permission_satisfied(&fungible.transfer, Some(&[p.address]))?
        } else if name == n!("destroyft") {
            let p: payloads::DestroyFt = decode_exact(&act.data)?;
            let fungible = self.fungible_by_key(act.key)?;
            self.permission_satisfied(&fungible.transfer, Some(&[p.address]))?
        } else if name == n!("evt2pevt") {
            let p: payloads::Evt2Pevt = decode_exact(&act.data)?;
            let fungible = self.fungible_by_key(act.key)?;
            self.permission_satisfied(&fungible.transfer, Some(&[p.from]))?
        } else if name == n!("newsuspend") {
            let p: payloads::NewSuspend = decode_exact(&act.data)?;
            self.has_key(&p.proposer)
        } else if name == n!("aprvsuspend") {
            // Approval signatures are validated against the embedded
            // transaction inside the handler.
            true
        } else if name == n!("cancelsuspend") {
            let suspend: std::sync::Arc<SuspendDef> = self.services.cache.read_token_required(
                TokenType::Suspend,
                None,
                act.key,
                || ChainError::UnknownSuspend(act.key.to_string()),
            )?;
            let proposer = suspend.proposer;
            self.has_key(&proposer)
        } else if name == n!("execsuspend") {
            let p: payloads::ExecSuspend = decode_exact(&act.data)?;
            self.has_key(&p.executor)
        } else if name == n!("everipass") || name == n!("everipay") {
            // The link carries its own signatures; they are the authority.
            true
        } else if name == n!("prodvote") {
            let p: payloads::ProdVote = decode_exact(&act.data)?;
            match schedule.producer_key(p.producer) {
                Some(pk) => {
                    let pk = *pk;
                    self.has_key(&pk)
                }
                None => return Err(ChainError::ProdvoteProducer(p.producer.to_string())),
            }
        } else if name == n!("updsched")
            || name == n!("newstakepool")
            || name == n!("updstakepool")
            || name == n!("blackaddr")
        {
            let total = schedule.producers.len() as u64;
            let mut signed = 0u64;
            for p in &schedule.producers {
                let pk = p.block_signing_key;
                if self.has_key(&pk) {
                    signed += 1;
                }
            }
            signed * 3 > total * 2
        } else if name == n!("newlock") {
            let p: payloads::NewLock = decode_exact(&act.data)?;
            self.has_key(&p.proposer)
        } else if name == n!("aprvlock") {
            let p: payloads::AprvLock = decode_exact(&act.data)?;
            self.has_key(&p.approver)
        } else if name == n!("tryunlock") {
            let p: payloads::TryUnlock = decode_exact(&act.data)?;
            self.has_key(&p.executor)
        } else if name == n!("newvalidator") {
            let p: payloads::NewValidator = decode_exact(&act.data)?;
            self.has_key(&p.creator)
        } else if name == n!("staketkns") {
            let p: payloads::StakeTkns = decode_exact(&act.data)?;
            self.has_key(&p.staker)
        } else if name == n!("unstaketkns") {
            let p: payloads::UnstakeTkns = decode_exact(&act.data)?;
            self.has_key(&p.staker)
        } else if name == n!("toactivetkns") {
            let p: payloads::ToActiveTkns = decode_exact(&act.data)?;
            self.has_key(&p.staker)
        } else if name == n!("valiwithdraw") {
            let validator: std::sync::Arc<ValidatorDef> = self.services.cache.read_token_required(
                TokenType::Validator,
                None,
                act.key,
                || ChainError::UnknownValidator(act.key.to_string()),
            )?;
            let withdraw = validator.withdraw.clone();
            self.permission_satisfied(&withdraw, None)?
        } else if name == n!("recvstkbonus") {
            let validator: std::sync::Arc<ValidatorDef> = self.services.cache.read_token_required(
                TokenType::Validator,
                None,
                act.key,
                || ChainError::UnknownValidator(act.key.to_string()),
            )?;
            let signer = validator.signer;
            self.has_key(&signer)
        } else if name == n!("newscript") {
            let p: payloads::NewScript = decode_exact(&act.data)?;
            self.has_key(&p.creator)
        } else if name == n!("updscript") {
            let script: std::sync::Arc<ScriptDef> = self.services.cache.read_token_required(
                TokenType::Script,
                None,
                act.key,
                || ChainError::UnknownScript(act.key.to_string()),
            )?;
            let creator = script.creator;
            self.has_key(&creator)
        } else if name == n!("paycharge") {
            // Implicit-only; never satisfiable as user input.
            false
        } else {
            return Err(ChainError::UnknownAction(name.to_string()));
        };

        if ok {
            Ok(())
        } else {
            Err(self.err(act))
        }
    }
}

/// Required-keys resolution for suspend approval and wallet RPCs: which of
/// `candidate_keys` actually participate in satisfying the transaction.
pub fn get_required_keys(
    services: &ChainServices,
    candidate_keys: &BTreeSet<PublicKey>,
    actions: &[Action],
    schedule: &jmzk_core::block::ProducerSchedule,
    max_depth: u16,
) -> Result<BTreeSet<PublicKey>, ChainError> {
    let mut checker = AuthorityChecker::new(services, candidate_keys, max_depth);
    for act in actions {
        checker.satisfied(act, schedule)?;
    }
    Ok(checker.used_keys())
}
