use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::name::{Name, Name128};
use crate::types::PublicKey;

// ── AuthorizerRef ────────────────────────────────────────────────────────────

/// Who a permission authorizer is: a concrete account key, the owner
/// sentinel (the token's current owners, legal only inside `transfer`
/// permissions), or a named group.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum AuthorizerRef {
    Account(PublicKey),
    Owner,
    Group(Name128),
}

impl AuthorizerRef {
    pub fn is_account(&self) -> bool {
        matches!(self, AuthorizerRef::Account(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, AuthorizerRef::Group(_))
    }

    pub fn account(&self) -> Option<&PublicKey> {
        match self {
            AuthorizerRef::Account(pk) => Some(pk),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<Name128> {
        match self {
            AuthorizerRef::Group(n) => Some(*n),
            _ => None,
        }
    }
}

// ── PermissionDef ────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AuthorizerWeight {
    pub ref_: AuthorizerRef,
    pub weight: u32,
}

/// `{name, threshold, authorizers}`. Satisfied when the weighted sum of
/// satisfied authorizers reaches the threshold.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PermissionDef {
    pub name: Name,
    pub threshold: u32,
    pub authorizers: Vec<AuthorizerWeight>,
}

impl PermissionDef {
    pub fn new(name: Name, threshold: u32) -> Self {
        Self { name, threshold, authorizers: Vec::new() }
    }

    pub fn with(mut self, ref_: AuthorizerRef, weight: u32) -> Self {
        self.authorizers.push(AuthorizerWeight { ref_, weight });
        self
    }

    /// A permission is well-formed when no authorizer has zero weight, no
    /// authorizer repeats, and the total weight can reach the threshold.
    /// A zero threshold is allowed only where the caller says so (`manage`
    /// means frozen).
    pub fn validate(&self) -> bool {
        let mut total: u64 = 0;
        for (i, aw) in self.authorizers.iter().enumerate() {
            if aw.weight == 0 {
                return false;
            }
            if self.authorizers[..i].iter().any(|o| o.ref_ == aw.ref_) {
                return false;
            }
            total += aw.weight as u64;
        }
        total >= self.threshold as u64
    }

    pub fn has_owner_ref(&self) -> bool {
        self.authorizers.iter().any(|aw| aw.ref_ == AuthorizerRef::Owner)
    }
}

// ── Group ────────────────────────────────────────────────────────────────────

/// One node of a group tree. A leaf carries a key; a branch carries a
/// threshold and children. Every non-root node also carries the weight it
/// contributes to its parent.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum GroupNode {
    Leaf { key: PublicKey, weight: u32 },
    Branch { threshold: u32, weight: u32, nodes: Vec<GroupNode> },
}

impl GroupNode {
    pub fn weight(&self) -> u32 {
        match self {
            GroupNode::Leaf { weight, .. } => *weight,
            GroupNode::Branch { weight, .. } => *weight,
        }
    }

    fn validate(&self, is_root: bool) -> bool {
        match self {
            GroupNode::Leaf { weight, .. } => is_root || *weight > 0,
            GroupNode::Branch { threshold, weight, nodes } => {
                if *threshold == 0 || nodes.is_empty() {
                    return false;
                }
                if !is_root && *weight == 0 {
                    return false;
                }
                let total: u64 = nodes.iter().map(|n| n.weight() as u64).sum();
                total >= *threshold as u64 && nodes.iter().all(|n| n.validate(false))
            }
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            GroupNode::Leaf { .. } => 1,
            GroupNode::Branch { nodes, .. } => {
                1 + nodes.iter().map(|n| n.depth()).max().unwrap_or(0)
            }
        }
    }

    /// Does `key` appear anywhere under this node?
    pub fn involves_key(&self, key: &PublicKey) -> bool {
        match self {
            GroupNode::Leaf { key: k, .. } => k == key,
            GroupNode::Branch { nodes, .. } => nodes.iter().any(|n| n.involves_key(key)),
        }
    }
}

/// Named recursive weighted tree. The group key authorizes updates of the
/// group itself.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Group {
    pub name: Name128,
    pub key: crate::address::Address,
    pub root: GroupNode,
    pub metas: Vec<crate::entities::Meta>,
}

impl Group {
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.name.is_empty() {
            return Err(ChainError::GroupType("group name cannot be empty".into()));
        }
        if !self.root.validate(true) {
            return Err(ChainError::GroupType("invalid node or threshold in group tree".into()));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::{n, n128};

    fn pk(tag: u8) -> PublicKey {
        let mut b = [2u8; 33];
        b[1] = tag;
        PublicKey(b)
    }

    #[test]
    fn permission_validate() {
        let p = PermissionDef::new(n!("issue"), 1).with(AuthorizerRef::Account(pk(1)), 1);
        assert!(p.validate());

        let zero_weight = PermissionDef::new(n!("issue"), 1).with(AuthorizerRef::Account(pk(1)), 0);
        assert!(!zero_weight.validate());

        let unreachable = PermissionDef::new(n!("issue"), 5).with(AuthorizerRef::Account(pk(1)), 1);
        assert!(!unreachable.validate());

        let dup = PermissionDef::new(n!("transfer"), 1)
            .with(AuthorizerRef::Account(pk(1)), 1)
            .with(AuthorizerRef::Account(pk(1)), 1);
        assert!(!dup.validate());
    }

    #[test]
    fn frozen_manage_is_well_formed() {
        let p = PermissionDef::new(n!("manage"), 0);
        assert!(p.validate());
    }

    #[test]
    fn group_tree_validate() {
        let g = Group {
            name: n128!("testgroup"),
            key: Address::PublicKey(pk(9)),
            metas: vec![],
            root: GroupNode::Branch {
                threshold: 2,
                weight: 0,
                nodes: vec![
                    GroupNode::Leaf { key: pk(1), weight: 1 },
                    GroupNode::Leaf { key: pk(2), weight: 1 },
                    GroupNode::Branch {
                        threshold: 1,
                        weight: 1,
                        nodes: vec![GroupNode::Leaf { key: pk(3), weight: 1 }],
                    },
                ],
            },
        };
        assert!(g.validate().is_ok());
        assert_eq!(g.root.depth(), 3);
        assert!(g.root.involves_key(&pk(3)));
        assert!(!g.root.involves_key(&pk(8)));
    }

    #[test]
    fn group_threshold_unreachable() {
        let g = Group {
            name: n128!("bad"),
            key: Address::PublicKey(pk(9)),
            metas: vec![],
            root: GroupNode::Branch {
                threshold: 5,
                weight: 0,
                nodes: vec![GroupNode::Leaf { key: pk(1), weight: 1 }],
            },
        };
        assert!(g.validate().is_err());
    }
}
