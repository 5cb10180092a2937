use std::collections::BTreeSet;
use std::sync::Arc;

use jmzk_core::address::Address;
use jmzk_core::asset::{Asset, Symbol, EVT_SYM_ID};
use jmzk_core::block::{ProducerSchedule, TransactionReceipt};
use jmzk_core::entities::{Property, PropertyStakes};
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::transaction::{Action, ActionReceipt, SignedTransaction};
use jmzk_core::types::{BlockNum, Digest, PublicKey, Timestamp};
use jmzk_tokendb::TokenDatabaseCache;

use crate::execution::ExecutionContext;
use crate::state_db::StateDb;

/// Long-lived services shared by every transaction: the typed token store,
/// the chain state store, and the action registry.
pub struct ChainServices {
    pub cache: TokenDatabaseCache,
    pub state: StateDb,
    pub exec: ExecutionContext,
    pub chain_id: Digest,
}

/// Pending-block facts every handler may consult.
#[derive(Clone)]
pub struct BlockEnv {
    pub pending_block_time: Timestamp,
    /// Historical quirk: several create-times stamp the head block's time,
    /// not the pending one. Kept for bit-exact replay.
    pub head_block_time: Timestamp,
    pub pending_block_num: BlockNum,
    pub producer_signing_key: PublicKey,
    pub active_schedule: Arc<ProducerSchedule>,
    /// Replay path: signatures were checked when first applied.
    pub skip_auth_check: bool,
    pub charge_free_mode: bool,
    pub loadtest_mode: bool,
}

/// Receipts accumulated into the pending block.
#[derive(Default)]
pub struct PendingOut {
    pub actions: Vec<ActionReceipt>,
    pub receipts: Vec<TransactionReceipt>,
}

/// Per-action view handed to a handler. Mutations flow through the cache
/// into the token database under the transaction's savepoint.
pub struct ApplyContext<'a> {
    pub services: &'a ChainServices,
    pub env: &'a BlockEnv,
    pub out: &'a mut PendingOut,
    pub act: &'a Action,
    pub trx: &'a SignedTransaction,
    pub trx_keys: &'a BTreeSet<PublicKey>,
}

impl ApplyContext<'_> {
    /// Every handler first asserts the action's declared `(domain, key)`
    /// scope matches its payload.
    pub fn has_authorized(&self, domain: Name128, key: Name128) -> Result<(), ChainError> {
        if self.act.domain == domain && self.act.key == key {
            Ok(())
        } else {
            Err(ChainError::ActionAuthorize)
        }
    }

    pub fn cache(&self) -> &TokenDatabaseCache {
        &self.services.cache
    }

    // ── Balance rows ─────────────────────────────────────────────────────────
    //
    // EVT rows carry stake bookkeeping and serialize as `PropertyStakes`;
    // every other symbol stores the plain `Property` form.

    pub fn read_stakes(&self, addr: &Address) -> Result<PropertyStakes, ChainError> {
        let bytes = self
            .services
            .cache
            .db()
            .read_asset(addr, EVT_SYM_ID, true)?
            .ok_or(ChainError::Balance)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn read_stakes_or_new(&self, addr: &Address) -> Result<PropertyStakes, ChainError> {
        match self.services.cache.db().read_asset(addr, EVT_SYM_ID, true)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(PropertyStakes::from(Property::new(
                jmzk_core::asset::evt_sym(),
                self.env.pending_block_time,
                self.env.pending_block_num,
            ))),
        }
    }

    pub fn put_stakes(&self, addr: &Address, prop: &PropertyStakes) -> Result<(), ChainError> {
        self.services
            .cache
            .db()
            .put_asset(addr, EVT_SYM_ID, &bincode::serialize(prop)?)
    }

    pub fn read_property(&self, addr: &Address, sym: Symbol) -> Result<Property, ChainError> {
        debug_assert_ne!(sym.id(), EVT_SYM_ID);
        let bytes = self
            .services
            .cache
            .db()
            .read_asset(addr, sym.id(), true)?
            .ok_or(ChainError::Balance)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn read_property_or_new(&self, addr: &Address, sym: Symbol) -> Result<Property, ChainError> {
        match self.services.cache.db().read_asset(addr, sym.id(), true)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Property::new(sym, self.env.pending_block_time, self.env.pending_block_num)),
        }
    }

    pub fn put_property(&self, addr: &Address, prop: &Property) -> Result<(), ChainError> {
        debug_assert_ne!(prop.sym.id(), EVT_SYM_ID);
        self.services
            .cache
            .db()
            .put_asset(addr, prop.sym.id(), &bincode::serialize(prop)?)
    }

    pub fn balance(&self, addr: &Address, sym: Symbol) -> Result<i64, ChainError> {
        if sym.id() == EVT_SYM_ID {
            Ok(self.read_stakes_or_new(addr)?.amount)
        } else {
            Ok(self.read_property_or_new(addr, sym)?.amount)
        }
    }

    /// Move `number` between two addresses with checked arithmetic; the
    /// sender must exist and cover the amount. The symbol's precision must
    /// match the fungible row's.
    pub fn transfer_funds(
        &self,
        from: &Address,
        to: &Address,
        number: &Asset,
    ) -> Result<(), ChainError> {
        self.debit(from, number)?;
        self.credit(to, number)
    }

    pub fn debit(&self, addr: &Address, number: &Asset) -> Result<(), ChainError> {
        let sym = number.sym();
        if sym.id() == EVT_SYM_ID {
            let mut prop = self.read_stakes(addr).map_err(|_| ChainError::Balance)?;
            if prop.sym.precision() != sym.precision() {
                return Err(ChainError::AssetPrecision {
                    expected: prop.sym.precision(),
                    got: sym.precision(),
                });
            }
            if prop.amount < number.amount() {
                return Err(ChainError::Balance);
            }
            prop.amount = prop
                .amount
                .checked_sub(number.amount())
                .ok_or(ChainError::MathOverflow)?;
            self.put_stakes(addr, &prop)
        } else {
            let mut prop = self.read_property(addr, sym).map_err(|_| ChainError::Balance)?;
            if prop.sym.precision() != sym.precision() {
                return Err(ChainError::AssetPrecision {
                    expected: prop.sym.precision(),
                    got: sym.precision(),
                });
            }
            if prop.amount < number.amount() {
                return Err(ChainError::Balance);
            }
            prop.amount = prop
                .amount
                .checked_sub(number.amount())
                .ok_or(ChainError::MathOverflow)?;
            self.put_property(addr, &prop)
        }
    }

    pub fn credit(&self, addr: &Address, number: &Asset) -> Result<(), ChainError> {
        let sym = number.sym();
        if sym.id() == EVT_SYM_ID {
            let mut prop = self.read_stakes_or_new(addr)?;
            prop.amount = prop
                .amount
                .checked_add(number.amount())
                .ok_or(ChainError::MathOverflow)?;
            self.put_stakes(addr, &prop)
        } else {
            let mut prop = self.read_property_or_new(addr, sym)?;
            prop.amount = prop
                .amount
                .checked_add(number.amount())
                .ok_or(ChainError::MathOverflow)?;
            self.put_property(addr, &prop)
        }
    }

    pub fn check_address_reserved(&self, addr: &Address) -> Result<(), ChainError> {
        match addr {
            Address::Reserved => Err(ChainError::AddressReserved),
            Address::PublicKey(_) => Ok(()),
            Address::Generated { prefix, .. } => {
                if prefix.is_reserved() {
                    Err(ChainError::AddressReserved)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn check_name_reserved(&self, name: Name128) -> Result<(), ChainError> {
        if name.is_empty() || name.is_reserved() {
            Err(ChainError::NameReserved)
        } else {
            Ok(())
        }
    }
}
