//! jmzk-genesis — the genesis state, chain-id derivation, and the
//! bootstrap that seeds the token database with the system entities every
//! chain starts from: the four reserved domains, the EVT and PEVT
//! fungibles, and their supply-holding addresses.

use serde::{Deserialize, Serialize};
use tracing::info;

use jmzk_core::address::fungible_address;
use jmzk_core::asset::{evt_sym, pevt_sym, Asset};
use jmzk_core::authority::{AuthorizerRef, PermissionDef};
use jmzk_core::block::{BlockHeader, BlockTimestamp, ProducerKey, ProducerSchedule};
use jmzk_core::config::ChainConfig;
use jmzk_core::entities::{DomainDef, FungibleDef, Property, PropertyStakes, StakepoolDef};
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::types::{Digest, PublicKey, Timestamp};
use jmzk_core::{n, n128};
use jmzk_tokendb::{ActionOp, TokenDatabase, TokenType};

/// Total EVT supply fixed at genesis: one billion, precision 5.
pub const EVT_TOTAL_SUPPLY: i64 = 1_000_000_000_00000;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GenesisState {
    pub initial_timestamp: Timestamp,
    pub initial_key: PublicKey,
    pub initial_configuration: ChainConfig,
}

impl Default for GenesisState {
    fn default() -> Self {
        Self {
            // 2018-06-01T00:00:00Z
            initial_timestamp: 1_527_811_200,
            initial_key: PublicKey([2u8; 33]),
            initial_configuration: ChainConfig::default(),
        }
    }
}

impl GenesisState {
    pub fn from_json(json: &str) -> Result<Self, ChainError> {
        serde_json::from_str(json).map_err(|e| ChainError::Serialization(e.to_string()))
    }

    /// Chain id: sha256 over the canonical serialization of the whole
    /// genesis state. Every signature domain-separates on it.
    pub fn compute_chain_id(&self) -> Digest {
        Digest::hash_of(self)
    }

    pub fn initial_schedule(&self) -> ProducerSchedule {
        ProducerSchedule {
            version: 0,
            producers: vec![ProducerKey {
                producer_name: n128!("evt"),
                block_signing_key: self.initial_key,
            }],
        }
    }

    /// Header of block 1. Its `action_mroot` carries the chain id so the
    /// genesis block commits to the full genesis state.
    pub fn genesis_header(&self) -> BlockHeader {
        BlockHeader {
            timestamp: BlockTimestamp::from_unix(self.initial_timestamp),
            producer: n128!("evt"),
            confirmed: 1,
            previous: Digest::default(),
            transaction_mroot: Digest::default(),
            action_mroot: self.compute_chain_id(),
            schedule_version: 0,
            new_producers: None,
        }
    }
}

fn system_domain(name: Name128, genesis: &GenesisState) -> DomainDef {
    DomainDef {
        name,
        creator: genesis.initial_key,
        create_time: genesis.initial_timestamp,
        issue: PermissionDef::new(n!("issue"), 1)
            .with(AuthorizerRef::Account(genesis.initial_key), 1),
        transfer: PermissionDef::new(n!("transfer"), 1)
            .with(AuthorizerRef::Account(genesis.initial_key), 1),
        manage: PermissionDef::new(n!("manage"), 1)
            .with(AuthorizerRef::Account(genesis.initial_key), 1),
        metas: vec![],
    }
}

fn put_domain(db: &TokenDatabase, domain: &DomainDef) -> Result<(), ChainError> {
    db.put_token(
        TokenType::Domain,
        ActionOp::Add,
        None,
        domain.name,
        &bincode::serialize(domain)?,
    )
}

fn put_fungible(db: &TokenDatabase, fungible: &FungibleDef) -> Result<(), ChainError> {
    db.put_token(
        TokenType::Fungible,
        ActionOp::Add,
        None,
        Name128::from_number(fungible.sym.id() as u128),
        &bincode::serialize(fungible)?,
    )
}

/// Seed the token database. Idempotent: re-running against an initialized
/// store is a no-op, so replay and restart share one code path.
pub fn initialize_token_db(db: &TokenDatabase, genesis: &GenesisState) -> Result<(), ChainError> {
    if db.exists_token(TokenType::Domain, None, n128!(".domain"))? {
        return Ok(());
    }
    info!("initializing token database from genesis state");

    for name in [n128!(".domain"), n128!(".group"), n128!(".suspend"), n128!(".fungible")] {
        put_domain(db, &system_domain(name, genesis))?;
    }

    // EVT: issued by the genesis key, transferable by its holders.
    let evt = FungibleDef {
        name: n128!("EVT"),
        sym_name: n128!("EVT"),
        sym: evt_sym(),
        creator: genesis.initial_key,
        create_time: genesis.initial_timestamp,
        issue: PermissionDef::new(n!("issue"), 1)
            .with(AuthorizerRef::Account(genesis.initial_key), 1),
        transfer: PermissionDef::new(n!("transfer"), 1).with(AuthorizerRef::Owner, 1),
        manage: PermissionDef::new(n!("manage"), 1)
            .with(AuthorizerRef::Account(genesis.initial_key), 1),
        total_supply: Asset::new(EVT_TOTAL_SUPPLY, evt_sym()),
        metas: vec![],
    };
    put_fungible(db, &evt)?;

    // PEVT mirrors the EVT supply; its own address holds everything not
    // yet minted through evt2pevt. Manage threshold 0: frozen forever.
    let pevt = FungibleDef {
        name: n128!("PEVT"),
        sym_name: n128!("PEVT"),
        sym: pevt_sym(),
        creator: genesis.initial_key,
        create_time: genesis.initial_timestamp,
        issue: PermissionDef::new(n!("issue"), 1)
            .with(AuthorizerRef::Account(genesis.initial_key), 1),
        transfer: PermissionDef::new(n!("transfer"), 1).with(AuthorizerRef::Owner, 1),
        manage: PermissionDef::new(n!("manage"), 0),
        total_supply: Asset::new(EVT_TOTAL_SUPPLY, pevt_sym()),
        metas: vec![],
    };
    put_fungible(db, &pevt)?;

    // Seed the un-issued supplies at the fungibles' own addresses. EVT
    // balance rows carry stake bookkeeping and use the wider form.
    let mut evt_prop =
        PropertyStakes::from(Property::new(evt_sym(), genesis.initial_timestamp, 0));
    evt_prop.amount = EVT_TOTAL_SUPPLY;
    db.put_asset(
        &fungible_address(evt_sym().id()),
        evt_sym().id(),
        &bincode::serialize(&evt_prop)?,
    )?;

    let mut pevt_prop = Property::new(pevt_sym(), genesis.initial_timestamp, 0);
    pevt_prop.amount = EVT_TOTAL_SUPPLY;
    db.put_asset(
        &fungible_address(pevt_sym().id()),
        pevt_sym().id(),
        &bincode::serialize(&pevt_prop)?,
    )?;

    // The EVT stakepool exists from genesis with an inert curve; producers
    // tune it through updstakepool.
    let stakepool = StakepoolDef {
        sym_id: evt_sym().id(),
        purchase_threshold: Asset::zero(evt_sym()),
        demand_r: 0,
        demand_t: 1,
        demand_q: 1,
        demand_w: 0,
        fixed_r: 0,
        fixed_t: 0,
        begin_time: genesis.initial_timestamp,
        total: Asset::zero(evt_sym()),
    };
    db.put_token(
        TokenType::Stakepool,
        ActionOp::Add,
        None,
        Name128::from_number(evt_sym().id() as u128),
        &bincode::serialize(&stakepool)?,
    )?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
