//! jmzk-chain — the state-transition engine: block log, fork database,
//! chain state store, action registry, authority checking, charge
//! accounting, transaction contexts, the closed action-handler set, and
//! the controller that drives them.

pub mod authorizer;
pub mod block_log;
pub mod charge;
pub mod context;
pub mod controller;
pub mod execution;
pub mod fork_db;
pub mod handlers;
pub mod state_db;
pub mod trx_context;

pub use block_log::BlockLog;
pub use controller::{BlockStatus, Config, Controller, Signals};
pub use fork_db::{BlockState, ForkDatabase};
pub use state_db::{GlobalProperty, StateDb};
pub use trx_context::{push_transaction, TransactionTrace, TrxKind};
