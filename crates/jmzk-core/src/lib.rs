//! jmzk-core — protocol value types for the jmzkChain state-transition
//! engine: packed names, addresses, assets, permissions and groups, entity
//! definitions, actions and blocks, EVT-Link, and the chain error type.

pub mod address;
pub mod asset;
pub mod authority;
pub mod block;
pub mod config;
pub mod entities;
pub mod error;
pub mod link;
pub mod merkle;
pub mod name;
pub mod payloads;
pub mod transaction;
pub mod types;

pub use address::Address;
pub use asset::{Asset, Percent, Symbol};
pub use error::ChainError;
pub use name::{Name, Name128};
pub use types::{BlockNum, Digest, PublicKey, Signature, SymbolId, Timestamp};
