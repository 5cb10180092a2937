//! jmzk-tokendb — the versioned token store. Two keyspaces over sled
//! (tokens: 32-byte prefix‖key, assets: 37-byte sym_id‖address) with a
//! stack of savepoints holding pre-images for atomic rollback, an assets
//! read overlay, a persisted savepoint side-car, and a typed read-through
//! cache.

pub mod cache;
pub mod db;
pub mod savepoint;

pub use cache::TokenDatabaseCache;
pub use db::{ActionOp, TokenDatabase, TokenType};
pub use savepoint::SavepointSession;
