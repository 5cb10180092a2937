use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;

use crate::db::{token_key, ActionOp, TokenDatabase, TokenType};

/// Typed read-through cache over the token database. Values deserialize
/// once and are shared as `Arc<T>`; a rollback in the store bumps its
/// epoch, which expires every cached entry at once.
pub struct TokenDatabaseCache {
    db: Arc<TokenDatabase>,
    entries: Mutex<HashMap<Vec<u8>, (u64, Arc<dyn Any + Send + Sync>)>>,
}

impl TokenDatabaseCache {
    pub fn new(db: Arc<TokenDatabase>) -> Self {
        Self { db, entries: Mutex::new(HashMap::new()) }
    }

    pub fn db(&self) -> &TokenDatabase {
        &self.db
    }

    pub fn read_token<T>(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
    ) -> Result<Option<Arc<T>>, ChainError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let raw_key = token_key(type_, prefix, key);
        let epoch = self.db.cache_epoch();

        if let Some((cached_epoch, value)) = self.entries.lock().unwrap().get(&raw_key) {
            if *cached_epoch == epoch {
                if let Ok(typed) = value.clone().downcast::<T>() {
                    return Ok(Some(typed));
                }
            }
        }

        let Some(bytes) = self.db.read_token_opt(type_, prefix, key)? else {
            return Ok(None);
        };
        let typed: Arc<T> = Arc::new(bincode::deserialize(&bytes)?);
        self.entries.lock().unwrap().insert(raw_key, (epoch, typed.clone()));
        Ok(Some(typed))
    }

    /// Read a value that must exist, mapping absence to the caller's
    /// domain-specific error.
    pub fn read_token_required<T, E>(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
        missing: E,
    ) -> Result<Arc<T>, ChainError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        E: FnOnce() -> ChainError,
    {
        self.read_token(type_, prefix, key)?.ok_or_else(missing)
    }

    pub fn put_token<T>(
        &self,
        type_: TokenType,
        op: ActionOp,
        prefix: Option<Name128>,
        key: Name128,
        value: T,
    ) -> Result<(), ChainError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let bytes = bincode::serialize(&value)?;
        self.db.put_token(type_, op, prefix, key, &bytes)?;
        let raw_key = token_key(type_, prefix, key);
        self.entries
            .lock()
            .unwrap()
            .insert(raw_key, (self.db.cache_epoch(), Arc::new(value)));
        Ok(())
    }

    pub fn exists_token(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
    ) -> Result<bool, ChainError> {
        self.db.exists_token(type_, prefix, key)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use jmzk_core::n128;
    use serde::Deserialize;

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    struct Rec {
        n: u32,
        s: String,
    }

    fn setup() -> (tempfile::TempDir, TokenDatabaseCache) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(TokenDatabase::open(dir.path()).unwrap());
        (dir, TokenDatabaseCache::new(db))
    }

    #[test]
    fn read_through_and_shared() {
        let (_dir, cache) = setup();
        cache
            .put_token(TokenType::Domain, ActionOp::Add, None, n128!("d"), Rec { n: 1, s: "a".into() })
            .unwrap();

        let a = cache.read_token::<Rec>(TokenType::Domain, None, n128!("d")).unwrap().unwrap();
        let b = cache.read_token::<Rec>(TokenType::Domain, None, n128!("d")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.n, 1);
    }

    #[test]
    fn missing_maps_to_domain_error() {
        let (_dir, cache) = setup();
        let err = cache
            .read_token_required::<Rec, _>(TokenType::Domain, None, n128!("x"), || {
                ChainError::UnknownDomain("x".into())
            })
            .unwrap_err();
        assert!(matches!(err, ChainError::UnknownDomain(_)));
    }

    #[test]
    fn rollback_expires_entries() {
        let (_dir, cache) = setup();
        let session = cache.db().new_savepoint_session(1).unwrap();
        cache
            .put_token(TokenType::Domain, ActionOp::Add, None, n128!("d"), Rec { n: 1, s: "a".into() })
            .unwrap();
        assert!(cache.read_token::<Rec>(TokenType::Domain, None, n128!("d")).unwrap().is_some());

        drop(session); // rollback bumps the epoch
        assert!(cache.read_token::<Rec>(TokenType::Domain, None, n128!("d")).unwrap().is_none());
    }

    #[test]
    fn update_replaces_cached_value() {
        let (_dir, cache) = setup();
        cache
            .put_token(TokenType::Domain, ActionOp::Add, None, n128!("d"), Rec { n: 1, s: "a".into() })
            .unwrap();
        cache
            .put_token(TokenType::Domain, ActionOp::Update, None, n128!("d"), Rec { n: 2, s: "b".into() })
            .unwrap();
        let v = cache.read_token::<Rec>(TokenType::Domain, None, n128!("d")).unwrap().unwrap();
        assert_eq!(v.n, 2);
    }
}
