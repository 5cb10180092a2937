use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use jmzk_core::address::Address;
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::types::SymbolId;
use jmzk_core::n128;

use crate::savepoint::{Frame, SavepointSession, SavepointStack};

// ── Key layout ───────────────────────────────────────────────────────────────

pub const TOKEN_KEY_SIZE: usize = 32;
pub const ASSET_KEY_SIZE: usize = 37;

/// Which logical family a tokens-space row belongs to. Every family except
/// `Token` lives under a fixed system prefix; NFTs are prefixed by their
/// domain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenType {
    Domain,
    Token,
    Group,
    Suspend,
    Lock,
    Fungible,
    Prodvote,
    Evtlink,
    Psvbonus,
    PsvbonusDist,
    Validator,
    Stakepool,
    Script,
}

impl TokenType {
    pub fn system_prefix(&self) -> Option<Name128> {
        match self {
            TokenType::Domain => Some(n128!(".domain")),
            TokenType::Token => None,
            TokenType::Group => Some(n128!(".group")),
            TokenType::Suspend => Some(n128!(".suspend")),
            TokenType::Lock => Some(n128!(".lock")),
            TokenType::Fungible => Some(n128!(".fungible")),
            TokenType::Prodvote => Some(n128!(".prodvote")),
            TokenType::Evtlink => Some(n128!(".evtlink")),
            TokenType::Psvbonus => Some(n128!(".psvbonus")),
            TokenType::PsvbonusDist => Some(n128!(".psvbonus-dist")),
            TokenType::Validator => Some(n128!(".validator")),
            TokenType::Stakepool => Some(n128!(".stakepool")),
            TokenType::Script => Some(n128!(".script")),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ActionOp {
    /// Insert; the key must be absent.
    Add,
    /// Overwrite; the key must be present.
    Update,
    /// Upsert.
    Put,
}

pub fn token_key(type_: TokenType, prefix: Option<Name128>, key: Name128) -> Vec<u8> {
    let prefix = prefix
        .or_else(|| type_.system_prefix())
        .expect("Token type requires an explicit domain prefix");
    let mut out = Vec::with_capacity(TOKEN_KEY_SIZE);
    out.extend_from_slice(&prefix.to_bytes());
    out.extend_from_slice(&key.to_bytes());
    out
}

pub fn asset_key(addr: &Address, sym_id: SymbolId) -> Vec<u8> {
    let mut out = Vec::with_capacity(ASSET_KEY_SIZE);
    out.extend_from_slice(&sym_id.to_be_bytes());
    out.extend_from_slice(&addr.to_key_bytes());
    out
}

// ── TokenDatabase ────────────────────────────────────────────────────────────

/// The versioned key-value store behind every action handler. All writes
/// pass through the engine immediately; the savepoint stack records
/// pre-images so any frame can be rolled back byte-identically.
pub struct TokenDatabase {
    _db: sled::Db,
    tokens: sled::Tree,
    assets: sled::Tree,
    pub(crate) sp: Mutex<SavepointStack>,
    /// Read overlay mirroring the assets tree; hot balance reads skip the
    /// engine entirely.
    assets_overlay: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    /// Bumped on every rollback; the typed cache drops entries from older
    /// epochs.
    epoch: AtomicU64,
    persist_path: PathBuf,
}

fn store_err(e: sled::Error) -> ChainError {
    ChainError::TokenDatabase(e.to_string())
}

impl TokenDatabase {
    /// Open or create the token database at `dir`. A dirty savepoint
    /// side-car fails the open; the caller is expected to wipe and replay
    /// from blocks.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ChainError> {
        let dir = dir.as_ref();
        let db = sled::open(dir).map_err(store_err)?;
        let tokens = db.open_tree("tokens").map_err(store_err)?;
        let assets = db.open_tree("assets").map_err(store_err)?;

        let persist_path = dir.join("savepoints.dat");
        let sp = SavepointStack::load(&persist_path)?;
        if !sp.frames.is_empty() {
            debug!(frames = sp.frames.len(), "restored savepoint stack from side-car");
        }
        // Running state is dirty until a clean close.
        SavepointStack::mark_dirty(&persist_path)?;

        Ok(Self {
            _db: db,
            tokens,
            assets,
            sp: Mutex::new(sp),
            assets_overlay: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            persist_path,
        })
    }

    /// Serialize the savepoint stack and mark the side-car clean.
    pub fn close(&self) -> Result<(), ChainError> {
        self.flush()?;
        self.sp.lock().unwrap().persist(&self.persist_path)
    }

    pub fn cache_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    // ── Tokens space ─────────────────────────────────────────────────────────

    pub fn put_token(
        &self,
        type_: TokenType,
        op: ActionOp,
        prefix: Option<Name128>,
        key: Name128,
        value: &[u8],
    ) -> Result<(), ChainError> {
        let k = token_key(type_, prefix, key);
        let prev = self.tokens.get(&k).map_err(store_err)?;
        match op {
            ActionOp::Add if prev.is_some() => {
                return Err(ChainError::TokenDatabase(format!(
                    "add: key {key} already exists"
                )))
            }
            ActionOp::Update if prev.is_none() => return Err(ChainError::UnknownTokenDatabaseKey),
            _ => {}
        }
        self.record_token_preimage(&k, prev.as_ref().map(|v| v.to_vec()));
        self.tokens.insert(k, value).map_err(store_err)?;
        Ok(())
    }

    /// Batched same-prefix insert; op checks run for every key before any
    /// write, then the batch applies atomically.
    pub fn put_tokens(
        &self,
        type_: TokenType,
        op: ActionOp,
        prefix: Option<Name128>,
        keys: &[Name128],
        values: &[Vec<u8>],
    ) -> Result<(), ChainError> {
        assert_eq!(keys.len(), values.len());
        let mut raw_keys = Vec::with_capacity(keys.len());
        let mut prevs = Vec::with_capacity(keys.len());
        for key in keys {
            let k = token_key(type_, prefix, *key);
            let prev = self.tokens.get(&k).map_err(store_err)?;
            match op {
                ActionOp::Add if prev.is_some() => {
                    return Err(ChainError::TokenDatabase(format!(
                        "add: key {key} already exists"
                    )))
                }
                ActionOp::Update if prev.is_none() => {
                    return Err(ChainError::UnknownTokenDatabaseKey)
                }
                _ => {}
            }
            raw_keys.push(k);
            prevs.push(prev.map(|v| v.to_vec()));
        }

        let mut batch = sled::Batch::default();
        for (k, v) in raw_keys.iter().zip(values) {
            batch.insert(k.as_slice(), v.as_slice());
        }
        for (k, prev) in raw_keys.iter().zip(prevs) {
            self.record_token_preimage(k, prev);
        }
        self.tokens.apply_batch(batch).map_err(store_err)?;
        Ok(())
    }

    pub fn exists_token(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
    ) -> Result<bool, ChainError> {
        let k = token_key(type_, prefix, key);
        self.tokens.contains_key(k).map_err(store_err)
    }

    pub fn read_token(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
    ) -> Result<Vec<u8>, ChainError> {
        self.read_token_opt(type_, prefix, key)?
            .ok_or(ChainError::UnknownTokenDatabaseKey)
    }

    pub fn read_token_opt(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
    ) -> Result<Option<Vec<u8>>, ChainError> {
        let k = token_key(type_, prefix, key);
        Ok(self.tokens.get(k).map_err(store_err)?.map(|v| v.to_vec()))
    }

    /// Iterate every row under a prefix, skipping `skip` rows. The callback
    /// returns `false` to stop early. Returns the number of rows visited.
    pub fn read_tokens_range<F>(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        skip: usize,
        mut func: F,
    ) -> Result<usize, ChainError>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let prefix = prefix
            .or_else(|| type_.system_prefix())
            .expect("Token type requires an explicit domain prefix");
        let mut count = 0usize;
        for item in self.tokens.scan_prefix(prefix.to_bytes()).skip(skip) {
            let (_, v) = item.map_err(store_err)?;
            count += 1;
            if !func(&v) {
                break;
            }
        }
        Ok(count)
    }

    // ── Assets space ─────────────────────────────────────────────────────────

    /// Upsert is the only write form in the assets space.
    pub fn put_asset(
        &self,
        addr: &Address,
        sym_id: SymbolId,
        value: &[u8],
    ) -> Result<(), ChainError> {
        let k = asset_key(addr, sym_id);
        let prev = self.read_asset_raw(&k)?;
        self.record_asset_preimage(&k, prev);
        self.assets.insert(k.clone(), value).map_err(store_err)?;
        self.assets_overlay.lock().unwrap().insert(k, value.to_vec());
        Ok(())
    }

    pub fn exists_asset(&self, addr: &Address, sym_id: SymbolId) -> Result<bool, ChainError> {
        let k = asset_key(addr, sym_id);
        if self.assets_overlay.lock().unwrap().contains_key(&k) {
            return Ok(true);
        }
        self.assets.contains_key(k).map_err(store_err)
    }

    pub fn read_asset(
        &self,
        addr: &Address,
        sym_id: SymbolId,
        no_throw: bool,
    ) -> Result<Option<Vec<u8>>, ChainError> {
        let k = asset_key(addr, sym_id);
        match self.read_asset_raw(&k)? {
            Some(v) => Ok(Some(v)),
            None if no_throw => Ok(None),
            None => Err(ChainError::UnknownTokenDatabaseKey),
        }
    }

    fn read_asset_raw(&self, k: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        if let Some(v) = self.assets_overlay.lock().unwrap().get(k) {
            return Ok(Some(v.clone()));
        }
        Ok(self.assets.get(k).map_err(store_err)?.map(|v| v.to_vec()))
    }

    /// Iterate every balance row of a symbol. The callback receives the raw
    /// 33-byte address key and the value; return `false` to stop.
    pub fn read_assets_range<F>(
        &self,
        sym_id: SymbolId,
        skip: usize,
        mut func: F,
    ) -> Result<usize, ChainError>
    where
        F: FnMut(&[u8; 33], &[u8]) -> bool,
    {
        let mut count = 0usize;
        for item in self.assets.scan_prefix(sym_id.to_be_bytes()).skip(skip) {
            let (k, v) = item.map_err(store_err)?;
            let addr: [u8; 33] = k[4..].try_into().expect("asset keys are 37 bytes");
            count += 1;
            if !func(&addr, &v) {
                break;
            }
        }
        Ok(count)
    }

    // ── Savepoints ───────────────────────────────────────────────────────────

    fn record_token_preimage(&self, key: &[u8], prev: Option<Vec<u8>>) {
        let mut sp = self.sp.lock().unwrap();
        if let Some(frame) = sp.frames.back_mut() {
            frame.tokens.entry(key.to_vec()).or_insert(prev);
        }
    }

    fn record_asset_preimage(&self, key: &[u8], prev: Option<Vec<u8>>) {
        let mut sp = self.sp.lock().unwrap();
        if let Some(frame) = sp.frames.back_mut() {
            frame.assets.entry(key.to_vec()).or_insert(prev);
        }
    }

    pub fn savepoints_size(&self) -> usize {
        self.sp.lock().unwrap().frames.len()
    }

    pub fn latest_savepoint_seq(&self) -> Result<i64, ChainError> {
        self.sp
            .lock()
            .unwrap()
            .frames
            .back()
            .map(|f| f.seq)
            .ok_or(ChainError::TokenDatabaseNoSavepoint)
    }

    pub fn add_savepoint(&self, seq: i64) -> Result<(), ChainError> {
        let mut sp = self.sp.lock().unwrap();
        if let Some(back) = sp.frames.back() {
            if seq <= back.seq {
                return Err(ChainError::TokenDatabaseSeq { got: seq, latest: back.seq });
            }
        }
        if sp.frames.len() >= jmzk_core::config::MAX_SAVEPOINTS {
            return Err(ChainError::TokenDatabaseCapacity);
        }
        sp.frames.push_back(Frame::new(seq));
        Ok(())
    }

    /// Push a savepoint and return a guard that rolls it back on drop
    /// unless accepted or squashed.
    pub fn new_savepoint_session(&self, seq: i64) -> Result<SavepointSession<'_>, ChainError> {
        self.add_savepoint(seq)?;
        Ok(SavepointSession::new(self, seq))
    }

    /// Session with the next sequence after the current latest.
    pub fn new_savepoint_session_auto(&self) -> Result<SavepointSession<'_>, ChainError> {
        let seq = self.sp.lock().unwrap().frames.back().map(|f| f.seq + 1).unwrap_or(1);
        self.new_savepoint_session(seq)
    }

    /// Revert the top frame: every touched key returns to its pre-image.
    pub fn rollback_to_latest_savepoint(&self) -> Result<(), ChainError> {
        let frame = {
            let mut sp = self.sp.lock().unwrap();
            sp.frames.pop_back().ok_or(ChainError::TokenDatabaseNoSavepoint)?
        };

        let mut batch = sled::Batch::default();
        for (key, pre) in &frame.tokens {
            match pre {
                Some(v) => batch.insert(key.as_slice(), v.as_slice()),
                None => batch.remove(key.as_slice()),
            }
        }
        self.tokens.apply_batch(batch).map_err(store_err)?;

        let mut batch = sled::Batch::default();
        {
            let mut overlay = self.assets_overlay.lock().unwrap();
            for (key, pre) in &frame.assets {
                match pre {
                    Some(v) => {
                        batch.insert(key.as_slice(), v.as_slice());
                        overlay.insert(key.clone(), v.clone());
                    }
                    None => {
                        batch.remove(key.as_slice());
                        overlay.remove(key);
                    }
                }
            }
        }
        self.assets.apply_batch(batch).map_err(store_err)?;

        self.epoch.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Merge the top frame into the one below. Pre-images already known to
    /// the lower frame win: they are older.
    pub fn squash(&self) -> Result<(), ChainError> {
        let mut sp = self.sp.lock().unwrap();
        if sp.frames.len() < 2 {
            return Err(ChainError::TokenDatabaseSquash);
        }
        let top = sp.frames.pop_back().unwrap();
        let below = sp.frames.back_mut().unwrap();
        for (k, pre) in top.tokens {
            below.tokens.entry(k).or_insert(pre);
        }
        for (k, pre) in top.assets {
            below.assets.entry(k).or_insert(pre);
        }
        Ok(())
    }

    /// Discard the top frame, keeping its writes.
    pub fn pop_back_savepoint(&self) -> Result<(), ChainError> {
        let mut sp = self.sp.lock().unwrap();
        sp.frames.pop_back().ok_or(ChainError::TokenDatabaseNoSavepoint)?;
        Ok(())
    }

    /// Commit every frame with `seq < until`: drop the undo info and fsync
    /// the engine. Called when the LIB advances.
    pub fn pop_savepoints(&self, until: i64) -> Result<(), ChainError> {
        let mut dropped = 0usize;
        {
            let mut sp = self.sp.lock().unwrap();
            while sp.frames.front().map_or(false, |f| f.seq < until) {
                sp.frames.pop_front();
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        self.tokens.flush().map_err(store_err)?;
        self.assets.flush().map_err(store_err)?;
        Ok(())
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.tokens.len(), self.assets.len())
    }
}

impl Drop for TokenDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "token database close failed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use jmzk_core::asset::evt_sym;

    fn temp_db() -> (tempfile::TempDir, TokenDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = TokenDatabase::open(dir.path()).unwrap();
        (dir, db)
    }

    fn pk_addr(tag: u8) -> Address {
        let mut b = [2u8; 33];
        b[1] = tag;
        Address::PublicKey(jmzk_core::types::PublicKey(b))
    }

    #[test]
    fn add_requires_absent() {
        let (_dir, db) = temp_db();
        db.put_token(TokenType::Domain, ActionOp::Add, None, n128!("d1"), b"v1").unwrap();
        assert!(db.put_token(TokenType::Domain, ActionOp::Add, None, n128!("d1"), b"v2").is_err());
        assert_eq!(db.read_token(TokenType::Domain, None, n128!("d1")).unwrap(), b"v1");
    }

    #[test]
    fn update_requires_present() {
        let (_dir, db) = temp_db();
        assert!(matches!(
            db.put_token(TokenType::Domain, ActionOp::Update, None, n128!("nope"), b"v"),
            Err(ChainError::UnknownTokenDatabaseKey)
        ));
    }

    #[test]
    fn prefix_isolation() {
        let (_dir, db) = temp_db();
        db.put_token(TokenType::Token, ActionOp::Add, Some(n128!("da")), n128!("t"), b"a").unwrap();
        db.put_token(TokenType::Token, ActionOp::Add, Some(n128!("db")), n128!("t"), b"b").unwrap();
        assert_eq!(db.read_token(TokenType::Token, Some(n128!("da")), n128!("t")).unwrap(), b"a");

        let mut seen = 0;
        db.read_tokens_range(TokenType::Token, Some(n128!("da")), 0, |_| {
            seen += 1;
            true
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn rollback_restores_byte_identical_state() {
        let (_dir, db) = temp_db();
        db.put_token(TokenType::Domain, ActionOp::Add, None, n128!("keep"), b"old").unwrap();

        let session = db.new_savepoint_session(1).unwrap();
        db.put_token(TokenType::Domain, ActionOp::Update, None, n128!("keep"), b"new").unwrap();
        db.put_token(TokenType::Domain, ActionOp::Add, None, n128!("fresh"), b"x").unwrap();
        db.put_asset(&pk_addr(1), evt_sym().id(), b"100").unwrap();
        drop(session); // not accepted: rolls back

        assert_eq!(db.read_token(TokenType::Domain, None, n128!("keep")).unwrap(), b"old");
        assert!(!db.exists_token(TokenType::Domain, None, n128!("fresh")).unwrap());
        assert!(db.read_asset(&pk_addr(1), evt_sym().id(), true).unwrap().is_none());
        assert_eq!(db.savepoints_size(), 0);
    }

    #[test]
    fn squash_merges_frames() {
        let (_dir, db) = temp_db();
        let outer = db.new_savepoint_session(1).unwrap();
        db.put_token(TokenType::Domain, ActionOp::Add, None, n128!("d"), b"v1").unwrap();

        let inner = db.new_savepoint_session(2).unwrap();
        db.put_token(TokenType::Domain, ActionOp::Update, None, n128!("d"), b"v2").unwrap();
        inner.squash().unwrap();
        assert_eq!(db.savepoints_size(), 1);

        // Rolling back the merged frame reverts both writes.
        drop(outer);
        assert!(!db.exists_token(TokenType::Domain, None, n128!("d")).unwrap());
    }

    #[test]
    fn savepoint_seq_monotonic() {
        let (_dir, db) = temp_db();
        db.add_savepoint(5).unwrap();
        assert!(matches!(
            db.add_savepoint(5),
            Err(ChainError::TokenDatabaseSeq { got: 5, latest: 5 })
        ));
        db.add_savepoint(6).unwrap();
        assert_eq!(db.latest_savepoint_seq().unwrap(), 6);
    }

    #[test]
    fn pop_savepoints_commits_front() {
        let (_dir, db) = temp_db();
        for seq in 1..=3 {
            let s = db.new_savepoint_session(seq).unwrap();
            db.put_token(
                TokenType::Domain,
                ActionOp::Put,
                None,
                Name128::from_number(seq as u128),
                b"v",
            )
            .unwrap();
            s.accept();
        }
        db.pop_savepoints(3).unwrap();
        assert_eq!(db.savepoints_size(), 1);
        // Committed writes survive; the remaining frame still rolls back.
        db.rollback_to_latest_savepoint().unwrap();
        assert!(db.exists_token(TokenType::Domain, None, n128!("1")).unwrap());
        assert!(db.exists_token(TokenType::Domain, None, n128!("2")).unwrap());
        assert!(!db.exists_token(TokenType::Domain, None, n128!("3")).unwrap());
    }

    #[test]
    fn batched_put_tokens_atomic_checks() {
        let (_dir, db) = temp_db();
        db.put_token(TokenType::Token, ActionOp::Add, Some(n128!("d")), n128!("t1"), b"x").unwrap();
        let keys = [n128!("t2"), n128!("t1")];
        let vals = vec![b"a".to_vec(), b"b".to_vec()];
        // t1 exists, so the whole batch must fail and write nothing.
        assert!(db
            .put_tokens(TokenType::Token, ActionOp::Add, Some(n128!("d")), &keys, &vals)
            .is_err());
        assert!(!db.exists_token(TokenType::Token, Some(n128!("d")), n128!("t2")).unwrap());
    }

    #[test]
    fn assets_range_scan() {
        let (_dir, db) = temp_db();
        for tag in 1..=3u8 {
            db.put_asset(&pk_addr(tag), 7, &[tag]).unwrap();
        }
        db.put_asset(&pk_addr(9), 8, &[9]).unwrap();

        let mut values = vec![];
        let count = db
            .read_assets_range(7, 0, |_, v| {
                values.push(v[0]);
                true
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn sidecar_roundtrip_and_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = TokenDatabase::open(dir.path()).unwrap();
            let s = db.new_savepoint_session(9).unwrap();
            db.put_token(TokenType::Domain, ActionOp::Add, None, n128!("d"), b"v").unwrap();
            s.accept();
            db.close().unwrap();
        }
        {
            let db = TokenDatabase::open(dir.path()).unwrap();
            assert_eq!(db.savepoints_size(), 1);
            assert_eq!(db.latest_savepoint_seq().unwrap(), 9);
            // Stack restored: rollback still works across restart.
            db.rollback_to_latest_savepoint().unwrap();
            assert!(!db.exists_token(TokenType::Domain, None, n128!("d")).unwrap());
        }
    }
}
