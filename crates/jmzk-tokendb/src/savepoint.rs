use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use jmzk_core::error::ChainError;

use crate::db::TokenDatabase;

const SIDECAR_MAGIC: &[u8; 4] = b"JSPT";
const FLAG_CLEAN: u8 = 0;
const FLAG_DIRTY: u8 = 1;

/// One savepoint: pre-images of every key written while it was on top.
/// `None` means the key did not exist before the frame.
#[derive(Serialize, Deserialize)]
pub struct Frame {
    pub seq: i64,
    pub tokens: HashMap<Vec<u8>, Option<Vec<u8>>>,
    pub assets: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Frame {
    pub fn new(seq: i64) -> Self {
        Self { seq, tokens: HashMap::new(), assets: HashMap::new() }
    }
}

/// The LIFO savepoint stack. Sequence numbers come from the controller
/// (the block number being built) and are strictly monotonic.
#[derive(Default, Serialize, Deserialize)]
pub struct SavepointStack {
    pub frames: VecDeque<Frame>,
}

impl SavepointStack {
    /// Load the side-car. A missing file yields an empty stack; a dirty
    /// flag means the previous process died mid-run and the stack cannot
    /// be trusted.
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut file = fs::File::open(path)?;
        let mut header = [0u8; 5];
        file.read_exact(&mut header)
            .map_err(|e| ChainError::TokenDatabasePersist(e.to_string()))?;
        if &header[..4] != SIDECAR_MAGIC {
            return Err(ChainError::TokenDatabasePersist("bad side-car magic".into()));
        }
        if header[4] == FLAG_DIRTY {
            return Err(ChainError::TokenDatabaseDirty);
        }
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        bincode::deserialize(&body).map_err(|e| ChainError::TokenDatabasePersist(e.to_string()))
    }

    /// Serialize the stack with a clean flag.
    pub fn persist(&self, path: &Path) -> Result<(), ChainError> {
        let mut file = fs::File::create(path)?;
        file.write_all(SIDECAR_MAGIC)?;
        file.write_all(&[FLAG_CLEAN])?;
        let body =
            bincode::serialize(self).map_err(|e| ChainError::TokenDatabasePersist(e.to_string()))?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(())
    }

    /// Flip the side-car to dirty without rewriting the body.
    pub fn mark_dirty(path: &Path) -> Result<(), ChainError> {
        let mut file = fs::File::create(path)?;
        file.write_all(SIDECAR_MAGIC)?;
        file.write_all(&[FLAG_DIRTY])?;
        file.sync_all()?;
        Ok(())
    }
}

// ── SavepointSession ─────────────────────────────────────────────────────────

/// Guard over one savepoint frame. Dropped without `accept`/`squash`, it
/// rolls the frame back; the explicit paths leave the frame in place or
/// merge it downward.
pub struct SavepointSession<'a> {
    db: &'a TokenDatabase,
    seq: i64,
    armed: bool,
}

impl<'a> SavepointSession<'a> {
    pub(crate) fn new(db: &'a TokenDatabase, seq: i64) -> Self {
        Self { db, seq, armed: true }
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Keep the frame on the stack for a later squash or commit.
    pub fn accept(mut self) {
        self.armed = false;
    }

    /// Merge this frame into its parent.
    pub fn squash(mut self) -> Result<(), ChainError> {
        self.armed = false;
        self.db.squash()
    }

    /// Explicit rollback; equivalent to dropping the guard but lets the
    /// caller observe errors.
    pub fn undo(mut self) -> Result<(), ChainError> {
        self.armed = false;
        self.db.rollback_to_latest_savepoint()
    }
}

impl Drop for SavepointSession<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.db.rollback_to_latest_savepoint() {
                warn!(error = %e, seq = self.seq, "savepoint rollback on drop failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_rejects_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("savepoints.dat");

        let stack = SavepointStack::default();
        stack.persist(&path).unwrap();
        assert!(SavepointStack::load(&path).is_ok());

        SavepointStack::mark_dirty(&path).unwrap();
        assert!(matches!(SavepointStack::load(&path), Err(ChainError::TokenDatabaseDirty)));
    }

    #[test]
    fn sidecar_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("savepoints.dat");
        fs::write(&path, b"XXXX\x00rest").unwrap();
        assert!(matches!(
            SavepointStack::load(&path),
            Err(ChainError::TokenDatabasePersist(_))
        ));
    }

    #[test]
    fn persist_roundtrip_keeps_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("savepoints.dat");

        let mut stack = SavepointStack::default();
        let mut frame = Frame::new(3);
        frame.tokens.insert(vec![1, 2], Some(vec![9]));
        frame.assets.insert(vec![7], None);
        stack.frames.push_back(frame);
        stack.persist(&path).unwrap();

        let loaded = SavepointStack::load(&path).unwrap();
        assert_eq!(loaded.frames.len(), 1);
        let f = &loaded.frames[0];
        assert_eq!(f.seq, 3);
        assert_eq!(f.tokens.get(&vec![1, 2]).unwrap(), &Some(vec![9]));
        assert_eq!(f.assets.get(&vec![7]).unwrap(), &None);
    }
}
