use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use jmzk_core::address::Address;
use jmzk_core::block::{ProducerSchedule, SignedBlock};
use jmzk_core::config::{ChainConfig, StakingConfig};
use jmzk_core::error::ChainError;
use jmzk_core::types::{BlockNum, Digest, Timestamp};

fn store_err(e: sled::Error) -> ChainError {
    ChainError::Database(e.to_string())
}

/// Everything in the global property object is consensus state: the chain
/// configuration (prodvote-adjustable), staking parameters, and the
/// proposed-but-not-yet-pending producer schedule.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GlobalProperty {
    pub configuration: ChainConfig,
    pub staking_configuration: StakingConfig,
    pub proposed_schedule_block_num: Option<BlockNum>,
    pub proposed_schedule: Option<ProducerSchedule>,
}

impl Default for GlobalProperty {
    fn default() -> Self {
        Self {
            configuration: ChainConfig::default(),
            staking_configuration: StakingConfig::default(),
            proposed_schedule_block_num: None,
            proposed_schedule: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Space {
    State,
    Summaries,
    TrxIds,
    TrxExp,
}

#[derive(Default)]
struct Frame {
    seq: i64,
    // Pre-images per space; None = absent before.
    pre: HashMap<(u8, Vec<u8>), Option<Vec<u8>>>,
}

/// The general chain state store: global/dynamic properties, the 65536
/// TAPOS block summaries, the transaction dedup index, the producer
/// blacklist, and the reversible-blocks cache. Mutations inside a session
/// record pre-images, mirroring the token database's undo discipline.
pub struct StateDb {
    _db: sled::Db,
    state: sled::Tree,
    summaries: sled::Tree,
    trxids: sled::Tree,
    trxexp: sled::Tree,
    reversible: sled::Tree,
    frames: Mutex<VecDeque<Frame>>,
    committed_revision: Mutex<i64>,
}

const KEY_GLOBAL: &[u8] = b"global_property";
const KEY_ACTION_SEQ: &[u8] = b"global_action_seq";
const KEY_REVISION: &[u8] = b"revision";
const KEY_BLACKLIST: &[u8] = b"blacklist";

impl StateDb {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ChainError> {
        let db = sled::open(dir).map_err(store_err)?;
        let state = db.open_tree("state").map_err(store_err)?;
        let summaries = db.open_tree("summaries").map_err(store_err)?;
        let trxids = db.open_tree("trxids").map_err(store_err)?;
        let trxexp = db.open_tree("trxexp").map_err(store_err)?;
        let reversible = db.open_tree("reversible").map_err(store_err)?;

        let committed_revision = state
            .get(KEY_REVISION)
            .map_err(store_err)?
            .map(|v| i64::from_le_bytes(v.as_ref().try_into().unwrap()))
            .unwrap_or(0);

        Ok(Self {
            _db: db,
            state,
            summaries,
            trxids,
            trxexp,
            reversible,
            frames: Mutex::new(VecDeque::new()),
            committed_revision: Mutex::new(committed_revision),
        })
    }

    fn tree(&self, space: Space) -> &sled::Tree {
        match space {
            Space::State => &self.state,
            Space::Summaries => &self.summaries,
            Space::TrxIds => &self.trxids,
            Space::TrxExp => &self.trxexp,
        }
    }

    fn put(&self, space: Space, key: &[u8], value: Option<&[u8]>) -> Result<(), ChainError> {
        let tree = self.tree(space);
        let prev = tree.get(key).map_err(store_err)?.map(|v| v.to_vec());
        {
            let mut frames = self.frames.lock().unwrap();
            if let Some(frame) = frames.back_mut() {
                frame.pre.entry((space as u8, key.to_vec())).or_insert(prev);
            }
        }
        match value {
            Some(v) => tree.insert(key, v).map_err(store_err)?,
            None => tree.remove(key).map_err(store_err)?,
        };
        Ok(())
    }

    // ── Undo sessions ────────────────────────────────────────────────────────

    pub fn revision(&self) -> i64 {
        let frames = self.frames.lock().unwrap();
        frames
            .back()
            .map(|f| f.seq)
            .unwrap_or(*self.committed_revision.lock().unwrap())
    }

    pub fn open_sessions(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn set_revision(&self, rev: i64) -> Result<(), ChainError> {
        let frames = self.frames.lock().unwrap();
        if !frames.is_empty() {
            return Err(ChainError::Database("cannot set revision with open sessions".into()));
        }
        *self.committed_revision.lock().unwrap() = rev;
        self.state
            .insert(KEY_REVISION, &rev.to_le_bytes())
            .map_err(store_err)?;
        Ok(())
    }

    pub fn start_undo_session(&self, seq: i64) -> Result<StateSession<'_>, ChainError> {
        {
            let mut frames = self.frames.lock().unwrap();
            if let Some(back) = frames.back() {
                if seq <= back.seq {
                    return Err(ChainError::Database(format!(
                        "undo session seq {seq} not above latest {}",
                        back.seq
                    )));
                }
            }
            frames.push_back(Frame { seq, ..Frame::default() });
        }
        Ok(StateSession { db: self, armed: true })
    }

    pub fn undo(&self) -> Result<(), ChainError> {
        let frame = {
            let mut frames = self.frames.lock().unwrap();
            frames
                .pop_back()
                .ok_or_else(|| ChainError::Database("no undo session".into()))?
        };
        for ((space, key), pre) in frame.pre {
            let tree = match space {
                s if s == Space::State as u8 => &self.state,
                s if s == Space::Summaries as u8 => &self.summaries,
                s if s == Space::TrxIds as u8 => &self.trxids,
                _ => &self.trxexp,
            };
            match pre {
                Some(v) => tree.insert(key, v).map_err(store_err)?,
                None => tree.remove(key).map_err(store_err)?,
            };
        }
        Ok(())
    }

    pub fn squash(&self) -> Result<(), ChainError> {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() < 2 {
            return Err(ChainError::Database("squash needs two undo sessions".into()));
        }
        let top = frames.pop_back().unwrap();
        let below = frames.back_mut().unwrap();
        for (k, pre) in top.pre {
            below.pre.entry(k).or_insert(pre);
        }
        Ok(())
    }

    /// Commit sessions with `seq <= num` and advance the durable revision.
    pub fn commit(&self, num: i64) -> Result<(), ChainError> {
        let mut frames = self.frames.lock().unwrap();
        while frames.front().map_or(false, |f| f.seq <= num) {
            frames.pop_front();
        }
        let mut rev = self.committed_revision.lock().unwrap();
        if num > *rev {
            *rev = num;
            self.state
                .insert(KEY_REVISION, &num.to_le_bytes())
                .map_err(store_err)?;
        }
        Ok(())
    }

    // ── Global property ──────────────────────────────────────────────────────

    pub fn global_property(&self) -> Result<GlobalProperty, ChainError> {
        match self.state.get(KEY_GLOBAL).map_err(store_err)? {
            Some(v) => Ok(bincode::deserialize(&v)?),
            None => Ok(GlobalProperty::default()),
        }
    }

    pub fn set_global_property(&self, gpo: &GlobalProperty) -> Result<(), ChainError> {
        self.put(Space::State, KEY_GLOBAL, Some(&bincode::serialize(gpo)?))
    }

    /// Monotonic sequence stamped onto every action receipt.
    pub fn next_action_seq(&self) -> Result<u64, ChainError> {
        let cur = self
            .state
            .get(KEY_ACTION_SEQ)
            .map_err(store_err)?
            .map(|v| u64::from_le_bytes(v.as_ref().try_into().unwrap()))
            .unwrap_or(0);
        let next = cur + 1;
        self.put(Space::State, KEY_ACTION_SEQ, Some(&next.to_le_bytes()))?;
        Ok(next)
    }

    // ── Block summaries (TAPOS ring) ─────────────────────────────────────────

    pub fn block_summary(&self, slot: u16) -> Result<Digest, ChainError> {
        match self.summaries.get(slot.to_be_bytes()).map_err(store_err)? {
            Some(v) => {
                let mut d = Digest::default();
                d.0.copy_from_slice(&v);
                Ok(d)
            }
            None => Ok(Digest::default()),
        }
    }

    pub fn set_block_summary(&self, slot: u16, id: &Digest) -> Result<(), ChainError> {
        self.put(Space::Summaries, &slot.to_be_bytes(), Some(&id.0))
    }

    // ── Transaction dedup index ──────────────────────────────────────────────

    /// Register a transaction id; a second registration inside the dedup
    /// window is a duplicate.
    pub fn insert_trx(&self, id: &Digest, expiration: Timestamp) -> Result<(), ChainError> {
        if self.trxids.contains_key(id.0).map_err(store_err)? {
            return Err(ChainError::TrxDuplicate(id.to_hex()));
        }
        self.put(Space::TrxIds, &id.0, Some(&expiration.to_le_bytes()))?;
        let mut exp_key = expiration.to_be_bytes().to_vec();
        exp_key.extend_from_slice(&id.0);
        self.put(Space::TrxExp, &exp_key, Some(&[]))?;
        Ok(())
    }

    /// Drop dedup rows whose expiration has passed. Runs at `start_block`,
    /// outside any undo session.
    pub fn clear_expired_trxs(&self, now: Timestamp) -> Result<(), ChainError> {
        let mut expired = Vec::new();
        for item in self.trxexp.iter() {
            let (k, _) = item.map_err(store_err)?;
            let exp = i64::from_be_bytes(k[..8].try_into().unwrap());
            if exp > now {
                break;
            }
            expired.push(k.to_vec());
        }
        for k in expired {
            self.trxexp.remove(&k).map_err(store_err)?;
            self.trxids.remove(&k[8..]).map_err(store_err)?;
        }
        Ok(())
    }

    // ── Producer blacklist ───────────────────────────────────────────────────

    pub fn blacklist(&self) -> Result<Vec<Address>, ChainError> {
        match self.state.get(KEY_BLACKLIST).map_err(store_err)? {
            Some(v) => Ok(bincode::deserialize(&v)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_blacklist(&self, addrs: &[Address]) -> Result<(), ChainError> {
        self.put(Space::State, KEY_BLACKLIST, Some(&bincode::serialize(addrs)?))
    }

    // ── Reversible blocks ────────────────────────────────────────────────────

    pub fn put_reversible(&self, block: &SignedBlock) -> Result<(), ChainError> {
        self.reversible
            .insert(block.block_num().to_be_bytes(), bincode::serialize(block)?)
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_reversible(&self, num: BlockNum) -> Result<Option<SignedBlock>, ChainError> {
        match self.reversible.get(num.to_be_bytes()).map_err(store_err)? {
            Some(v) => Ok(Some(bincode::deserialize(&v)?)),
            None => Ok(None),
        }
    }

    pub fn remove_reversible(&self, num: BlockNum) -> Result<(), ChainError> {
        self.reversible.remove(num.to_be_bytes()).map_err(store_err)?;
        Ok(())
    }

    /// Prune rows at or below the LIB.
    pub fn remove_reversible_upto(&self, num: BlockNum) -> Result<(), ChainError> {
        let mut doomed = Vec::new();
        for item in self.reversible.iter() {
            let (k, _) = item.map_err(store_err)?;
            let n = u32::from_be_bytes(k.as_ref().try_into().unwrap());
            if n > num {
                break;
            }
            doomed.push(n);
        }
        for n in doomed {
            self.reversible.remove(n.to_be_bytes()).map_err(store_err)?;
        }
        Ok(())
    }

    pub fn highest_reversible(&self) -> Result<Option<BlockNum>, ChainError> {
        match self.reversible.last().map_err(store_err)? {
            Some((k, _)) => Ok(Some(u32::from_be_bytes(k.as_ref().try_into().unwrap()))),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        self._db.flush().map_err(store_err)?;
        Ok(())
    }
}

/// Guard over one state-store undo frame; rolls back on drop unless
/// accepted or squashed.
pub struct StateSession<'a> {
    db: &'a StateDb,
    armed: bool,
}

impl StateSession<'_> {
    pub fn accept(mut self) {
        self.armed = false;
    }

    pub fn squash(mut self) -> Result<(), ChainError> {
        self.armed = false;
        self.db.squash()
    }

    pub fn undo(mut self) -> Result<(), ChainError> {
        self.armed = false;
        self.db.undo()
    }
}

impl Drop for StateSession<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.db.undo() {
                warn!(error = %e, "state session rollback on drop failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp() -> (tempfile::TempDir, StateDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn global_property_roundtrip() {
        let (_d, db) = temp();
        let mut gpo = db.global_property().unwrap();
        gpo.configuration.base_cpu_charge_factor = 99;
        db.set_global_property(&gpo).unwrap();
        assert_eq!(db.global_property().unwrap().configuration.base_cpu_charge_factor, 99);
    }

    #[test]
    fn undo_session_restores() {
        let (_d, db) = temp();
        let mut gpo = db.global_property().unwrap();
        gpo.configuration.global_charge_factor = 7;
        db.set_global_property(&gpo).unwrap();

        let session = db.start_undo_session(1).unwrap();
        let mut inner = db.global_property().unwrap();
        inner.configuration.global_charge_factor = 500;
        db.set_global_property(&inner).unwrap();
        db.set_block_summary(42, &Digest([9u8; 32])).unwrap();
        drop(session);

        assert_eq!(db.global_property().unwrap().configuration.global_charge_factor, 7);
        assert_eq!(db.block_summary(42).unwrap(), Digest::default());
    }

    #[test]
    fn dedup_rejects_then_expires() {
        let (_d, db) = temp();
        let id = Digest([1u8; 32]);
        db.insert_trx(&id, 100).unwrap();
        assert!(matches!(db.insert_trx(&id, 100), Err(ChainError::TrxDuplicate(_))));

        db.clear_expired_trxs(99).unwrap();
        assert!(matches!(db.insert_trx(&id, 100), Err(ChainError::TrxDuplicate(_))));

        db.clear_expired_trxs(101).unwrap();
        db.insert_trx(&id, 200).unwrap();
    }

    #[test]
    fn commit_advances_revision() {
        let (_d, db) = temp();
        assert_eq!(db.revision(), 0);
        let s1 = db.start_undo_session(1).unwrap();
        s1.accept();
        let s2 = db.start_undo_session(2).unwrap();
        s2.accept();
        assert_eq!(db.revision(), 2);
        db.commit(1).unwrap();
        assert_eq!(db.revision(), 2);
        db.commit(2).unwrap();
        assert_eq!(db.revision(), 2);
    }

    #[test]
    fn reversible_prune() {
        let (_d, db) = temp();
        // Minimal blocks differing only in previous-id block number.
        for n in 1u32..=4 {
            let mut b = SignedBlock {
                header: jmzk_core::block::BlockHeader::default(),
                producer_signature: jmzk_core::types::Signature { rs: [0; 64], recovery: 0 },
                transactions: vec![],
            };
            b.header.previous.0[..4].copy_from_slice(&(n - 1).to_be_bytes());
            db.put_reversible(&b).unwrap();
        }
        db.remove_reversible_upto(2).unwrap();
        assert!(db.get_reversible(2).unwrap().is_none());
        assert!(db.get_reversible(3).unwrap().is_some());
        assert_eq!(db.highest_reversible().unwrap(), Some(4));
    }
}
