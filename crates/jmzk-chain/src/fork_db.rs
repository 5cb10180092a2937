use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use jmzk_core::block::{BlockHeader, BlockTimestamp, ProducerSchedule, SignedBlock};
use jmzk_core::error::ChainError;
use jmzk_core::name::Name128;
use jmzk_core::types::{BlockNum, Digest};
use jmzk_crypto::recover;

// ── BlockState ───────────────────────────────────────────────────────────────

/// A validated or in-flight block plus the consensus bookkeeping derived
/// from its ancestry: schedules, per-producer confirmation horizon, and the
/// two irreversibility numbers.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BlockState {
    pub id: Digest,
    pub block_num: BlockNum,
    pub header: BlockHeader,
    pub block: SignedBlock,
    pub validated: bool,
    pub in_current_chain: bool,
    pub active_schedule: ProducerSchedule,
    /// `(block num promoted to pending, schedule)`.
    pub pending_schedule: Option<(BlockNum, ProducerSchedule)>,
    pub dpos_irreversible_blocknum: BlockNum,
    pub bft_irreversible_blocknum: BlockNum,
    /// Producing block n implies confirming n-1; the 2/3+1 quantile over
    /// these values is the DPoS LIB.
    pub producer_implied_irb: BTreeMap<Name128, BlockNum>,
}

fn dpos_lib(schedule: &ProducerSchedule, implied: &BTreeMap<Name128, BlockNum>) -> BlockNum {
    let mut nums: Vec<BlockNum> = schedule
        .producers
        .iter()
        .map(|p| implied.get(&p.producer_name).copied().unwrap_or(0))
        .collect();
    nums.sort_unstable();
    // Value confirmed by at least 2N/3+1 producers.
    let n = nums.len();
    nums[(n - 1) / 3]
}

impl BlockState {
    /// Genesis or replay anchor: a state with no ancestry bookkeeping.
    pub fn root(block: SignedBlock, schedule: ProducerSchedule) -> Self {
        let header = block.header.clone();
        let block_num = header.block_num();
        Self {
            id: header.id(),
            block_num,
            header,
            block,
            validated: true,
            in_current_chain: true,
            active_schedule: schedule,
            pending_schedule: None,
            dpos_irreversible_blocknum: block_num.saturating_sub(1),
            bft_irreversible_blocknum: 0,
            producer_implied_irb: BTreeMap::new(),
        }
    }

    /// The state a child block of `prev` at `when` starts from. Promotes
    /// the pending schedule to active when its promotion block has become
    /// irreversible; returns whether that promotion happened.
    pub fn build_next(prev: &Self, when: BlockTimestamp) -> (Self, bool) {
        let mut active = prev.active_schedule.clone();
        let mut pending = prev.pending_schedule.clone();
        let mut schedule_version = prev.header.schedule_version;
        let mut promoted = false;

        if let Some((since, sched)) = &pending {
            if *since <= prev.dpos_irreversible_blocknum {
                active = sched.clone();
                schedule_version += 1;
                pending = None;
                promoted = true;
            }
        }

        let producer = active.scheduled_producer(when).producer_name;
        let block_num = prev.block_num + 1;

        let mut implied = prev.producer_implied_irb.clone();
        implied.insert(producer, block_num.saturating_sub(1));
        let dpos = dpos_lib(&active, &implied).max(prev.dpos_irreversible_blocknum);

        let header = BlockHeader {
            timestamp: when,
            producer,
            confirmed: 0,
            previous: prev.id,
            transaction_mroot: Digest::default(),
            action_mroot: Digest::default(),
            schedule_version,
            new_producers: None,
        };

        let state = Self {
            id: Digest::default(),
            block_num,
            header,
            block: SignedBlock {
                header: BlockHeader::default(),
                producer_signature: jmzk_core::types::Signature { rs: [0; 64], recovery: 0 },
                transactions: vec![],
            },
            validated: false,
            in_current_chain: false,
            active_schedule: active,
            pending_schedule: pending,
            dpos_irreversible_blocknum: dpos,
            bft_irreversible_blocknum: prev.bft_irreversible_blocknum,
            producer_implied_irb: implied,
        };
        (state, promoted)
    }

    /// Record a proposed schedule becoming pending as of this block.
    pub fn set_new_producers(&mut self, sched: ProducerSchedule) {
        self.header.new_producers = Some(sched.clone());
        self.pending_schedule = Some((self.block_num, sched));
    }

    pub fn irreversible_blocknum(&self) -> BlockNum {
        self.dpos_irreversible_blocknum.max(self.bft_irreversible_blocknum)
    }

    /// Check the producer signature against the active schedule.
    pub fn verify_signature(&self) -> Result<(), ChainError> {
        let expected = self
            .active_schedule
            .producer_key(self.header.producer)
            .ok_or_else(|| {
                ChainError::BlockValidate(format!("unknown producer {}", self.header.producer))
            })?;
        let signer = recover(&self.id, &self.block.producer_signature)?;
        if signer != *expected {
            return Err(ChainError::BlockValidate(format!(
                "block {} not signed by scheduled producer",
                self.block_num
            )));
        }
        Ok(())
    }
}

// ── ForkDatabase ─────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ForkDbSnapshot {
    nodes: Vec<BlockState>,
    head_id: Option<Digest>,
}

/// In-memory DAG of recent block states behind integer node ids; parents
/// are referenced by id so shared ancestors need no shared ownership.
/// Nodes below the LIB are pruned as irreversibility advances.
pub struct ForkDatabase {
    nodes: HashMap<u32, BlockState>,
    parents: HashMap<u32, u32>,
    by_id: HashMap<Digest, u32>,
    next_node: u32,
    head: Option<u32>,
    /// Highest block already reported through `advance_lib`.
    notified_lib: BlockNum,
    path: PathBuf,
}

impl ForkDatabase {
    pub fn open<P: AsRef<Path>>(state_dir: P) -> Result<Self, ChainError> {
        std::fs::create_dir_all(&state_dir)?;
        let path = state_dir.as_ref().join("forkdb.dat");
        let mut fdb = Self {
            nodes: HashMap::new(),
            parents: HashMap::new(),
            by_id: HashMap::new(),
            next_node: 0,
            head: None,
            notified_lib: 0,
            path,
        };
        if fdb.path.exists() {
            let bytes = std::fs::read(&fdb.path)?;
            if !bytes.is_empty() {
                let snap: ForkDbSnapshot = bincode::deserialize(&bytes)
                    .map_err(|e| ChainError::ForkDatabase(e.to_string()))?;
                for state in snap.nodes {
                    fdb.insert_node(state);
                }
                fdb.relink_parents();
                fdb.head = snap.head_id.and_then(|id| fdb.by_id.get(&id).copied());
                // The snapshot root is irreversible by construction.
                fdb.notified_lib = fdb
                    .head
                    .and_then(|h| fdb.nodes.get(&h))
                    .map(|s| s.block_num)
                    .unwrap_or(0);
                debug!(nodes = fdb.nodes.len(), "fork database restored from snapshot");
            }
        }
        Ok(fdb)
    }

    pub fn close(&self) -> Result<(), ChainError> {
        let snap = ForkDbSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            head_id: self.head.and_then(|h| self.nodes.get(&h)).map(|s| s.id),
        };
        let bytes =
            bincode::serialize(&snap).map_err(|e| ChainError::ForkDatabase(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn insert_node(&mut self, state: BlockState) -> u32 {
        let node = self.next_node;
        self.next_node += 1;
        self.by_id.insert(state.id, node);
        self.nodes.insert(node, state);
        node
    }

    fn relink_parents(&mut self) {
        let links: Vec<(u32, u32)> = self
            .nodes
            .iter()
            .filter_map(|(&n, s)| self.by_id.get(&s.header.previous).map(|&p| (n, p)))
            .collect();
        self.parents.extend(links);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Install the root state (genesis, or the replayed irreversible
    /// head). The root itself counts as already irreversible.
    pub fn reset(&mut self, state: BlockState) {
        self.nodes.clear();
        self.parents.clear();
        self.by_id.clear();
        self.next_node = 0;
        self.notified_lib = state.block_num;
        let node = self.insert_node(state);
        self.head = Some(node);
    }

    pub fn head(&self) -> Option<&BlockState> {
        self.head.and_then(|h| self.nodes.get(&h))
    }

    pub fn get_block(&self, id: &Digest) -> Option<&BlockState> {
        self.by_id.get(id).and_then(|n| self.nodes.get(n))
    }

    /// Add a signed block received from the outside. Builds its state on
    /// its parent, verifies the producer signature unless trusted, inserts,
    /// and recomputes the head.
    pub fn add(&mut self, block: SignedBlock, trusted: bool) -> Result<BlockState, ChainError> {
        let id = block.id();
        if self.by_id.contains_key(&id) {
            return Err(ChainError::ForkDatabase(format!("block {} already exists", id)));
        }
        let parent_node = *self.by_id.get(&block.header.previous).ok_or_else(|| {
            ChainError::UnlinkableBlock(format!("unknown previous block for {}", block.block_num()))
        })?;
        let parent = self.nodes.get(&parent_node).unwrap();

        let (mut state, _) = BlockState::build_next(parent, block.header.timestamp);
        if block.header.producer != state.header.producer {
            return Err(ChainError::BlockValidate(format!(
                "wrong producer {} for slot, expected {}",
                block.header.producer, state.header.producer
            )));
        }
        if let Some(new_producers) = &block.header.new_producers {
            state.set_new_producers(new_producers.clone());
        }
        state.header = block.header.clone();
        state.id = id;
        state.block = block;
        if !trusted {
            state.verify_signature()?;
        } else {
            state.validated = true;
        }

        let node = self.insert_node(state);
        self.parents.insert(node, parent_node);
        self.recompute_head();
        Ok(self.nodes.get(&node).unwrap().clone())
    }

    /// Insert a state the controller assembled and validated itself.
    pub fn add_state(&mut self, state: BlockState) -> Result<BlockState, ChainError> {
        if self.by_id.contains_key(&state.id) {
            return Err(ChainError::ForkDatabase(format!("block {} already exists", state.id)));
        }
        let parent = self.by_id.get(&state.header.previous).copied();
        let node = self.insert_node(state);
        if let Some(p) = parent {
            self.parents.insert(node, p);
        }
        self.recompute_head();
        Ok(self.nodes.get(&node).unwrap().clone())
    }

    /// Head: highest block number; ties break toward the lowest id.
    fn recompute_head(&mut self) {
        self.head = self
            .nodes
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.block_num
                    .cmp(&b.block_num)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(&n, _)| n);
    }

    pub fn mark_in_current_chain(&mut self, id: &Digest, in_chain: bool) {
        if let Some(node) = self.by_id.get(id) {
            if let Some(state) = self.nodes.get_mut(node) {
                state.in_current_chain = in_chain;
            }
        }
    }

    /// `true` confirms a block; `false` removes it and its whole subtree.
    pub fn set_validity(&mut self, id: &Digest, valid: bool) {
        let Some(&node) = self.by_id.get(id) else { return };
        if valid {
            if let Some(state) = self.nodes.get_mut(&node) {
                state.validated = true;
            }
            return;
        }
        let mut doomed = vec![node];
        let mut i = 0;
        while i < doomed.len() {
            let cur = doomed[i];
            doomed.extend(
                self.parents
                    .iter()
                    .filter(|(_, &p)| p == cur)
                    .map(|(&c, _)| c),
            );
            i += 1;
        }
        for n in doomed {
            if let Some(state) = self.nodes.remove(&n) {
                self.by_id.remove(&state.id);
            }
            self.parents.remove(&n);
        }
        self.recompute_head();
    }

    /// Both sides of the fork between `a` and `b`, each ordered tip-first
    /// and stopping just above the common ancestor.
    pub fn fetch_branch_from(
        &self,
        a: &Digest,
        b: &Digest,
    ) -> Result<(Vec<BlockState>, Vec<BlockState>), ChainError> {
        let mut first = Vec::new();
        let mut second = Vec::new();
        let mut na = *self.by_id.get(a).ok_or_else(|| {
            ChainError::ForkDatabase(format!("unknown branch tip {a}"))
        })?;
        let mut nb = *self.by_id.get(b).ok_or_else(|| {
            ChainError::ForkDatabase(format!("unknown branch tip {b}"))
        })?;

        loop {
            let sa = self.nodes.get(&na).unwrap();
            let sb = self.nodes.get(&nb).unwrap();
            if sa.id == sb.id {
                break;
            }
            if sa.block_num >= sb.block_num {
                first.push(sa.clone());
                na = *self.parents.get(&na).ok_or_else(|| {
                    ChainError::ForkDatabase("branch walks past fork database root".into())
                })?;
            } else {
                second.push(sb.clone());
                nb = *self.parents.get(&nb).ok_or_else(|| {
                    ChainError::ForkDatabase("branch walks past fork database root".into())
                })?;
            }
        }
        Ok((first, second))
    }

    /// External BFT finality input (e.g. accumulated header confirmations).
    /// The number propagates to the target and every descendant.
    pub fn mark_bft_irreversible(&mut self, id: &Digest) {
        let Some(&target) = self.by_id.get(id) else { return };
        let num = self.nodes[&target].block_num;

        let descendants: Vec<u32> = self
            .nodes
            .keys()
            .copied()
            .filter(|&n| {
                let mut cur = Some(n);
                while let Some(c) = cur {
                    if c == target {
                        return true;
                    }
                    cur = self.parents.get(&c).copied();
                }
                false
            })
            .collect();
        for n in descendants {
            let state = self.nodes.get_mut(&n).unwrap();
            if state.bft_irreversible_blocknum < num {
                state.bft_irreversible_blocknum = num;
            }
        }
    }

    /// Newly irreversible blocks on the head chain, oldest first. Prunes
    /// everything strictly below the new LIB.
    pub fn advance_lib(&mut self) -> Vec<BlockState> {
        let Some(head) = self.head() else { return Vec::new() };
        let lib = head.irreversible_blocknum();
        if lib <= self.notified_lib {
            return Vec::new();
        }

        // Walk the head chain down and collect (notified, lib] blocks.
        let mut chain = Vec::new();
        let mut cursor = self.head;
        while let Some(node) = cursor {
            let state = self.nodes.get(&node).unwrap();
            if state.block_num <= self.notified_lib {
                break;
            }
            if state.block_num <= lib {
                chain.push(state.clone());
            }
            cursor = self.parents.get(&node).copied();
        }
        chain.reverse();
        self.notified_lib = lib;

        // Prune everything below the LIB; the LIB block becomes the root.
        let doomed: Vec<u32> = self
            .nodes
            .iter()
            .filter(|(_, s)| s.block_num < lib)
            .map(|(&n, _)| n)
            .collect();
        for n in doomed {
            if let Some(state) = self.nodes.remove(&n) {
                self.by_id.remove(&state.id);
            }
            self.parents.remove(&n);
        }
        if !chain.is_empty() {
            info!(lib, "irreversibility advanced");
        }
        chain
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use jmzk_core::block::ProducerKey;
    use jmzk_core::n128;
    use jmzk_core::types::Signature;
    use jmzk_crypto::KeyPair;

    fn schedule(kp: &KeyPair) -> ProducerSchedule {
        ProducerSchedule {
            version: 0,
            producers: vec![ProducerKey {
                producer_name: n128!("evt"),
                block_signing_key: kp.public_key,
            }],
        }
    }

    fn root_block(ts: u32) -> SignedBlock {
        SignedBlock {
            header: BlockHeader {
                timestamp: BlockTimestamp(ts),
                producer: n128!("evt"),
                previous: Digest::default(),
                ..BlockHeader::default()
            },
            producer_signature: Signature { rs: [0; 64], recovery: 0 },
            transactions: vec![],
        }
    }

    fn child_of(kp: &KeyPair, prev: &BlockState, ts: u32, salt: u8) -> SignedBlock {
        let (state, _) = BlockState::build_next(prev, BlockTimestamp(ts));
        let mut header = state.header;
        header.action_mroot = Digest([salt; 32]);
        let id = header.id();
        SignedBlock { header, producer_signature: kp.sign(&id), transactions: vec![] }
    }

    fn fdb_with_root(kp: &KeyPair) -> (tempfile::TempDir, ForkDatabase, BlockState) {
        let dir = tempfile::tempdir().unwrap();
        let mut fdb = ForkDatabase::open(dir.path()).unwrap();
        let root = BlockState::root(root_block(100), schedule(kp));
        fdb.reset(root.clone());
        (dir, fdb, root)
    }

    #[test]
    fn add_links_and_moves_head() {
        let kp = KeyPair::from_seed(b"p");
        let (_d, mut fdb, root) = fdb_with_root(&kp);

        let b2 = child_of(&kp, &root, 101, 1);
        let s2 = fdb.add(b2, false).unwrap();
        assert_eq!(fdb.head().unwrap().id, s2.id);
        assert_eq!(s2.block_num, 2);
    }

    #[test]
    fn add_rejects_unknown_parent_and_bad_signature() {
        let kp = KeyPair::from_seed(b"p");
        let (_d, mut fdb, root) = fdb_with_root(&kp);

        let mut orphan = child_of(&kp, &root, 101, 1);
        orphan.header.previous = Digest([7u8; 32]);
        assert!(matches!(fdb.add(orphan, false), Err(ChainError::UnlinkableBlock(_))));

        let intruder = KeyPair::from_seed(b"x");
        let forged = child_of(&intruder, &root, 101, 2);
        assert!(matches!(fdb.add(forged, false), Err(ChainError::BlockValidate(_))));
    }

    #[test]
    fn branches_from_fork_point() {
        let kp = KeyPair::from_seed(b"p");
        let (_d, mut fdb, root) = fdb_with_root(&kp);

        let b2 = fdb.add(child_of(&kp, &root, 101, 1), false).unwrap();
        let a3 = fdb.add(child_of(&kp, &b2, 102, 2), false).unwrap();
        let b3 = fdb.add(child_of(&kp, &b2, 102, 3), false).unwrap();
        let b4 = fdb.add(child_of(&kp, &b3, 103, 4), false).unwrap();

        let (first, second) = fdb.fetch_branch_from(&b4.id, &a3.id).unwrap();
        assert_eq!(first.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b4.id, b3.id]);
        assert_eq!(second.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a3.id]);
    }

    #[test]
    fn invalidation_removes_subtree() {
        let kp = KeyPair::from_seed(b"p");
        let (_d, mut fdb, root) = fdb_with_root(&kp);

        let b2 = fdb.add(child_of(&kp, &root, 101, 1), false).unwrap();
        let b3 = fdb.add(child_of(&kp, &b2, 102, 2), false).unwrap();
        let b4 = fdb.add(child_of(&kp, &b3, 103, 3), false).unwrap();

        fdb.set_validity(&b3.id, false);
        assert!(fdb.get_block(&b3.id).is_none());
        assert!(fdb.get_block(&b4.id).is_none());
        assert_eq!(fdb.head().unwrap().id, b2.id);
    }

    #[test]
    fn single_producer_lib_trails_head_by_one() {
        let kp = KeyPair::from_seed(b"p");
        let (_d, mut fdb, root) = fdb_with_root(&kp);

        let b2 = fdb.add(child_of(&kp, &root, 101, 1), false).unwrap();
        assert_eq!(b2.dpos_irreversible_blocknum, 1);
        let b3 = fdb.add(child_of(&kp, &b2, 102, 2), false).unwrap();
        assert_eq!(b3.dpos_irreversible_blocknum, 2);

        let newly = fdb.advance_lib();
        assert_eq!(newly.iter().map(|s| s.block_num).collect::<Vec<_>>(), vec![2]);
        // Second call is a no-op until LIB moves again.
        assert!(fdb.advance_lib().is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let kp = KeyPair::from_seed(b"p");
        let dir = tempfile::tempdir().unwrap();
        let head_id;
        {
            let mut fdb = ForkDatabase::open(dir.path()).unwrap();
            let root = BlockState::root(root_block(100), schedule(&kp));
            fdb.reset(root.clone());
            let b2 = fdb.add(child_of(&kp, &root, 101, 1), false).unwrap();
            head_id = b2.id;
            fdb.close().unwrap();
        }
        let fdb = ForkDatabase::open(dir.path()).unwrap();
        assert_eq!(fdb.head().unwrap().id, head_id);
        assert!(fdb.get_block(&head_id).is_some());
    }
}
