use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use jmzk_core::block::{BlockTimestamp, SignedBlock};
use jmzk_core::error::ChainError;
use jmzk_core::merkle::merkle;
use jmzk_core::transaction::SignedTransaction;
use jmzk_core::types::{BlockNum, Digest, Signature};
use jmzk_genesis::{initialize_token_db, GenesisState};
use jmzk_tokendb::{TokenDatabase, TokenDatabaseCache};

use crate::context::{BlockEnv, ChainServices, PendingOut};
use crate::execution::ExecutionContext;
use crate::fork_db::{BlockState, ForkDatabase};
use crate::block_log::BlockLog;
use crate::state_db::StateDb;
use crate::trx_context::{self, TransactionTrace, TrxKind};

// ── Signals ──────────────────────────────────────────────────────────────────

type Handler<T> = Box<dyn Fn(&T) -> Result<(), ChainError> + Send>;

/// Synchronous observer bus. A handler returning `EmitSignal` is fatal and
/// halts consensus; any other error is logged and swallowed so replay
/// stays deterministic.
#[derive(Default)]
pub struct Signals {
    pub pre_accepted_block: Vec<Handler<SignedBlock>>,
    pub accepted_block_header: Vec<Handler<BlockState>>,
    pub accepted_block: Vec<Handler<BlockState>>,
    pub accepted_transaction: Vec<Handler<SignedTransaction>>,
    pub applied_transaction: Vec<Handler<TransactionTrace>>,
    pub irreversible_block: Vec<Handler<BlockState>>,
    pub accepted_confirmation: Vec<Handler<Digest>>,
}

fn emit<T>(handlers: &[Handler<T>], arg: &T) -> Result<(), ChainError> {
    for handler in handlers {
        match handler(arg) {
            Ok(()) => {}
            Err(e @ ChainError::EmitSignal(_)) => {
                warn!(error = %e, "fatal signal handler error");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "signal handler error swallowed"),
        }
    }
    Ok(())
}

// ── Config / status ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub genesis: GenesisState,
    /// Re-run full signature checks even on replayed blocks.
    pub force_all_checks: bool,
    pub charge_free_mode: bool,
    pub loadtest_mode: bool,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>, genesis: GenesisState) -> Self {
        Self {
            data_dir: data_dir.into(),
            genesis,
            force_all_checks: false,
            charge_free_mode: false,
            loadtest_mode: false,
        }
    }

    fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    fn tokendb_dir(&self) -> PathBuf {
        self.data_dir.join("tokendb")
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockStatus {
    /// The block we are producing right now.
    Incomplete,
    /// Complete but seen for the first time; full validation applies.
    Complete,
    /// Validated before (reversible-store replay).
    Validated,
    /// Below the LIB (block-log replay).
    Irreversible,
}

struct Pending {
    block_state: BlockState,
    out: PendingOut,
    trxs: Vec<SignedTransaction>,
    status: BlockStatus,
}

// ── Controller ───────────────────────────────────────────────────────────────

/// Owns every mutable store and drives the block lifecycle: assembly,
/// validation, fork switching, and irreversibility.
pub struct Controller {
    pub services: ChainServices,
    fork_db: ForkDatabase,
    block_log: BlockLog,
    head: BlockState,
    pending: Option<Pending>,
    pub signals: Signals,
    conf: Config,
    replaying: bool,
    /// Transactions undone by pop_block or abort_block, keyed by signed id.
    pub unapplied_transactions: HashMap<Digest, SignedTransaction>,
}

impl Controller {
    pub fn open(conf: Config) -> Result<Self, ChainError> {
        let token_db = Arc::new(TokenDatabase::open(conf.tokendb_dir())?);
        let state = StateDb::open(conf.state_dir())?;
        let mut fork_db = ForkDatabase::open(conf.state_dir())?;
        let mut block_log = BlockLog::open(conf.blocks_dir())?;
        let chain_id = conf.genesis.compute_chain_id();

        if let Some(stored) = block_log.genesis() {
            if stored.compute_chain_id() != chain_id {
                return Err(ChainError::BlockValidate(
                    "block log belongs to a different chain".into(),
                ));
            }
        }

        let head = match fork_db.head() {
            Some(h) => h.clone(),
            None => {
                info!("initializing new blockchain from genesis state");
                let genesis_block = SignedBlock {
                    header: conf.genesis.genesis_header(),
                    producer_signature: Signature { rs: [0; 64], recovery: 0 },
                    transactions: vec![],
                };
                let root = BlockState::root(genesis_block.clone(), conf.genesis.initial_schedule());
                fork_db.reset(root.clone());
                state.set_revision(root.block_num as i64)?;
                state.set_block_summary(1, &root.id)?;
                initialize_token_db(&token_db, &conf.genesis)?;
                if block_log.head().is_none() {
                    block_log.reset_to_genesis(&conf.genesis, genesis_block)?;
                }
                root
            }
        };

        let services = ChainServices {
            cache: TokenDatabaseCache::new(token_db),
            state,
            exec: ExecutionContext::new(),
            chain_id,
        };

        let mut controller = Self {
            services,
            fork_db,
            block_log,
            head,
            pending: None,
            signals: Signals::default(),
            conf,
            replaying: false,
            unapplied_transactions: HashMap::new(),
        };
        controller.replay_if_behind()?;
        controller.check_store_consistency()?;
        Ok(controller)
    }

    /// Bring a fresh fork database up to the block log head, then re-apply
    /// any reversible blocks.
    fn replay_if_behind(&mut self) -> Result<(), ChainError> {
        let log_head_num = self.block_log.head().map(|b| b.block_num()).unwrap_or(0);
        if log_head_num > self.head.block_num {
            info!(from = self.head.block_num, to = log_head_num, "replaying blocks from log");
            self.replaying = true;
            let mut num = self.head.block_num + 1;
            while let Some(block) = self.block_log.read_block_by_num(num)? {
                self.push_block(block, BlockStatus::Irreversible)?;
                num += 1;
            }
            self.replaying = false;
        }

        let mut num = self.head.block_num + 1;
        while let Some(block) = self.services.state.get_reversible(num)? {
            self.push_block(block, BlockStatus::Validated)?;
            num += 1;
        }
        Ok(())
    }

    fn check_store_consistency(&self) -> Result<(), ChainError> {
        let revision = self.services.state.revision();
        if revision < self.head.block_num as i64 {
            return Err(ChainError::Database(format!(
                "state revision {revision} behind head {}",
                self.head.block_num
            )));
        }
        if let Some(high) = self.services.state.highest_reversible()? {
            if high != self.head.block_num && self.head.block_num > 1 {
                return Err(ChainError::ReversibleBlocks(format!(
                    "reversible store head {high} disagrees with chain head {}",
                    self.head.block_num
                )));
            }
        }
        Ok(())
    }

    /// Shut down cleanly: unwind the stores to the last irreversible block
    /// and keep only the LIB root in the fork-db snapshot. Reversible
    /// blocks stay cached and replay on the next open.
    pub fn close(&mut self) -> Result<(), ChainError> {
        self.abort_block();
        let lib = self.head.irreversible_blocknum().max(1);

        // Unwind reversible frames only; frames at or below the LIB are
        // history and commit instead.
        while self.services.state.open_sessions() > 0
            && self.services.state.revision() > lib as i64
        {
            self.services.state.undo()?;
        }
        self.services.state.commit(lib as i64)?;

        let token_db = self.services.cache.db();
        while token_db.savepoints_size() > 0 && token_db.latest_savepoint_seq()? > lib as i64 {
            token_db.rollback_to_latest_savepoint()?;
        }
        token_db.pop_savepoints(lib as i64 + 1)?;

        // Walk the head chain down to the LIB block and persist it as the
        // snapshot root.
        let mut cursor = Some(self.head.clone());
        while let Some(state) = cursor {
            if state.block_num == lib {
                self.fork_db.reset(state);
                break;
            }
            cursor = self.fork_db.get_block(&state.header.previous).cloned();
        }

        self.fork_db.close()?;
        self.services.state.flush()?;
        self.services.cache.db().close()
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn head_block_num(&self) -> BlockNum {
        self.head.block_num
    }

    pub fn head_block_id(&self) -> Digest {
        self.head.id
    }

    pub fn head_state(&self) -> &BlockState {
        &self.head
    }

    pub fn chain_id(&self) -> Digest {
        self.services.chain_id
    }

    pub fn fork_db(&self) -> &ForkDatabase {
        &self.fork_db
    }

    pub fn block_log(&self) -> &BlockLog {
        &self.block_log
    }

    pub fn pending_block_time(&self) -> Option<i64> {
        self.pending.as_ref().map(|p| p.block_state.header.timestamp.to_unix())
    }

    pub fn last_irreversible_block_num(&self) -> BlockNum {
        self.head.irreversible_blocknum()
    }

    /// TAPOS reference for a client building a transaction against head.
    pub fn ref_block_parts(&self) -> (u16, u32) {
        trx_context::ref_block_parts(&self.head.id)
    }

    fn block_env(&self, pending: &Pending) -> BlockEnv {
        let block_state = &pending.block_state;
        let producer_key = block_state
            .active_schedule
            .producer_key(block_state.header.producer)
            .copied()
            .unwrap_or(self.conf.genesis.initial_key);
        BlockEnv {
            pending_block_time: block_state.header.timestamp.to_unix(),
            head_block_time: self.head.header.timestamp.to_unix(),
            pending_block_num: block_state.block_num,
            producer_signing_key: producer_key,
            active_schedule: Arc::new(block_state.active_schedule.clone()),
            skip_auth_check: !self.conf.force_all_checks
                && matches!(pending.status, BlockStatus::Validated | BlockStatus::Irreversible),
            charge_free_mode: self.conf.charge_free_mode,
            loadtest_mode: self.conf.loadtest_mode,
        }
    }

    // ── Block lifecycle ──────────────────────────────────────────────────────

    pub fn start_block(
        &mut self,
        when: BlockTimestamp,
        confirm_count: u16,
    ) -> Result<(), ChainError> {
        self.start_block_with_status(when, confirm_count, BlockStatus::Incomplete)
    }

    fn start_block_with_status(
        &mut self,
        when: BlockTimestamp,
        confirm_count: u16,
        status: BlockStatus,
    ) -> Result<(), ChainError> {
        if self.pending.is_some() {
            return Err(ChainError::BlockValidate("a pending block is already open".into()));
        }
        let revision = self.services.state.revision();
        if revision != self.head.block_num as i64 {
            return Err(ChainError::Database(format!(
                "state revision {revision} is not on par with head {}",
                self.head.block_num
            )));
        }

        let seq = self.head.block_num as i64 + 1;
        self.services.cache.db().new_savepoint_session(seq)?.accept();
        match self.services.state.start_undo_session(seq) {
            Ok(session) => session.accept(),
            Err(e) => {
                let _ = self.services.cache.db().rollback_to_latest_savepoint();
                return Err(e);
            }
        }

        let (mut block_state, was_pending_promoted) = BlockState::build_next(&self.head, when);
        block_state.header.confirmed = confirm_count;

        // Promote the proposed schedule to pending once its proposal block
        // is irreversible and the pending slot is free.
        let gpo = self.services.state.global_property()?;
        if let (Some(proposed_num), Some(proposed)) =
            (gpo.proposed_schedule_block_num, gpo.proposed_schedule.clone())
        {
            if proposed_num <= block_state.dpos_irreversible_blocknum
                && block_state.pending_schedule.is_none()
                && !was_pending_promoted
            {
                if !self.replaying {
                    info!(
                        proposed_in = proposed_num,
                        block = block_state.block_num,
                        "promoting proposed producer schedule to pending"
                    );
                }
                block_state.set_new_producers(proposed);
                let mut gpo = gpo;
                gpo.proposed_schedule_block_num = None;
                gpo.proposed_schedule = None;
                self.services.state.set_global_property(&gpo)?;
            }
        }

        self.services
            .state
            .clear_expired_trxs(block_state.header.timestamp.to_unix())?;

        self.pending =
            Some(Pending { block_state, out: PendingOut::default(), trxs: Vec::new(), status });
        Ok(())
    }

    pub fn push_transaction(
        &mut self,
        strx: SignedTransaction,
        deadline: Option<Instant>,
    ) -> Result<TransactionTrace, ChainError> {
        let mut pending = self
            .pending
            .take()
            .ok_or_else(|| ChainError::BlockValidate("no pending block".into()))?;
        let env = self.block_env(&pending);

        let trace = trx_context::push_transaction(
            &self.services,
            &env,
            &mut pending.out,
            &strx,
            TrxKind::Input,
            deadline,
        );

        if !trace.failed() {
            self.unapplied_transactions.remove(&trace.signed_id);
            pending.trxs.push(strx.clone());
            self.pending = Some(pending);
            emit(&self.signals.accepted_transaction, &strx)?;
            emit(&self.signals.applied_transaction, &trace)?;
        } else {
            if !trace.except.as_ref().unwrap().is_subjective() {
                self.unapplied_transactions.remove(&trace.signed_id);
            }
            self.pending = Some(pending);
            emit(&self.signals.applied_transaction, &trace)?;
        }
        Ok(trace)
    }

    pub fn finalize_block(&mut self) -> Result<(), ChainError> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| ChainError::BlockValidate("no pending block to finalize".into()))?;

        let action_digests = pending.out.actions.iter().map(|a| a.digest()).collect();
        let trx_digests = pending.out.receipts.iter().map(|r| r.digest()).collect();
        pending.block_state.header.action_mroot = merkle(action_digests);
        pending.block_state.header.transaction_mroot = merkle(trx_digests);

        let id = pending.block_state.header.id();
        pending.block_state.id = id;
        pending.block_state.block = SignedBlock {
            header: pending.block_state.header.clone(),
            producer_signature: Signature { rs: [0; 64], recovery: 0 },
            transactions: pending.out.receipts.clone(),
        };

        // TAPOS ring slot for this block.
        let slot = (pending.block_state.block_num & 0xffff) as u16;
        self.services.state.set_block_summary(slot, &id)?;
        Ok(())
    }

    pub fn sign_block<F>(&mut self, signer: F) -> Result<(), ChainError>
    where
        F: FnOnce(&Digest) -> Signature,
    {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| ChainError::BlockValidate("no pending block to sign".into()))?;
        let signature = signer(&pending.block_state.id);
        pending.block_state.block.producer_signature = signature;
        pending.block_state.verify_signature()?;
        Ok(())
    }

    pub fn commit_block(&mut self) -> Result<(), ChainError> {
        self.commit_block_impl(true)
    }

    fn commit_block_impl(&mut self, add_to_fork_db: bool) -> Result<(), ChainError> {
        let mut pending = self
            .pending
            .take()
            .ok_or_else(|| ChainError::BlockValidate("no pending block to commit".into()))?;

        let result = (|| -> Result<(), ChainError> {
            if add_to_fork_db {
                pending.block_state.validated = true;
                pending.block_state.in_current_chain = true;
                let new_head = self.fork_db.add_state(pending.block_state.clone())?;
                emit(&self.signals.accepted_block_header, &new_head)?;
                if new_head.id != self.fork_db.head().map(|h| h.id).unwrap_or_default() {
                    return Err(ChainError::ForkDatabase(
                        "committed block did not become the fork database head".into(),
                    ));
                }
                self.head = new_head;
            } else {
                pending.block_state.in_current_chain = true;
                self.head = pending.block_state.clone();
            }

            if !self.replaying {
                self.services.state.put_reversible(&self.head.block)?;
            }
            emit(&self.signals.accepted_block, &self.head)?;
            Ok(())
        })();

        match result {
            Ok(()) => self.advance_irreversibility(),
            Err(e) => {
                // Manual abort: the pending state was already detached.
                for trx in pending.trxs {
                    self.unapplied_transactions.insert(trx.signed_id(), trx);
                }
                if let Err(undo_err) = self.services.state.undo() {
                    error!(error = %undo_err, "state rollback failed during commit abort");
                }
                if let Err(undo_err) = self.services.cache.db().rollback_to_latest_savepoint() {
                    error!(error = %undo_err, "token rollback failed during commit abort");
                }
                Err(e)
            }
        }
    }

    /// Drop the pending block. Its transactions return to the unapplied
    /// set; both stores unwind to the pre-block savepoints.
    pub fn abort_block(&mut self) {
        if let Some(pending) = self.pending.take() {
            for trx in pending.trxs {
                self.unapplied_transactions.insert(trx.signed_id(), trx);
            }
            if let Err(e) = self.services.state.undo() {
                error!(error = %e, "state rollback failed during abort");
            }
            if let Err(e) = self.services.cache.db().rollback_to_latest_savepoint() {
                error!(error = %e, "token database rollback failed during abort");
            }
        }
    }

    // ── External blocks & forks ──────────────────────────────────────────────

    pub fn push_block(&mut self, block: SignedBlock, status: BlockStatus) -> Result<(), ChainError> {
        if self.pending.is_some() {
            return Err(ChainError::BlockValidate(
                "cannot push a block while one is pending".into(),
            ));
        }
        if status == BlockStatus::Incomplete {
            return Err(ChainError::BlockValidate("invalid status for a completed block".into()));
        }
        emit(&self.signals.pre_accepted_block, &block)?;

        let trust = !self.conf.force_all_checks
            && matches!(status, BlockStatus::Irreversible | BlockStatus::Validated);
        let new_state = self.fork_db.add(block, trust)?;
        emit(&self.signals.accepted_block_header, &new_state)?;

        self.maybe_switch_forks(status)
    }

    /// External BFT finality: enough header confirmations accumulated on a
    /// block to pin it irreversible ahead of the DPoS horizon.
    pub fn push_confirmation(&mut self, block_id: Digest) -> Result<(), ChainError> {
        if self.pending.is_some() {
            return Err(ChainError::BlockValidate(
                "cannot push a confirmation while a block is pending".into(),
            ));
        }
        self.fork_db.mark_bft_irreversible(&block_id);
        // Our head clone needs the refreshed BFT number too.
        if let Some(h) = self.fork_db.get_block(&self.head.id) {
            self.head = h.clone();
        }
        emit(&self.signals.accepted_confirmation, &block_id)?;
        self.advance_irreversibility()
    }

    fn maybe_switch_forks(&mut self, status: BlockStatus) -> Result<(), ChainError> {
        let Some(new_head) = self.fork_db.head().cloned() else {
            return Ok(());
        };

        if new_head.header.previous == self.head.id {
            // The common case: the new block extends the current chain.
            match self.apply_block(&new_head.block, status) {
                Ok(()) => {
                    self.fork_db.mark_in_current_chain(&new_head.id, true);
                    self.fork_db.set_validity(&new_head.id, true);
                    self.head = self.fork_db.get_block(&new_head.id).cloned().unwrap_or(new_head);
                    self.advance_irreversibility()?;
                    Ok(())
                }
                Err(e) => {
                    self.fork_db.set_validity(&new_head.id, false);
                    Err(e)
                }
            }
        } else if new_head.id != self.head.id {
            info!(
                from = %self.head.id,
                from_num = self.head.block_num,
                to = %new_head.id,
                to_num = new_head.block_num,
                "switching forks"
            );
            let (new_branch, old_branch) =
                self.fork_db.fetch_branch_from(&new_head.id, &self.head.id)?;

            // Unwind our side back to the fork point.
            for state in &old_branch {
                self.fork_db.mark_in_current_chain(&state.id, false);
                self.pop_block()?;
            }
            let fork_point = old_branch
                .last()
                .map(|s| s.header.previous)
                .unwrap_or(self.head.id);
            if self.head.id != fork_point {
                return Err(ChainError::ForkDatabase(
                    "lost sync between fork database and chain state during switch".into(),
                ));
            }

            // Apply the new side tip-last.
            for (i, state) in new_branch.iter().rev().enumerate() {
                let apply_status =
                    if state.validated { BlockStatus::Validated } else { BlockStatus::Complete };
                match self.apply_block(&state.block, apply_status) {
                    Ok(()) => {
                        self.head = state.clone();
                        self.fork_db.mark_in_current_chain(&state.id, true);
                        self.fork_db.set_validity(&state.id, true);
                    }
                    Err(e) => {
                        error!(block = %state.id, error = %e, "fork switch failed; reverting");
                        // Marking invalid removes the offending subtree.
                        self.fork_db.set_validity(&state.id, false);

                        // Pop what we applied from the bad branch.
                        for applied in new_branch.iter().rev().take(i) {
                            self.fork_db.mark_in_current_chain(&applied.id, false);
                            self.pop_block()?;
                        }
                        if self.head.id != fork_point {
                            return Err(ChainError::ForkDatabase(
                                "lost sync during fork switch reversal".into(),
                            ));
                        }
                        // Re-apply the previously current branch.
                        for state in old_branch.iter().rev() {
                            self.apply_block(&state.block, BlockStatus::Validated)?;
                            self.head = self
                                .fork_db
                                .get_block(&state.id)
                                .cloned()
                                .unwrap_or_else(|| state.clone());
                            self.fork_db.mark_in_current_chain(&state.id, true);
                        }
                        return Err(e);
                    }
                }
            }
            info!(head = %self.head.id, "fork switch complete");
            self.advance_irreversibility()?;
            Ok(())
        } else {
            Ok(())
        }
    }

    fn apply_block(&mut self, block: &SignedBlock, status: BlockStatus) -> Result<(), ChainError> {
        let result = (|| -> Result<(), ChainError> {
            self.start_block_with_status(block.header.timestamp, block.header.confirmed, status)?;

            for receipt in &block.transactions {
                match receipt.type_ {
                    jmzk_core::block::TrxType::Input => {
                        let trace = {
                            let mut pending = self.pending.take().unwrap();
                            let env = self.block_env(&pending);
                            let trace = trx_context::push_transaction(
                                &self.services,
                                &env,
                                &mut pending.out,
                                &receipt.trx,
                                TrxKind::Input,
                                None,
                            );
                            pending.trxs.push(receipt.trx.clone());
                            self.pending = Some(pending);
                            trace
                        };
                        if let Some(e) = trace.except {
                            return Err(e);
                        }
                    }
                    // Suspend receipts re-execute inside their parent
                    // transaction, never standalone.
                    jmzk_core::block::TrxType::Suspend => continue,
                }
            }

            self.finalize_block()?;

            let pending = self.pending.as_mut().unwrap();
            if block.id() != pending.block_state.id {
                return Err(ChainError::BlockValidate(format!(
                    "block id mismatch: produced {} expected {}",
                    pending.block_state.id,
                    block.id()
                )));
            }
            // The fork database already checked this signature if the
            // block was untrusted.
            pending.block_state.block.producer_signature = block.producer_signature;

            self.commit_block_impl(false)
        })();

        if let Err(e) = result {
            self.abort_block();
            return Err(e);
        }
        Ok(())
    }

    fn pop_block(&mut self) -> Result<(), ChainError> {
        let prev = self
            .fork_db
            .get_block(&self.head.header.previous)
            .cloned()
            .ok_or_else(|| {
                ChainError::ForkDatabase("attempt to pop beyond the last irreversible block".into())
            })?;

        self.services.state.remove_reversible(self.head.block_num)?;
        for receipt in &self.head.block.transactions {
            self.unapplied_transactions
                .insert(receipt.trx.signed_id(), receipt.trx.clone());
        }

        self.head = prev;
        self.services.state.undo()?;
        self.services.cache.db().rollback_to_latest_savepoint()?;
        Ok(())
    }

    /// When the LIB advances: commit savepoints, append to the block log,
    /// prune reversible rows, and tell the observers.
    fn advance_irreversibility(&mut self) -> Result<(), ChainError> {
        let newly = self.fork_db.advance_lib();
        for state in newly {
            self.services.state.commit(state.block_num as i64)?;
            self.services.cache.db().pop_savepoints(state.block_num as i64)?;

            let log_head = self.block_log.head().map(|b| b.block_num()).unwrap_or(0);
            if state.block_num > log_head {
                if state.block_num != log_head + 1 {
                    return Err(ChainError::UnlinkableBlock(format!(
                        "irreversible block {} does not follow log head {log_head}",
                        state.block_num
                    )));
                }
                self.block_log.append(state.block.clone())?;
            }
            self.services.state.remove_reversible_upto(state.block_num)?;
            emit(&self.signals.irreversible_block, &state)?;
        }
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "controller close failed");
        }
    }
}
