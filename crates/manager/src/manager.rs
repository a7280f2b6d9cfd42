//! The lock manager state machine.
//!
//! Decides when to vote on a transaction's inputs, assembles input-lock
//! signatures into a transaction lock, reacts to locks produced by peers,
//! and drives conflict resolution when a committed lock contradicts the
//! mempool or the chain.
//!
//! # Locking
//!
//! A single mutex guards the in-memory protocol state (`ManagerInner`).
//! The lock store has its own commit lock, which may be taken while the
//! manager mutex is held, never the reverse. No collaborator that can
//! mutate chain or mempool state, relay to peers, or enqueue signing work
//! is ever called while the manager mutex is held.

use crate::config::InstantSendConfig;
use crate::pending::{CreatingLocks, LockDraft, PendingLocks};
use crate::tracker::TxTracker;
use crate::traits::{
    ChainView, LockNotifier, MempoolView, PeerNetwork, RuntimeToggles, SigningService,
};
use instantlock_store::LockStore;
use instantlock_types::{
    input_lock_request_id, Block, BlockRef, Hash, InstantSendLock, LlmqType, OutPoint, RecoveredSig,
    Transaction,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// In-memory protocol state, guarded by the manager mutex.
pub(crate) struct ManagerInner {
    /// Request ids of input votes this node has issued.
    pub(crate) input_request_ids: HashSet<Hash>,
    /// Locks being assembled, awaiting their threshold signature.
    pub(crate) creating: CreatingLocks,
    /// Received locks queued for batch verification.
    pub(crate) pending: PendingLocks,
    /// Non-locked transactions and the retry queue.
    pub(crate) tracker: TxTracker,
}

impl ManagerInner {
    /// Forget a transaction that was evicted as conflicted: untrack it
    /// without retrying children and drop its input vote ids.
    pub(crate) fn remove_conflicted(&mut self, tx: &Transaction) {
        self.tracker.remove(&tx.txid(), false);
        for input in &tx.inputs {
            self.input_request_ids.remove(&input_lock_request_id(input));
        }
    }
}

/// The InstantSend lock manager.
///
/// All chain, mempool, signing, and peer capabilities are injected
/// collaborator handles; the manager owns only the lock store and its
/// protocol state.
pub struct InstantSendManager {
    config: InstantSendConfig,
    store: Arc<LockStore>,
    signer: Arc<dyn SigningService>,
    chain: Arc<dyn ChainView>,
    mempool: Arc<dyn MempoolView>,
    network: Arc<dyn PeerNetwork>,
    notifier: Arc<dyn LockNotifier>,
    toggles: Arc<dyn RuntimeToggles>,
    pub(crate) inner: Mutex<ManagerInner>,
    upgraded_db: AtomicBool,
}

impl InstantSendManager {
    /// Create a manager wired to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: InstantSendConfig,
        store: Arc<LockStore>,
        signer: Arc<dyn SigningService>,
        chain: Arc<dyn ChainView>,
        mempool: Arc<dyn MempoolView>,
        network: Arc<dyn PeerNetwork>,
        notifier: Arc<dyn LockNotifier>,
        toggles: Arc<dyn RuntimeToggles>,
    ) -> Self {
        Self {
            config,
            store,
            signer,
            chain,
            mempool,
            network,
            notifier,
            toggles,
            inner: Mutex::new(ManagerInner {
                input_request_ids: HashSet::new(),
                creating: CreatingLocks::default(),
                pending: PendingLocks::default(),
                tracker: TxTracker::new(),
            }),
            upgraded_db: AtomicBool::new(false),
        }
    }

    /// The manager configuration.
    pub fn config(&self) -> &InstantSendConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &LockStore {
        &self.store
    }

    pub(crate) fn signer(&self) -> &dyn SigningService {
        &*self.signer
    }

    pub(crate) fn chain(&self) -> &dyn ChainView {
        &*self.chain
    }

    pub(crate) fn chain_handle(&self) -> &Arc<dyn ChainView> {
        &self.chain
    }

    pub(crate) fn mempool(&self) -> &dyn MempoolView {
        &*self.mempool
    }

    pub(crate) fn network(&self) -> &dyn PeerNetwork {
        &*self.network
    }

    pub(crate) fn notifier(&self) -> &dyn LockNotifier {
        &*self.notifier
    }

    pub(crate) fn toggles(&self) -> &dyn RuntimeToggles {
        &*self.toggles
    }

    // ─── Mempool and block lifecycle ────────────────────────────────────

    /// A transaction entered the mempool.
    pub fn transaction_added_to_mempool(&self, tx: &Arc<Transaction>) {
        if !self.toggles.instant_send_enabled()
            || !self.toggles.is_blockchain_synced()
            || tx.is_inputless()
        {
            return;
        }

        let txid = tx.txid();
        match self.store.lock_by_txid(&txid) {
            None => {
                self.process_tx(tx, false);
                self.inner.lock().tracker.add(Arc::clone(tx), None);
            }
            Some(lock) => {
                {
                    self.inner.lock().tracker.remove(&txid, true);
                }
                // The lock arrived before the transaction. The first
                // announcement could not match peer filters without the
                // body, and the downstream notification was impossible;
                // both are retried now that the body is known.
                self.network
                    .relay_inv_filtered(lock.inv(), tx, lock.min_proto_version());
                debug!(%txid, "notifying about an earlier received lock");
                self.notifier.notify_transaction_lock(tx, &lock);
            }
        }
    }

    /// A transaction left the mempool for a reason other than inclusion
    /// in a block. A committed lock for it has lost; remove it and every
    /// chained lock building on it.
    pub fn transaction_removed_from_mempool(&self, tx: &Transaction) {
        if tx.is_inputless() || !self.upgraded_db.load(Ordering::Acquire) {
            return;
        }

        let txid = tx.txid();
        let Some(lock) = self.store.lock_by_txid(&txid) else {
            return;
        };

        debug!(%txid, "locked transaction was removed from mempool");
        self.remove_conflicting_lock(lock.hash(), &lock);
    }

    /// A block was connected to the active chain. `conflicted` carries
    /// mempool transactions the block evicted as conflicting.
    pub fn block_connected(&self, block: &Block, index: &BlockRef, conflicted: &[Arc<Transaction>]) {
        if !self.toggles.instant_send_enabled() {
            return;
        }

        if !conflicted.is_empty() {
            let mut inner = self.inner.lock();
            for tx in conflicted {
                inner.remove_conflicted(tx);
            }
        }

        if self.toggles.is_blockchain_synced() {
            let chain_locked = self.chain.has_chain_lock(index.height, &index.hash);
            for tx in &block.transactions {
                if tx.is_inputless() {
                    continue;
                }

                let txid = tx.txid();
                if !self.is_locked_internal(&txid) && !chain_locked {
                    // Retroactive: sign even when mempool signing is off,
                    // so the block can still be ChainLocked.
                    self.process_tx(tx, true);
                    self.inner.lock().tracker.add(Arc::clone(tx), Some(*index));
                } else {
                    self.inner.lock().tracker.remove(&txid, true);
                }
            }
        }

        self.store.write_block_mined(block, index.height);
    }

    /// A block was disconnected from the active chain.
    pub fn block_disconnected(&self, block: &Block, index: &BlockRef) {
        self.store.remove_block_mined(block, index.height);
    }

    /// The chain tip advanced.
    pub fn updated_block_tip(&self, tip: &BlockRef) {
        if !self.upgraded_db.load(Ordering::Acquire) && self.toggles.db_upgrade_active(tip) {
            let chain = Arc::clone(&self.chain);
            self.store
                .upgrade(&move |txid| chain.transaction(txid).is_some());
            self.upgraded_db.store(true, Ordering::Release);
        }

        let dip0008_active = tip.height > 0 && tip.height - 1 >= self.config.dip0008_height;
        if self.toggles.chain_locks_enabled() && dip0008_active {
            // Keep all locks; ChainLock notifications drive expiry.
            return;
        }

        let confirmed_height = tip.height.saturating_sub(self.config.keep_lock_blocks);
        if let Some(confirmed) = self.chain.ancestor(tip, confirmed_height) {
            self.handle_fully_confirmed(&confirmed);
        }
    }

    /// A block became ChainLocked.
    pub fn notify_chain_lock(&self, index: &BlockRef) {
        self.handle_fully_confirmed(index);
    }

    // ─── Voting ─────────────────────────────────────────────────────────

    /// Attempt to lock a transaction: vote on its inputs and, once all
    /// input locks exist, request the transaction lock signature.
    ///
    /// `retroactive` marks transactions seen in a connected block rather
    /// than the mempool; they are signed even when mempool signing is
    /// disabled, and prior input votes are allowed to be re-issued.
    pub(crate) fn process_tx(&self, tx: &Arc<Transaction>, retroactive: bool) {
        if !self.toggles.is_masternode() || !self.toggles.is_blockchain_synced() {
            return;
        }
        let Some(llmq_type) = self.config.llmq_type else {
            return;
        };

        let txid = tx.txid();
        if !self.check_can_lock(tx, true) {
            debug!(%txid, "transaction is not lockable");
            return;
        }

        if let Some(conflicting) = self.conflicting_lock_internal(tx) {
            warn!(
                %txid,
                conflicting_lock = %conflicting.hash(),
                conflicting_txid = %conflicting.txid,
                "transaction conflicts with an existing lock"
            );
            return;
        }

        if !self.toggles.mempool_signing_enabled() && !retroactive {
            return;
        }

        if !self.try_sign_input_locks(tx, retroactive, llmq_type) {
            return;
        }

        // All input locks may already exist if they arrived before the
        // transaction body did; in that case the lock is signable now.
        self.try_sign_lock(tx, llmq_type);
    }

    /// Issue input-lock signing requests for every input of `tx`.
    ///
    /// Returns false when any input already carries a vote for a different
    /// transaction or a conflicting signing session exists.
    fn try_sign_input_locks(
        &self,
        tx: &Transaction,
        retroactive: bool,
        llmq_type: LlmqType,
    ) -> bool {
        let txid = tx.txid();
        let ids: Vec<Hash> = tx.inputs.iter().map(input_lock_request_id).collect();

        let mut already_voted = 0usize;
        for (input, id) in tx.inputs.iter().zip(ids.iter()) {
            if let Some(other_txid) = self.signer.vote_for_id(llmq_type, id) {
                if other_txid != txid {
                    warn!(
                        %txid,
                        %input,
                        other = %other_txid,
                        "input conflicts with a previous vote"
                    );
                    return false;
                }
                already_voted += 1;
            }

            // Don't even try the actual signing if any input conflicts.
            if self.signer.is_conflicting(llmq_type, id, &txid) {
                warn!(%txid, request_id = %id, "conflicting signing session for input");
                return false;
            }
        }

        if !retroactive && already_voted == ids.len() {
            debug!(%txid, "already voted on all inputs");
            return true;
        }

        debug!(%txid, inputs = tx.inputs.len(), "voting on inputs");
        {
            let mut inner = self.inner.lock();
            for id in &ids {
                inner.input_request_ids.insert(*id);
            }
        }

        for (input, id) in tx.inputs.iter().zip(ids.iter()) {
            trace!(%txid, %input, request_id = %id, retroactive, "requesting input lock");
            if self
                .signer
                .async_sign_if_member(llmq_type, *id, txid, retroactive)
            {
                debug!(%txid, %input, request_id = %id, "voted on input");
            }
        }

        true
    }

    /// Whether a transaction is currently lockable.
    ///
    /// Every input must either spend an already-locked transaction, or
    /// spend a mined transaction that is out of the mempool and either
    /// buried `confirmations_required` deep or in a ChainLocked block.
    pub(crate) fn check_can_lock(&self, tx: &Transaction, log: bool) -> bool {
        if tx.inputs.is_empty() {
            // Inputless transactions (e.g. quorum commitments) can't be
            // locked.
            return false;
        }

        let txid = tx.txid();
        let tip_height = self.chain.tip().height;
        tx.inputs
            .iter()
            .all(|input| self.check_can_lock_input(input, log, &txid, tip_height))
    }

    fn check_can_lock_input(
        &self,
        outpoint: &OutPoint,
        log: bool,
        txid: &Hash,
        tip_height: u32,
    ) -> bool {
        if self.is_locked_internal(&outpoint.txid) {
            // A locked parent allows locking descendants regardless of
            // where the parent is.
            return true;
        }

        if self.mempool.contains(&outpoint.txid) {
            if log {
                debug!(%txid, parent = %outpoint.txid, "parent is in mempool and not locked");
            }
            return false;
        }

        let Some((_, Some(block_hash))) = self.chain.transaction(&outpoint.txid) else {
            if log {
                debug!(%txid, parent = %outpoint.txid, "failed to find parent transaction");
            }
            return false;
        };
        let Some(mined) = self.chain.block_by_hash(&block_hash) else {
            return false;
        };

        let tx_age = tip_height.saturating_sub(mined.height) + 1;
        if tx_age < self.config.confirmations_required
            && !self.chain.has_chain_lock(mined.height, &mined.hash)
        {
            if log {
                debug!(
                    %txid,
                    %outpoint,
                    tx_age,
                    required = self.config.confirmations_required,
                    "parent output too new and not chainlocked"
                );
            }
            return false;
        }

        true
    }

    /// Build and request the transaction lock once every input has a
    /// recovered input-lock signature.
    pub(crate) fn try_sign_lock(&self, tx: &Transaction, llmq_type: LlmqType) {
        let txid = tx.txid();
        for input in &tx.inputs {
            let id = input_lock_request_id(input);
            if !self.signer.has_recovered_sig(llmq_type, &id, &txid) {
                return;
            }
        }

        debug!(%txid, "got all input locks, drafting transaction lock");

        let tip = self.chain.tip();
        let cycle_height = tip.height - tip.height % self.config.dkg_interval;
        let Some(cycle) = self.chain.block_at_height(cycle_height) else {
            return;
        };

        let draft = LockDraft::deterministic(txid, tx.inputs.clone(), cycle.hash);
        let id = draft.request_id();

        if self.signer.has_recovered_sig_for_id(llmq_type, &id) {
            // Signing session already finished (possibly for another tx
            // spending the same inputs).
            return;
        }

        {
            let mut inner = self.inner.lock();
            if !inner.creating.insert(id, draft) {
                return;
            }
        }

        self.signer.async_sign_if_member(llmq_type, id, txid, false);
    }

    // ─── Recovered signatures ───────────────────────────────────────────

    /// Callback from the signing service: a threshold signature was
    /// recovered for a session this node participates in.
    pub fn handle_new_recovered_sig(&self, sig: &RecoveredSig) {
        if !self.toggles.instant_send_enabled() {
            return;
        }
        let Some(llmq_type) = self.config.llmq_type else {
            return;
        };

        let (input_lock_txid, is_lock_sig) = {
            let inner = self.inner.lock();
            (
                inner
                    .input_request_ids
                    .contains(&sig.id)
                    .then_some(sig.msg_hash),
                inner.creating.contains_id(&sig.id),
            )
        };

        if let Some(txid) = input_lock_txid {
            self.handle_input_lock_sig(llmq_type, sig, txid);
        } else if is_lock_sig {
            self.handle_lock_sig(sig);
        }
    }

    /// An input lock was recovered: re-fetch the transaction and see
    /// whether the transaction lock is now signable.
    fn handle_input_lock_sig(&self, llmq_type: LlmqType, sig: &RecoveredSig, txid: Hash) {
        let Some((tx, _)) = self.chain.transaction(&txid) else {
            return;
        };

        trace!(%txid, request_id = %sig.id, "got recovered input lock signature");
        self.try_sign_lock(&tx, llmq_type);
    }

    /// The transaction lock signature was recovered: finalize the draft
    /// and queue it through the same verification pipeline as peer locks.
    fn handle_lock_sig(&self, sig: &RecoveredSig) {
        let draft = { self.inner.lock().creating.take(&sig.id) };
        let Some(draft) = draft else {
            return;
        };

        if draft.txid() != sig.msg_hash {
            warn!(
                txid = %draft.txid(),
                winner = %sig.msg_hash,
                "own lock lost the signing session, dropping"
            );
            return;
        }

        let lock = Arc::new(draft.into_lock(sig.signature));
        let hash = lock.hash();

        let mut inner = self.inner.lock();
        if inner.pending.contains(&hash) || self.store.known_lock(&hash) {
            return;
        }
        inner.pending.insert(hash, instantlock_types::PeerId::LOCAL, lock);
    }

    // ─── Retry queue ────────────────────────────────────────────────────

    /// Re-attempt locking for every queued retry candidate that is still
    /// unlocked, conflict-free, and not mid-signing. Driven by the worker.
    pub fn process_pending_retries(&self) {
        let retry_txs = { self.inner.lock().tracker.take_retries() };
        if retry_txs.is_empty() {
            return;
        }
        if !self.toggles.instant_send_enabled() {
            return;
        }

        let mut retried = 0usize;
        for txid in retry_txs {
            let tx = {
                let inner = self.inner.lock();
                match inner.tracker.get(&txid).and_then(|info| info.tx.clone()) {
                    Some(tx) => {
                        if inner.creating.contains_txid(&txid) {
                            // Already in the middle of locking this one.
                            None
                        } else if self.is_locked_internal(&txid) {
                            None
                        } else if self.conflicting_lock_internal(&tx).is_some() {
                            None
                        } else {
                            Some(tx)
                        }
                    }
                    None => None,
                }
            };
            let Some(tx) = tx else {
                continue;
            };

            trace!(%txid, "retrying lock attempt");
            self.process_tx(&tx, false);
            retried += 1;
        }

        if retried > 0 {
            let tracked = self.inner.lock().tracker.len();
            debug!(retried, tracked, "retried lock attempts");
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Whether a transaction has a committed (or archived) lock.
    pub fn is_locked(&self, txid: &Hash) -> bool {
        if !self.toggles.instant_send_enabled() {
            return false;
        }
        self.is_locked_internal(txid)
    }

    pub(crate) fn is_locked_internal(&self, txid: &Hash) -> bool {
        match self.store.lock_hash_by_txid(txid) {
            Some(hash) => self.store.known_lock(&hash),
            None => false,
        }
    }

    /// The committed lock for a transaction, if any.
    pub fn lock_by_txid(&self, txid: &Hash) -> Option<Arc<InstantSendLock>> {
        if !self.toggles.instant_send_enabled() {
            return None;
        }
        self.store.lock_by_txid(txid)
    }

    /// The committed lock with the given canonical hash, if any.
    pub fn lock_by_hash(&self, hash: &Hash) -> Option<Arc<InstantSendLock>> {
        if !self.toggles.instant_send_enabled() {
            return None;
        }
        self.store.lock_by_hash(hash)
    }

    /// The lock hash covering a transaction, if any.
    pub fn lock_hash_by_txid(&self, txid: &Hash) -> Option<Hash> {
        if !self.toggles.instant_send_enabled() {
            return None;
        }
        self.store.lock_hash_by_txid(txid)
    }

    /// A committed lock whose input set intersects this transaction's
    /// inputs under a different txid, if any.
    pub fn conflicting_lock(&self, tx: &Transaction) -> Option<Arc<InstantSendLock>> {
        if !self.toggles.instant_send_enabled() {
            return None;
        }
        self.conflicting_lock_internal(tx)
    }

    pub(crate) fn conflicting_lock_internal(&self, tx: &Transaction) -> Option<Arc<InstantSendLock>> {
        let txid = tx.txid();
        for input in &tx.inputs {
            if let Some(other) = self.store.lock_by_input(input) {
                if other.txid != txid {
                    return Some(other);
                }
            }
        }
        None
    }

    /// Number of active locks.
    pub fn lock_count(&self) -> usize {
        self.store.count()
    }

    /// Whether a lock inventory item needs no re-request: it is pending
    /// verification, committed, or archived.
    pub fn already_have(&self, hash: &Hash) -> bool {
        if !self.toggles.instant_send_enabled() {
            return true;
        }
        let inner = self.inner.lock();
        inner.pending.contains(hash) || self.store.known_lock(hash)
    }
}
