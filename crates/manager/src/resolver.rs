//! Conflict resolution for committed locks.
//!
//! A freshly committed lock can contradict three things: a mempool
//! transaction spending one of its inputs (evict it), a mined but
//! non-ChainLocked block containing such a transaction (invalidate the
//! block), or a ChainLocked block (the lock loses: prune it and every
//! chained lock built on it). Full confirmation and keep-lock expiry of
//! old locks also live here.

use crate::manager::InstantSendManager;
use instantlock_types::{input_lock_request_id, BlockRef, Hash, InstantSendLock, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl InstantSendManager {
    /// Evict mempool transactions spending any input of a committed lock
    /// under a different txid, then ask peers for the locked transaction.
    pub(crate) fn remove_mempool_conflicts(&self, hash: Hash, lock: &InstantSendLock) {
        let mut to_delete: HashMap<Hash, Arc<Transaction>> = HashMap::new();

        for input in &lock.inputs {
            let Some(spender_txid) = self.mempool().spender_of(input) else {
                continue;
            };
            if spender_txid == lock.txid {
                continue;
            }
            if let Some(tx) = self.mempool().get(&spender_txid) {
                info!(
                    txid = %lock.txid,
                    lock = %hash,
                    conflicting = %spender_txid,
                    %input,
                    "mempool transaction conflicts with lock"
                );
                to_delete.insert(spender_txid, tx);
            }
        }

        if to_delete.is_empty() {
            return;
        }

        for txid in to_delete.keys() {
            self.mempool().remove_recursive(txid);
        }

        {
            let mut inner = self.inner.lock();
            for tx in to_delete.values() {
                inner.remove_conflicted(tx);
            }
        }

        // Peers that relayed a conflicting version still hold the locked
        // transaction; ask them to re-offer it.
        self.network().ask_peers_for_transaction(lock.txid);
    }

    /// React to mined transactions conflicting with a committed lock.
    ///
    /// A ChainLocked conflict wins over the lock: the lock and its chained
    /// descendants are pruned. Any other conflicting block is invalidated
    /// and the best chain re-activated; failure of either is fatal.
    pub(crate) fn resolve_block_conflicts(&self, hash: Hash, lock: &InstantSendLock) {
        // Collect non-locked, mined conflictors grouped by block.
        let conflicts: HashMap<BlockRef, HashMap<Hash, Arc<Transaction>>> = {
            let inner = self.inner.lock();
            let mut conflicts: HashMap<BlockRef, HashMap<Hash, Arc<Transaction>>> = HashMap::new();
            for input in &lock.inputs {
                let Some(conflict_txid) = inner.tracker.spender_of(input) else {
                    continue;
                };
                if conflict_txid == lock.txid {
                    continue;
                }
                let Some(info) = inner.tracker.get(&conflict_txid) else {
                    continue;
                };
                let (Some(mined), Some(tx)) = (info.mined_block, info.tx.clone()) else {
                    continue;
                };
                info!(
                    txid = %lock.txid,
                    lock = %hash,
                    conflicting = %conflict_txid,
                    %input,
                    block = %mined.hash,
                    "mined transaction conflicts with lock"
                );
                conflicts.entry(mined).or_default().insert(conflict_txid, tx);
            }
            conflicts
        };

        if conflicts.is_empty() {
            return;
        }

        // A conflict mined into a ChainLocked block leaves no choice:
        // individual locks are sacrificed rather than whole ChainLocks.
        let has_chain_locked_conflict = conflicts
            .keys()
            .any(|block| self.chain().has_chain_lock(block.height, &block.hash));
        if has_chain_locked_conflict {
            warn!(
                txid = %lock.txid,
                lock = %hash,
                "conflicting transaction already chainlocked, pruning the lock"
            );
            self.remove_conflicting_lock(hash, lock);
            return;
        }

        if !self.toggles().reject_conflicting_blocks() {
            return;
        }

        let mut activate_best_chain = false;
        for (block, txs) in &conflicts {
            {
                let mut inner = self.inner.lock();
                for tx in txs.values() {
                    inner.remove_conflicted(tx);
                }
            }

            warn!(block = %block.hash, height = block.height, "invalidating block conflicting with lock");
            if !self.chain().invalidate_block(&block.hash) {
                // Not a state we can safely continue from.
                panic!("failed to invalidate block conflicting with a lock");
            }
            activate_best_chain = true;
        }

        if activate_best_chain && !self.chain().activate_best_chain() {
            panic!("failed to activate best chain after invalidating a conflicting block");
        }
    }

    /// Prune a lock that lost a conflict, together with every chained
    /// lock spending its outputs, archiving all of them at the tip.
    pub(crate) fn remove_conflicting_lock(&self, hash: Hash, lock: &InstantSendLock) {
        warn!(
            txid = %lock.txid,
            lock = %hash,
            "removing lock and its chained children"
        );
        let tip_height = self.chain().tip().height;
        let removed = self.store().remove_chained(hash, lock.txid, tip_height);
        for removed_hash in &removed {
            info!(lock = %hash, removed = %removed_hash, "removed chained lock");
        }
    }

    /// A block (and everything below it) became fully confirmed, either
    /// via a ChainLock or by sinking `keep_lock_blocks` deep.
    ///
    /// Locks mined at or below it are removed and archived, their
    /// recovered signatures dropped, old archive entries aged out, and
    /// tracked transactions mined into its ancestry untracked (children
    /// queued for retry).
    pub(crate) fn handle_fully_confirmed(&self, index: &BlockRef) {
        if !self.toggles().instant_send_enabled() {
            return;
        }

        let removed = self.store().remove_confirmed_up_to(index.height);

        {
            let mut inner = self.inner.lock();
            for (hash, lock) in &removed {
                debug!(txid = %lock.txid, lock = %hash, "lock fully confirmed, removed");
                for input in &lock.inputs {
                    inner.input_request_ids.remove(&input_lock_request_id(input));
                }
            }
        }

        // All inputs are spent for good now; no conflict can arise
        // anymore, so none of the recovered sigs are worth keeping.
        if let Some(llmq_type) = self.config().llmq_type {
            for lock in removed.values() {
                for input in &lock.inputs {
                    self.signer()
                        .truncate_recovered_sig(llmq_type, &input_lock_request_id(input));
                }
                self.signer()
                    .truncate_recovered_sig(llmq_type, &lock.request_id());
            }
        }

        self.store().remove_archived_up_to(
            index
                .height
                .saturating_sub(self.config().archive_retention_blocks),
        );

        // Untrack transactions mined into the confirmed ancestry.
        let chain = Arc::clone(self.chain_handle());
        let confirmed = *index;
        let mut inner = self.inner.lock();
        inner.tracker.prune_confirmed(move |mined| {
            chain
                .ancestor(&confirmed, mined.height)
                .is_some_and(|ancestor| ancestor.hash == mined.hash)
        });
    }
}
