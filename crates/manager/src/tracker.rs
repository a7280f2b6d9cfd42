//! Tracking of transactions that are not (yet) locked.
//!
//! Every lockable transaction the node sees enters here until it either
//! becomes locked, is evicted as conflicted, or its ancestors reach full
//! confirmation. The tracker also records parent/child edges via spent
//! outpoints, so that locking a parent can queue its children for a retry,
//! and an outpoint reverse index used for mined-conflict detection.

use instantlock_types::{BlockRef, Hash, OutPoint, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// A tracked, non-locked transaction.
#[derive(Debug, Default)]
pub struct NonLockedTx {
    /// Cached transaction body. Absent for parent stubs created before the
    /// parent itself was seen.
    pub tx: Option<Arc<Transaction>>,
    /// Where the transaction was mined, if it came from a connected block.
    pub mined_block: Option<BlockRef>,
    /// Tracked children spending this transaction's outputs.
    pub children: HashSet<Hash>,
}

/// In-memory map of non-locked transactions, their dependency edges, and
/// the retry queue.
#[derive(Debug, Default)]
pub struct TxTracker {
    txs: HashMap<Hash, NonLockedTx>,
    by_outpoint: HashMap<OutPoint, Hash>,
    pending_retries: HashSet<Hash>,
}

impl TxTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a transaction, recording child edges on its parents.
    ///
    /// Parents not yet tracked get stub entries (no body) holding the
    /// child link. Re-adding updates the mined block reference, and
    /// attaches the body and edges if the entry was a stub.
    pub fn add(&mut self, tx: Arc<Transaction>, mined_block: Option<BlockRef>) {
        let txid = tx.txid();
        let body_attached = {
            let entry = self.txs.entry(txid).or_default();
            entry.mined_block = mined_block;
            if entry.tx.is_none() {
                entry.tx = Some(Arc::clone(&tx));
                true
            } else {
                false
            }
        };

        if body_attached {
            for input in &tx.inputs {
                self.txs.entry(input.txid).or_default().children.insert(txid);
                self.by_outpoint.insert(*input, txid);
            }
        }

        trace!(%txid, mined = mined_block.is_some(), "tracking non-locked tx");
    }

    /// Stop tracking a transaction.
    ///
    /// With `retry_children`, its tracked children are queued for a lock
    /// retry (the usual case: the transaction just became locked). Parent
    /// stubs left with no body and no remaining children are garbage
    /// collected.
    pub fn remove(&mut self, txid: &Hash, retry_children: bool) {
        let Some(info) = self.txs.remove(txid) else {
            return;
        };

        let mut retry_count = 0usize;
        if retry_children {
            for child in &info.children {
                self.pending_retries.insert(*child);
                retry_count += 1;
            }
        }

        if let Some(tx) = &info.tx {
            for input in &tx.inputs {
                let mut drop_parent_stub = false;
                if let Some(parent) = self.txs.get_mut(&input.txid) {
                    parent.children.remove(txid);
                    drop_parent_stub = parent.tx.is_none() && parent.children.is_empty();
                }
                if drop_parent_stub {
                    self.txs.remove(&input.txid);
                }
                self.by_outpoint.remove(input);
            }
        }

        trace!(%txid, retry_children, retry_count, "untracked non-locked tx");
    }

    /// Look up a tracked transaction.
    pub fn get(&self, txid: &Hash) -> Option<&NonLockedTx> {
        self.txs.get(txid)
    }

    /// The tracked transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        self.by_outpoint.get(outpoint).copied()
    }

    /// Drain the retry queue.
    pub fn take_retries(&mut self) -> HashSet<Hash> {
        std::mem::take(&mut self.pending_retries)
    }

    /// Number of tracked transactions (including parent stubs).
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Drop every tracked transaction whose mined block satisfies
    /// `is_confirmed`, queueing their children for retry.
    pub fn prune_confirmed(&mut self, is_confirmed: impl Fn(&BlockRef) -> bool) {
        let confirmed: Vec<Hash> = self
            .txs
            .iter()
            .filter(|(_, info)| info.mined_block.as_ref().is_some_and(&is_confirmed))
            .map(|(txid, _)| *txid)
            .collect();
        for txid in confirmed {
            self.remove(&txid, true);
        }
    }
}
