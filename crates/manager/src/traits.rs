//! Collaborator interfaces consumed by the lock manager.
//!
//! The manager owns no chain state, mempool, signing machinery, or peer
//! connections; those capabilities are injected as trait handles. None of
//! these methods are ever called while the manager's internal mutex is
//! held, so implementations are free to take their own locks.

use instantlock_types::{
    BlockRef, Hash, InstantSendLock, Inv, LlmqType, OutPoint, PeerId, Quorum, RecoveredSig,
    Transaction,
};
use std::sync::Arc;

/// The BLS threshold signing service.
///
/// The manager requests signatures for `(request id, message hash)` pairs
/// and is told about recovered threshold signatures via
/// `InstantSendManager::handle_new_recovered_sig`.
pub trait SigningService: Send + Sync {
    /// Request an asynchronous signing session. Returns whether this node
    /// is a member of the selected quorum and the request was enqueued.
    ///
    /// `allow_re_sign` permits re-voting for a session this node already
    /// voted in (used when retroactively locking mined transactions).
    fn async_sign_if_member(
        &self,
        llmq_type: LlmqType,
        id: Hash,
        msg_hash: Hash,
        allow_re_sign: bool,
    ) -> bool;

    /// The message hash this node previously voted for under `id`, if any.
    fn vote_for_id(&self, llmq_type: LlmqType, id: &Hash) -> Option<Hash>;

    /// Whether a different message hash already has votes or a recovered
    /// signature under `id`.
    fn is_conflicting(&self, llmq_type: LlmqType, id: &Hash, msg_hash: &Hash) -> bool;

    /// Whether a recovered signature exists for `(id, msg_hash)`.
    fn has_recovered_sig(&self, llmq_type: LlmqType, id: &Hash, msg_hash: &Hash) -> bool;

    /// Whether a recovered signature exists for `id`, regardless of the
    /// message hash.
    fn has_recovered_sig_for_id(&self, llmq_type: LlmqType, id: &Hash) -> bool;

    /// Select the quorum responsible for signing `id`.
    ///
    /// `sign_height` pins selection to a historical height (deterministic
    /// locks from finished cycles); `sign_offset` shifts selection to an
    /// older active set (used to verify against the previous rotation).
    fn select_quorum(
        &self,
        llmq_type: LlmqType,
        id: &Hash,
        sign_height: Option<u32>,
        sign_offset: u32,
    ) -> Option<Quorum>;

    /// Drop the recovered signature for `id`, if present. Idempotent.
    fn truncate_recovered_sig(&self, llmq_type: LlmqType, id: &Hash);

    /// Hand the service a recovered signature reconstructed from a
    /// verified lock, sparing it a duplicate verification.
    fn push_reconstructed_sig(&self, llmq_type: LlmqType, sig: RecoveredSig);
}

/// Read and (rarely) mutate chain state.
pub trait ChainView: Send + Sync {
    /// The active chain tip.
    fn tip(&self) -> BlockRef;

    /// The active-chain block at `height`.
    fn block_at_height(&self, height: u32) -> Option<BlockRef>;

    /// Any known block by hash, active or not.
    fn block_by_hash(&self, hash: &Hash) -> Option<BlockRef>;

    /// The active-chain ancestor of `block` at `height`.
    fn ancestor(&self, block: &BlockRef, height: u32) -> Option<BlockRef>;

    /// A transaction body plus the hash of its containing block, if mined.
    /// Relies on a transaction index.
    fn transaction(&self, txid: &Hash) -> Option<(Arc<Transaction>, Option<Hash>)>;

    /// Whether the block at `(height, hash)` is ChainLocked.
    fn has_chain_lock(&self, height: u32, hash: &Hash) -> bool;

    /// Mark a block invalid, scheduling a reorg around it. Returns false
    /// only on unrecoverable failure.
    fn invalidate_block(&self, hash: &Hash) -> bool;

    /// Re-evaluate the best chain after invalidations. Returns false only
    /// on unrecoverable failure.
    fn activate_best_chain(&self) -> bool;
}

/// Mempool inspection and eviction.
pub trait MempoolView: Send + Sync {
    /// Whether the mempool holds `txid`.
    fn contains(&self, txid: &Hash) -> bool;

    /// The mempool transaction `txid`, if present.
    fn get(&self, txid: &Hash) -> Option<Arc<Transaction>>;

    /// The txid of the mempool transaction spending `outpoint`, if any.
    fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash>;

    /// Evict a transaction and all its mempool descendants as conflicted.
    fn remove_recursive(&self, txid: &Hash);

    /// Bump the mempool's transactions-updated counter so block templates
    /// pick up newly locked transactions.
    fn bump_transactions_updated(&self);
}

/// Peer-facing side effects: relay, scoring, and re-requests.
pub trait PeerNetwork: Send + Sync {
    /// Clear an object from the peer's in-flight request set.
    fn withdraw_request(&self, peer: PeerId, inv: Inv);

    /// Relay an inventory item to peers whose filters match `tx` and whose
    /// protocol version is at least `min_proto_version`.
    fn relay_inv_filtered(&self, inv: Inv, tx: &Transaction, min_proto_version: u32);

    /// As [`Self::relay_inv_filtered`], but matching filters on the txid
    /// only (the body is not yet known locally).
    fn relay_inv_filtered_by_txid(&self, inv: Inv, txid: Hash, min_proto_version: u32);

    /// Apply a misbehavior score to a peer.
    fn punish_peer(&self, peer: PeerId, score: u32);

    /// Ask peers that announced `txid` to send the transaction, so the
    /// locked version replaces evicted conflictors.
    fn ask_peers_for_transaction(&self, txid: Hash);
}

/// Downstream notification sink for committed locks.
pub trait LockNotifier: Send + Sync {
    /// A transaction the node knows has been locked.
    fn notify_transaction_lock(&self, tx: &Transaction, lock: &InstantSendLock);
}

/// Dynamic, consensus-driven toggles. Read fresh on each entry; never
/// cached by the manager.
pub trait RuntimeToggles: Send + Sync {
    /// Whether the InstantSend subsystem is enabled at all.
    fn instant_send_enabled(&self) -> bool;

    /// Whether mempool transactions are signed, or only transactions seen
    /// in connected blocks (retroactive signing stays on either way so
    /// blocks can still be ChainLocked).
    fn mempool_signing_enabled(&self) -> bool;

    /// Whether blocks conflicting with committed locks are invalidated.
    fn reject_conflicting_blocks(&self) -> bool;

    /// Whether this node is a masternode (only masternodes vote).
    fn is_masternode(&self) -> bool;

    /// Whether initial block sync has completed.
    fn is_blockchain_synced(&self) -> bool;

    /// Whether ChainLocks are active (lock expiry then defers to them).
    fn chain_locks_enabled(&self) -> bool;

    /// Whether the one-time lock database migration is activated at the
    /// given tip.
    fn db_upgrade_active(&self, tip: &BlockRef) -> bool;
}
