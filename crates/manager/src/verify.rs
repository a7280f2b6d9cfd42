//! Peer lock intake, batch verification, and the commit path.
//!
//! Received locks (peer-delivered and self-signed alike) queue in
//! `PendingLocks` and are drained in bounded batches by the worker. Each
//! batch is BLS-verified in one pass against the current active quorum
//! set; locks that fail get a second pass against the previous set,
//! because the sender may legitimately lag one quorum rotation behind.
//! Only the second failure is scored.

use crate::manager::InstantSendManager;
use instantlock_types::{
    batch_verify_distinct, input_lock_request_id, sign_hash, Hash, InstantSendLock, LlmqType,
    PeerId, RecoveredSig,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Score for a structurally invalid lock or an invalid deterministic
/// cycle.
const MISBEHAVIOR_INVALID: u32 = 100;

/// Score for a lock failing verification against both quorum sets.
/// Lenient: the peer may simply have sent an old lock that no longer
/// validates after quorum rotation.
const MISBEHAVIOR_STALE_QUORUM: u32 = 20;

/// Score for an unknown cycle block: could be spam, could be a block this
/// node hasn't seen yet.
const MISBEHAVIOR_UNKNOWN_CYCLE: u32 = 1;

/// Structural checks that need no quorum context: non-null txid,
/// non-empty inputs, no duplicate inputs.
fn pre_verify(lock: &InstantSendLock) -> bool {
    if lock.txid.is_zero() || lock.inputs.is_empty() {
        return false;
    }

    let mut seen = HashSet::with_capacity(lock.inputs.len());
    for input in &lock.inputs {
        if !seen.insert(*input) {
            return false;
        }
    }

    true
}

impl InstantSendManager {
    /// A lock message arrived from a peer.
    pub fn process_lock_message(&self, peer: PeerId, lock: InstantSendLock) {
        if !self.toggles().instant_send_enabled() {
            return;
        }

        let lock = Arc::new(lock);
        let hash = lock.hash();

        self.network().withdraw_request(peer, lock.inv());

        if !pre_verify(&lock) {
            self.network().punish_peer(peer, MISBEHAVIOR_INVALID);
            return;
        }

        if lock.is_deterministic() {
            let Some(cycle_block) = self.chain().block_by_hash(&lock.cycle_hash) else {
                self.network().punish_peer(peer, MISBEHAVIOR_UNKNOWN_CYCLE);
                return;
            };
            if cycle_block.height % self.config().dkg_interval != 0 {
                self.network().punish_peer(peer, MISBEHAVIOR_INVALID);
                return;
            }
        }

        let mut inner = self.inner.lock();
        if inner.pending.contains(&hash) || self.store().known_lock(&hash) {
            return;
        }

        debug!(txid = %lock.txid, lock = %hash, %peer, "received lock");
        inner.pending.insert(hash, peer, lock);
    }

    /// Drain and verify one batch of pending locks. Returns whether more
    /// locks remain queued (the worker re-runs immediately in that case).
    pub fn process_pending_locks(&self) -> bool {
        if !self.toggles().instant_send_enabled() {
            return false;
        }
        let Some(llmq_type) = self.config().llmq_type else {
            return false;
        };

        let (mut pend, more_work) = {
            self.inner
                .lock()
                .pending
                .drain_batch(self.config().pending_batch_limit)
        };
        if pend.is_empty() {
            return false;
        }

        // First pass against the current active quorum set, without
        // scoring anyone.
        let bad = self.verify_pending_batch(llmq_type, 0, &pend, false);
        if !bad.is_empty() {
            debug!(
                failed = bad.len(),
                "retrying verification against the previous quorum set"
            );
            pend.retain(|hash, _| bad.contains(hash));
            self.verify_pending_batch(llmq_type, self.config().dkg_interval, &pend, true);
        }

        more_work
    }

    /// Verify one batch against the quorum set `sign_offset` rotations
    /// back. Commits every lock that verifies; returns the hashes that
    /// did not. With `ban`, sources of failing locks are scored.
    fn verify_pending_batch(
        &self,
        llmq_type: LlmqType,
        sign_offset: u32,
        pend: &HashMap<Hash, (PeerId, Arc<InstantSendLock>)>,
        ban: bool,
    ) -> HashSet<Hash> {
        let mut bad = HashSet::new();
        let mut bad_sources = HashSet::new();

        // Batch slots, parallel vectors.
        let mut slot_hashes = Vec::new();
        let mut messages = Vec::new();
        let mut signatures = Vec::new();
        let mut pubkeys = Vec::new();

        // Recovered sigs reconstructed from verified locks, handed to the
        // signing service to spare it a duplicate verification.
        let mut reconstructed: HashMap<Hash, RecoveredSig> = HashMap::new();

        let tip_height = self.chain().tip().height;
        let mut verify_count = 0usize;
        let mut already_verified = 0usize;

        for (hash, (peer, lock)) in pend {
            if bad_sources.contains(peer) {
                bad.insert(*hash);
                continue;
            }

            if !lock.signature.is_valid() {
                bad.insert(*hash);
                bad_sources.insert(*peer);
                continue;
            }

            let id = lock.request_id();

            // No need to verify when the signing service already holds
            // the recovered signature this lock is built from.
            if self.signer().has_recovered_sig(llmq_type, &id, &lock.txid) {
                already_verified += 1;
                continue;
            }

            // Deterministic locks from finished cycles pin quorum
            // selection to the cycle's last height.
            let mut sign_height = None;
            if lock.is_deterministic() {
                let Some(cycle_block) = self.chain().block_by_hash(&lock.cycle_hash) else {
                    bad.insert(*hash);
                    bad_sources.insert(*peer);
                    continue;
                };
                if cycle_block.height + self.config().dkg_interval < tip_height {
                    sign_height = Some(cycle_block.height + self.config().dkg_interval - 1);
                }
            }

            let Some(quorum) = self
                .signer()
                .select_quorum(llmq_type, &id, sign_height, sign_offset)
            else {
                // If one fails to select, all others will too.
                warn!(request_id = %id, sign_offset, "no quorum selectable for lock");
                return HashSet::new();
            };

            let message = sign_hash(llmq_type, &quorum.quorum_hash, &id, &lock.txid);
            slot_hashes.push(*hash);
            messages.push(message);
            signatures.push(lock.signature);
            pubkeys.push(quorum.public_key);
            verify_count += 1;

            if !self.signer().has_recovered_sig_for_id(llmq_type, &id) {
                reconstructed.insert(
                    *hash,
                    RecoveredSig {
                        id,
                        msg_hash: lock.txid,
                        quorum_hash: quorum.quorum_hash,
                        signature: lock.signature,
                    },
                );
            }
        }

        let message_refs: Vec<&[u8]> = messages.iter().map(|m| m.as_bytes().as_slice()).collect();
        let results = batch_verify_distinct(&message_refs, &signatures, &pubkeys);
        for (slot, ok) in slot_hashes.iter().zip(results.iter()) {
            if !*ok {
                bad.insert(*slot);
            }
        }

        debug!(
            verify_count,
            already_verified,
            failed = bad.len(),
            sign_offset,
            "verified pending locks"
        );

        if ban && !bad.is_empty() {
            let peers: HashSet<PeerId> = pend
                .iter()
                .filter(|(hash, _)| bad.contains(*hash))
                .map(|(_, (peer, _))| *peer)
                .filter(|peer| !peer.is_local())
                .collect();
            for peer in peers {
                self.network().punish_peer(peer, MISBEHAVIOR_STALE_QUORUM);
            }
        }

        for (hash, (peer, lock)) in pend {
            if bad.contains(hash) {
                debug!(txid = %lock.txid, lock = %hash, %peer, "invalid signature in lock");
                continue;
            }

            self.process_instant_send_lock(*peer, *hash, lock);

            if let Some(rec_sig) = reconstructed.remove(hash) {
                if !self.signer().has_recovered_sig_for_id(llmq_type, &rec_sig.id) {
                    debug!(
                        txid = %lock.txid,
                        lock = %hash,
                        "passing reconstructed recovered sig to signing service"
                    );
                    self.signer().push_reconstructed_sig(llmq_type, rec_sig);
                }
            }
        }

        bad
    }

    /// Commit a verified lock: persist, relay, and resolve conflicts.
    pub(crate) fn process_instant_send_lock(
        &self,
        from: PeerId,
        hash: Hash,
        lock: &Arc<InstantSendLock>,
    ) {
        debug!(txid = %lock.txid, lock = %hash, peer = %from, "processing lock");

        {
            let mut inner = self.inner.lock();
            inner.creating.remove_id(&lock.request_id());
        }

        if self.store().known_lock(&hash) {
            return;
        }

        // The lock must be propagated even without the transaction body.
        let mut tx_body = None;
        let mut mined = None;
        if let Some((tx, block_hash)) = self.chain().transaction(&lock.txid) {
            tx_body = Some(tx);
            if let Some(block_hash) = block_hash {
                if let Some(block) = self.chain().block_by_hash(&block_hash) {
                    if self.chain().has_chain_lock(block.height, &block.hash) {
                        // The ChainLock subsumes locking of every
                        // transaction in that chain.
                        debug!(
                            txid = %lock.txid,
                            lock = %hash,
                            block = %block.hash,
                            "dropping lock, transaction already chainlocked"
                        );
                        return;
                    }
                    mined = Some(block);
                }
            }
        }

        if let Some(other) = self.store().lock_by_txid(&lock.txid) {
            info!(
                txid = %lock.txid,
                lock = %hash,
                other_lock = %other.hash(),
                peer = %from,
                "duplicate lock for transaction"
            );
        }
        for input in &lock.inputs {
            if let Some(other) = self.store().lock_by_input(input) {
                info!(
                    txid = %lock.txid,
                    lock = %hash,
                    %input,
                    other_lock = %other.hash(),
                    peer = %from,
                    "conflicting input in lock"
                );
            }
        }

        self.store().write_new(hash, lock);
        if let Some(mined) = mined {
            self.store().write_mined(hash, mined.height);
        }

        let input_ids: Vec<Hash> = lock.inputs.iter().map(input_lock_request_id).collect();
        {
            let mut inner = self.inner.lock();
            // Queues children of the locked tx for retry.
            inner.tracker.remove(&lock.txid, true);
            for id in &input_ids {
                inner.input_request_ids.remove(id);
            }
        }
        // The input-lock recovered sigs are no longer needed; the lock
        // itself now detects conflicts. Dropping them stops their
        // propagation.
        if let Some(llmq_type) = self.config().llmq_type {
            for id in &input_ids {
                self.signer().truncate_recovered_sig(llmq_type, id);
            }
        }

        match &tx_body {
            Some(tx) => {
                self.network()
                    .relay_inv_filtered(lock.inv(), tx, lock.min_proto_version());
            }
            None => {
                // Without the body, peer filters can only match the txid.
                // Re-announced when the transaction arrives.
                self.network().relay_inv_filtered_by_txid(
                    lock.inv(),
                    lock.txid,
                    lock.min_proto_version(),
                );
            }
        }

        self.resolve_block_conflicts(hash, lock);
        self.remove_mempool_conflicts(hash, lock);

        if let Some(tx) = tx_body {
            debug!(txid = %lock.txid, "notifying about transaction lock");
            self.notifier().notify_transaction_lock(&tx, lock);
            // Make sure newly locked transactions are picked up by block
            // templates.
            self.mempool().bump_transactions_updated();
        }
    }
}
