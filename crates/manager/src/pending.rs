//! In-construction and pending-verification lock sets.

use instantlock_types::{BlsSignature, Hash, InstantSendLock, LockVersion, OutPoint, PeerId};
use std::collections::HashMap;
use std::sync::Arc;

/// A lock being assembled while its threshold signature is recovered.
///
/// The mutable half of the draft/committed split: drafts are owned by the
/// manager and mutate freely; attaching the recovered signature converts
/// them one-way into an immutable [`InstantSendLock`].
#[derive(Debug, Clone)]
pub struct LockDraft {
    version: LockVersion,
    txid: Hash,
    inputs: Vec<OutPoint>,
    cycle_hash: Hash,
}

impl LockDraft {
    /// Draft a deterministic lock for `txid` over `inputs`, bound to the
    /// quorum cycle starting at `cycle_hash`.
    pub fn deterministic(txid: Hash, inputs: Vec<OutPoint>, cycle_hash: Hash) -> Self {
        Self {
            version: LockVersion::Deterministic,
            txid,
            inputs,
            cycle_hash,
        }
    }

    /// The locked transaction id.
    pub fn txid(&self) -> Hash {
        self.txid
    }

    /// The signing-session request id for this draft.
    pub fn request_id(&self) -> Hash {
        instantlock_types::islock_request_id(&self.inputs)
    }

    /// Attach the recovered threshold signature, producing the final lock.
    pub fn into_lock(self, signature: BlsSignature) -> InstantSendLock {
        match self.version {
            LockVersion::Legacy => InstantSendLock::new_legacy(self.txid, self.inputs, signature),
            LockVersion::Deterministic => InstantSendLock::new_deterministic(
                self.txid,
                self.inputs,
                self.cycle_hash,
                signature,
            ),
        }
    }
}

/// Drafts awaiting their threshold signature, keyed by request id with a
/// txid reverse index.
#[derive(Debug, Default)]
pub struct CreatingLocks {
    by_id: HashMap<Hash, LockDraft>,
    id_by_txid: HashMap<Hash, Hash>,
}

impl CreatingLocks {
    /// Register a draft. Returns false if one already exists for the id.
    pub fn insert(&mut self, id: Hash, draft: LockDraft) -> bool {
        if self.by_id.contains_key(&id) {
            return false;
        }
        self.id_by_txid.insert(draft.txid(), id);
        self.by_id.insert(id, draft);
        true
    }

    /// Take the draft for a request id, clearing both indexes.
    pub fn take(&mut self, id: &Hash) -> Option<LockDraft> {
        let draft = self.by_id.remove(id)?;
        self.id_by_txid.remove(&draft.txid());
        Some(draft)
    }

    /// Drop any draft registered under a request id.
    pub fn remove_id(&mut self, id: &Hash) {
        self.take(id);
    }

    /// Whether a draft exists for the request id.
    pub fn contains_id(&self, id: &Hash) -> bool {
        self.by_id.contains_key(id)
    }

    /// Whether a draft exists for the transaction.
    pub fn contains_txid(&self, txid: &Hash) -> bool {
        self.id_by_txid.contains_key(txid)
    }
}

/// Received locks queued for batch signature verification, keyed by lock
/// hash with the source peer.
#[derive(Debug, Default)]
pub struct PendingLocks {
    queue: HashMap<Hash, (PeerId, Arc<InstantSendLock>)>,
}

impl PendingLocks {
    /// Enqueue a lock unless already queued. Returns whether it was added.
    pub fn insert(&mut self, hash: Hash, peer: PeerId, lock: Arc<InstantSendLock>) -> bool {
        if self.queue.contains_key(&hash) {
            return false;
        }
        self.queue.insert(hash, (peer, lock));
        true
    }

    /// Whether a lock hash is queued.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.queue.contains_key(hash)
    }

    /// Number of queued locks.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take up to `limit` locks for verification. The second value is true
    /// when locks remain queued and the caller should drain again soon.
    pub fn drain_batch(
        &mut self,
        limit: usize,
    ) -> (HashMap<Hash, (PeerId, Arc<InstantSendLock>)>, bool) {
        if self.queue.len() <= limit {
            return (std::mem::take(&mut self.queue), false);
        }

        let keys: Vec<Hash> = self.queue.keys().take(limit).copied().collect();
        let mut batch = HashMap::with_capacity(limit);
        for key in keys {
            if let Some(entry) = self.queue.remove(&key) {
                batch.insert(key, entry);
            }
        }
        (batch, true)
    }
}
