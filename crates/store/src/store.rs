//! RocksDB-backed lock database.
//!
//! All operations are synchronous blocking I/O. Every mutation is a single
//! `WriteBatch` applied under a commit lock, so a crash mid-mutation leaves
//! the previous consistent state. In-memory caches shadow the three primary
//! indexes and are rebuilt lazily from disk after a restart.

use crate::keys;
use instantlock_types::{Block, Encodable, Hash, InstantSendLock, LockVersion, OutPoint};
use parking_lot::Mutex;
use quick_cache::sync::Cache;
use rocksdb::{Options, WriteBatch, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current schema version, stamped by [`LockStore::upgrade`].
pub const CURRENT_VERSION: u32 = 1;

/// Capacity of the lock-body cache.
const LOCK_CACHE_SIZE: usize = 10_000;
/// Capacity of each hash-index cache.
const INDEX_CACHE_SIZE: usize = 50_000;

/// Version tag preceding a stored lock body: legacy variant.
const VALUE_TAG_LEGACY: u8 = 1;
/// Version tag preceding a stored lock body: deterministic variant.
const VALUE_TAG_DETERMINISTIC: u8 = 2;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn encode_lock_value(lock: &InstantSendLock) -> Vec<u8> {
    let mut value = Vec::new();
    value.push(match lock.version {
        LockVersion::Legacy => VALUE_TAG_LEGACY,
        LockVersion::Deterministic => VALUE_TAG_DETERMINISTIC,
    });
    lock.encode_into(&mut value);
    value
}

fn decode_lock_value(bytes: &[u8]) -> InstantSendLock {
    let version = match bytes.first() {
        Some(&VALUE_TAG_LEGACY) => LockVersion::Legacy,
        Some(&VALUE_TAG_DETERMINISTIC) => LockVersion::Deterministic,
        other => panic!("lock store corruption: unknown value tag {other:?}"),
    };
    InstantSendLock::decode_with_version(version, &bytes[1..])
        .unwrap_or_else(|e| panic!("lock store corruption: {e}"))
}

/// Durable, crash-consistent storage of committed locks.
///
/// Indexes every committed lock by lock hash, txid, and each spent
/// outpoint, plus a height-indexed mined set and a height-indexed archive.
/// The archive keeps lock hashes recognizable for a retention window after
/// removal so repeated deliveries are treated as already processed.
pub struct LockStore {
    db: DB,

    /// Serializes batched mutations against each other.
    commit_lock: Mutex<()>,

    /// Highest height already passed to [`Self::remove_confirmed_up_to`].
    /// Monotone non-decreasing.
    best_confirmed_height: Mutex<u32>,

    /// Read-through caches for the primary indexes. Negative results are
    /// cached too, matching the read paths that probe for absence.
    lock_cache: Cache<Hash, Option<Arc<InstantSendLock>>>,
    txid_cache: Cache<Hash, Option<Hash>>,
    outpoint_cache: Cache<OutPoint, Option<Hash>>,
}

impl LockStore {
    /// Open or create the lock database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
            best_confirmed_height: Mutex::new(0),
            lock_cache: Cache::new(LOCK_CACHE_SIZE),
            txid_cache: Cache::new(INDEX_CACHE_SIZE),
            outpoint_cache: Cache::new(INDEX_CACHE_SIZE),
        })
    }

    fn read(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.get(key).expect("lock store read failure")
    }

    fn write(&self, batch: WriteBatch) {
        self.db
            .write(batch)
            .expect("lock persistence failed - cannot maintain lock state");
    }

    // ─── Writes ─────────────────────────────────────────────────────────

    /// Persist a freshly committed lock under all primary indexes.
    pub fn write_new(&self, hash: Hash, lock: &Arc<InstantSendLock>) {
        let _guard = self.commit_lock.lock();

        let mut batch = WriteBatch::default();
        batch.put(keys::lock_by_hash(&hash), encode_lock_value(lock));
        batch.put(keys::hash_by_txid(&lock.txid), hash.as_bytes());
        for input in &lock.inputs {
            batch.put(keys::hash_by_outpoint(input), hash.as_bytes());
        }
        self.write(batch);

        self.lock_cache.insert(hash, Some(Arc::clone(lock)));
        self.txid_cache.insert(lock.txid, Some(hash));
        for input in &lock.inputs {
            self.outpoint_cache.insert(*input, Some(hash));
        }
    }

    /// Queue removal of a lock's primary index entries into `batch`.
    ///
    /// Resolves the lock body from disk when the caller does not have it.
    /// Cache invalidation is the caller's choice: callers that immediately
    /// re-query the same keys keep the cache warm instead.
    fn remove_into_batch(
        &self,
        batch: &mut WriteBatch,
        hash: Hash,
        lock: Option<Arc<InstantSendLock>>,
        keep_cache: bool,
    ) -> Option<Arc<InstantSendLock>> {
        let lock = match lock {
            Some(lock) => lock,
            None => self.lock_by_hash_cached(&hash, false)?,
        };

        batch.delete(keys::lock_by_hash(&hash));
        batch.delete(keys::hash_by_txid(&lock.txid));
        for input in &lock.inputs {
            batch.delete(keys::hash_by_outpoint(input));
        }

        if !keep_cache {
            self.lock_cache.remove(&hash);
            self.txid_cache.remove(&lock.txid);
            for input in &lock.inputs {
                self.outpoint_cache.remove(input);
            }
        }

        Some(lock)
    }

    /// Record that a committed lock's transaction was mined at `height`.
    pub fn write_mined(&self, hash: Hash, height: u32) {
        let _guard = self.commit_lock.lock();
        let mut batch = WriteBatch::default();
        batch.put(keys::mined(&hash, height), [1u8]);
        self.write(batch);
    }

    /// Drop a mined entry (the containing block was disconnected).
    pub fn remove_mined(&self, hash: Hash, height: u32) {
        let _guard = self.commit_lock.lock();
        let mut batch = WriteBatch::default();
        batch.delete(keys::mined(&hash, height));
        self.write(batch);
    }

    /// Record mined entries for every locked transaction in a connected
    /// block. Transactions without inputs can never be locked and are
    /// skipped.
    pub fn write_block_mined(&self, block: &Block, height: u32) {
        let _guard = self.commit_lock.lock();
        let mut batch = WriteBatch::default();
        for tx in &block.transactions {
            if tx.is_inputless() {
                continue;
            }
            if let Some(lock_hash) = self.lock_hash_by_txid(&tx.txid()) {
                batch.put(keys::mined(&lock_hash, height), [1u8]);
            }
        }
        self.write(batch);
    }

    /// Drop the mined entries for every locked transaction in a
    /// disconnected block.
    pub fn remove_block_mined(&self, block: &Block, height: u32) {
        let _guard = self.commit_lock.lock();
        let mut batch = WriteBatch::default();
        for tx in &block.transactions {
            if tx.is_inputless() {
                continue;
            }
            if let Some(lock_hash) = self.lock_hash_by_txid(&tx.txid()) {
                batch.delete(keys::mined(&lock_hash, height));
            }
        }
        self.write(batch);
    }

    // ─── Confirmation & archival ────────────────────────────────────────

    /// Remove every lock mined at a height `<= height`, archiving each
    /// removed hash at its mined height. Returns the removed locks.
    ///
    /// `best_confirmed_height` is monotone: calls at or below a height
    /// already confirmed are no-ops.
    pub fn remove_confirmed_up_to(&self, height: u32) -> HashMap<Hash, Arc<InstantSendLock>> {
        let _guard = self.commit_lock.lock();

        {
            let mut best = self.best_confirmed_height.lock();
            if height <= *best {
                warn!(
                    height,
                    best_confirmed = *best,
                    "attempt to confirm an already-confirmed height"
                );
                return HashMap::new();
            }
            *best = height;
        }

        let mut batch = WriteBatch::default();
        let mut removed = HashMap::new();

        let mut iter = self.db.raw_iterator();
        iter.seek(keys::mined_scan_start(height));
        while iter.valid() {
            let Some((mined_height, lock_hash)) = iter
                .key()
                .and_then(|key| keys::parse_height_key(keys::PREFIX_MINED, key))
            else {
                break;
            };
            if mined_height > height {
                break;
            }

            if let Some(lock) = self.remove_into_batch(&mut batch, lock_hash, None, false) {
                removed.insert(lock_hash, lock);
            }

            // Archive the hash so the lock is still recognized as seen.
            batch.put(keys::archived_by_height(&lock_hash, mined_height), [1u8]);
            batch.put(keys::archived_by_hash(&lock_hash), [1u8]);
            batch.delete(keys::mined(&lock_hash, mined_height));

            iter.next();
        }
        if let Err(e) = iter.status() {
            panic!("lock store iterator error: {e}");
        }

        self.write(batch);
        debug!(height, removed = removed.len(), "confirmed locks removed");
        removed
    }

    /// Erase archive entries at heights `<= height`.
    pub fn remove_archived_up_to(&self, height: u32) {
        if height == 0 {
            return;
        }
        let _guard = self.commit_lock.lock();

        let mut batch = WriteBatch::default();
        let mut iter = self.db.raw_iterator();
        iter.seek(keys::archived_scan_start(height));
        while iter.valid() {
            let Some((archived_height, lock_hash)) = iter
                .key()
                .and_then(|key| keys::parse_height_key(keys::PREFIX_ARCHIVED_BY_HEIGHT, key))
            else {
                break;
            };
            if archived_height > height {
                break;
            }

            batch.delete(keys::archived_by_hash(&lock_hash));
            batch.delete(keys::archived_by_height(&lock_hash, archived_height));

            iter.next();
        }
        if let Err(e) = iter.status() {
            panic!("lock store iterator error: {e}");
        }

        self.write(batch);
    }

    /// Remove a lock and every committed descendant lock (locks whose
    /// inputs spend outputs of an already-removed transaction in the set),
    /// archiving all of them at `height`. Returns the removed hashes.
    pub fn remove_chained(&self, root_hash: Hash, root_txid: Hash, height: u32) -> Vec<Hash> {
        let _guard = self.commit_lock.lock();

        let mut batch = WriteBatch::default();
        let mut removed = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![root_txid];

        while let Some(parent_txid) = stack.pop() {
            for child_hash in self.locks_by_parent(&parent_txid) {
                let Some(child) = self.lock_by_hash_cached(&child_hash, false) else {
                    continue;
                };

                self.remove_into_batch(&mut batch, child_hash, Some(Arc::clone(&child)), false);
                batch.put(keys::archived_by_height(&child_hash, height), [1u8]);
                batch.put(keys::archived_by_hash(&child_hash), [1u8]);
                removed.push(child_hash);

                if visited.insert(child.txid) {
                    stack.push(child.txid);
                }
            }
        }

        self.remove_into_batch(&mut batch, root_hash, None, false);
        batch.put(keys::archived_by_height(&root_hash, height), [1u8]);
        batch.put(keys::archived_by_hash(&root_hash), [1u8]);
        removed.push(root_hash);

        self.write(batch);
        removed
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Whether a lock hash is active or archived.
    pub fn known_lock(&self, hash: &Hash) -> bool {
        self.lock_by_hash(hash).is_some() || self.read(&keys::archived_by_hash(hash)).is_some()
    }

    /// Fetch a lock body by its canonical hash, via the cache.
    pub fn lock_by_hash(&self, hash: &Hash) -> Option<Arc<InstantSendLock>> {
        self.lock_by_hash_cached(hash, true)
    }

    /// Fetch a lock body, optionally bypassing the cache for the read.
    /// The result is cached either way, including absence.
    pub fn lock_by_hash_cached(
        &self,
        hash: &Hash,
        use_cache: bool,
    ) -> Option<Arc<InstantSendLock>> {
        if hash.is_zero() {
            return None;
        }
        if use_cache {
            if let Some(cached) = self.lock_cache.get(hash) {
                return cached;
            }
        }

        let lock = self
            .read(&keys::lock_by_hash(hash))
            .map(|bytes| Arc::new(decode_lock_value(&bytes)));
        self.lock_cache.insert(*hash, lock.clone());
        lock
    }

    /// Fetch the lock hash for a locked txid.
    pub fn lock_hash_by_txid(&self, txid: &Hash) -> Option<Hash> {
        if let Some(cached) = self.txid_cache.get(txid) {
            return cached;
        }
        let hash = self
            .read(&keys::hash_by_txid(txid))
            .map(|bytes| Hash::from_hash_bytes(&bytes));
        self.txid_cache.insert(*txid, hash);
        hash
    }

    /// Fetch the lock covering a txid.
    pub fn lock_by_txid(&self, txid: &Hash) -> Option<Arc<InstantSendLock>> {
        self.lock_by_hash(&self.lock_hash_by_txid(txid)?)
    }

    /// Fetch the lock indexing a spent outpoint.
    pub fn lock_by_input(&self, outpoint: &OutPoint) -> Option<Arc<InstantSendLock>> {
        let hash = if let Some(cached) = self.outpoint_cache.get(outpoint) {
            cached
        } else {
            let hash = self
                .read(&keys::hash_by_outpoint(outpoint))
                .map(|bytes| Hash::from_hash_bytes(&bytes));
            self.outpoint_cache.insert(*outpoint, hash);
            hash
        };
        self.lock_by_hash(&hash?)
    }

    /// Hashes of all locks spending an output of `parent_txid`.
    pub fn locks_by_parent(&self, parent_txid: &Hash) -> Vec<Hash> {
        let prefix = keys::outpoint_parent_prefix(parent_txid);
        let mut result = Vec::new();

        let mut iter = self.db.raw_iterator();
        iter.seek(&prefix);
        while iter.valid() {
            let Some(key) = iter.key() else {
                break;
            };
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(value) = iter.value() else {
                break;
            };
            result.push(Hash::from_hash_bytes(value));
            iter.next();
        }
        if let Err(e) = iter.status() {
            panic!("lock store iterator error: {e}");
        }

        result
    }

    /// Number of active (non-archived) locks.
    pub fn count(&self) -> usize {
        let tag = keys::tag(keys::PREFIX_LOCK_BY_HASH);
        let mut count = 0;

        let mut iter = self.db.raw_iterator();
        iter.seek(&tag);
        while iter.valid() {
            let Some(key) = iter.key() else {
                break;
            };
            if keys::parse_lock_key(key).is_none() {
                break;
            }
            count += 1;
            iter.next();
        }
        if let Err(e) = iter.status() {
            panic!("lock store iterator error: {e}");
        }

        count
    }

    /// The stored schema version, if any.
    pub fn version(&self) -> Option<u32> {
        self.read(&keys::version()).map(|bytes| {
            u32::from_le_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .expect("version value must be 4 bytes"),
            )
        })
    }

    // ─── Migration ──────────────────────────────────────────────────────

    /// One-time migration: drop locks whose transaction the chain no
    /// longer knows, then stamp the current schema version.
    ///
    /// Returns whether the migration ran.
    pub fn upgrade(&self, tx_known: &dyn Fn(&Hash) -> bool) -> bool {
        let _guard = self.commit_lock.lock();

        if self.version().unwrap_or(0) >= CURRENT_VERSION {
            return false;
        }

        let mut batch = WriteBatch::default();
        let mut dropped = 0usize;

        let tag = keys::tag(keys::PREFIX_LOCK_BY_HASH);
        let mut iter = self.db.raw_iterator();
        iter.seek(&tag);
        while iter.valid() {
            let Some(hash) = iter.key().and_then(keys::parse_lock_key) else {
                break;
            };
            if let Some(value) = iter.value() {
                let lock = decode_lock_value(value);
                if !tx_known(&lock.txid) {
                    batch.delete(keys::hash_by_txid(&lock.txid));
                    for input in &lock.inputs {
                        batch.delete(keys::hash_by_outpoint(input));
                    }
                    batch.delete(keys::lock_by_hash(&hash));
                    self.lock_cache.remove(&hash);
                    dropped += 1;
                }
            }
            iter.next();
        }
        if let Err(e) = iter.status() {
            panic!("lock store iterator error: {e}");
        }

        batch.put(keys::version(), CURRENT_VERSION.to_le_bytes());
        self.write(batch);

        info!(dropped, version = CURRENT_VERSION, "lock database upgraded");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instantlock_types::BlsSignature;

    fn open_store() -> (tempfile::TempDir, LockStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn make_lock(seed: &[u8], inputs: Vec<OutPoint>) -> Arc<InstantSendLock> {
        Arc::new(InstantSendLock::new_deterministic(
            Hash::from_bytes(seed),
            inputs,
            Hash::from_bytes(b"cycle"),
            BlsSignature::zeroed(),
        ))
    }

    fn outpoint(seed: &[u8], index: u32) -> OutPoint {
        OutPoint::new(Hash::from_bytes(seed), index)
    }

    #[test]
    fn test_write_and_lookup() {
        let (_dir, store) = open_store();
        let lock = make_lock(b"tx a", vec![outpoint(b"parent", 0), outpoint(b"parent", 1)]);
        let hash = lock.hash();

        store.write_new(hash, &lock);

        assert_eq!(store.lock_by_hash(&hash).as_deref(), Some(lock.as_ref()));
        assert_eq!(
            store.lock_by_txid(&lock.txid).as_deref(),
            Some(lock.as_ref())
        );
        assert_eq!(
            store.lock_by_input(&lock.inputs[0]).as_deref(),
            Some(lock.as_ref())
        );
        assert!(store.known_lock(&hash));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_lookup_survives_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let lock = make_lock(b"tx a", vec![outpoint(b"parent", 0)]);
        let hash = lock.hash();

        {
            let store = LockStore::open(dir.path()).unwrap();
            store.write_new(hash, &lock);
        }

        // Reopen: caches are cold, reads must go through to disk.
        let store = LockStore::open(dir.path()).unwrap();
        assert_eq!(store.lock_by_hash(&hash).as_deref(), Some(lock.as_ref()));
        assert_eq!(
            store.lock_by_input(&lock.inputs[0]).as_deref(),
            Some(lock.as_ref())
        );
    }

    #[test]
    fn test_confirmed_removal_archives() {
        let (_dir, store) = open_store();
        let lock = make_lock(b"tx a", vec![outpoint(b"parent", 0)]);
        let hash = lock.hash();

        store.write_new(hash, &lock);
        store.write_mined(hash, 100);

        let removed = store.remove_confirmed_up_to(100);
        assert_eq!(removed.len(), 1);
        assert!(removed.contains_key(&hash));

        // Gone from the primary indexes, but still known via the archive.
        assert!(store.lock_by_hash(&hash).is_none());
        assert!(store.lock_by_txid(&lock.txid).is_none());
        assert!(store.known_lock(&hash));
    }

    #[test]
    fn test_confirmed_removal_is_monotonic() {
        let (_dir, store) = open_store();
        let lock = make_lock(b"tx a", vec![outpoint(b"parent", 0)]);
        let hash = lock.hash();

        store.write_new(hash, &lock);
        store.write_mined(hash, 100);

        assert_eq!(store.remove_confirmed_up_to(150).len(), 1);

        // Lower or equal heights are no-ops, even with new mined entries.
        let lock2 = make_lock(b"tx b", vec![outpoint(b"parent", 1)]);
        store.write_new(lock2.hash(), &lock2);
        store.write_mined(lock2.hash(), 120);
        assert!(store.remove_confirmed_up_to(150).is_empty());
        assert!(store.remove_confirmed_up_to(120).is_empty());
        assert_eq!(store.remove_confirmed_up_to(151).len(), 1);
    }

    #[test]
    fn test_confirmed_removal_respects_height_bound() {
        let (_dir, store) = open_store();
        let shallow = make_lock(b"tx a", vec![outpoint(b"parent", 0)]);
        let deep = make_lock(b"tx b", vec![outpoint(b"parent", 1)]);

        store.write_new(shallow.hash(), &shallow);
        store.write_new(deep.hash(), &deep);
        store.write_mined(shallow.hash(), 10);
        store.write_mined(deep.hash(), 5);

        let removed = store.remove_confirmed_up_to(7);
        assert_eq!(removed.len(), 1);
        assert!(removed.contains_key(&deep.hash()));
        assert!(store.lock_by_hash(&shallow.hash()).is_some());
    }

    #[test]
    fn test_remove_mined_entry() {
        let (_dir, store) = open_store();
        let lock = make_lock(b"tx a", vec![outpoint(b"parent", 0)]);
        let hash = lock.hash();

        store.write_new(hash, &lock);
        store.write_mined(hash, 100);
        store.remove_mined(hash, 100);

        assert!(store.remove_confirmed_up_to(100).is_empty());
        assert!(store.lock_by_hash(&hash).is_some());
    }

    #[test]
    fn test_block_disconnect_clears_mined_entry() {
        let (_dir, store) = open_store();
        let parent = outpoint(b"parent", 0);
        let tx = Arc::new(instantlock_types::Transaction {
            version: 2,
            inputs: vec![parent],
            outputs: vec![],
        });
        let lock = make_lock_for_tx(&tx);
        store.write_new(lock.hash(), &lock);

        let block = Block {
            transactions: vec![Arc::clone(&tx)],
        };
        store.write_block_mined(&block, 50);
        store.remove_block_mined(&block, 50);

        // Nothing left to confirm at that height.
        assert!(store.remove_confirmed_up_to(50).is_empty());
        assert!(store.lock_by_hash(&lock.hash()).is_some());
    }

    fn make_lock_for_tx(tx: &instantlock_types::Transaction) -> Arc<InstantSendLock> {
        Arc::new(InstantSendLock::new_deterministic(
            tx.txid(),
            tx.inputs.clone(),
            Hash::from_bytes(b"cycle"),
            BlsSignature::zeroed(),
        ))
    }

    #[test]
    fn test_archive_ages_out() {
        let (_dir, store) = open_store();
        let lock = make_lock(b"tx a", vec![outpoint(b"parent", 0)]);
        let hash = lock.hash();

        store.write_new(hash, &lock);
        store.write_mined(hash, 100);
        store.remove_confirmed_up_to(100);
        assert!(store.known_lock(&hash));

        // Below the archival height: still known.
        store.remove_archived_up_to(99);
        assert!(store.known_lock(&hash));

        // At the archival height: forgotten.
        store.remove_archived_up_to(100);
        assert!(!store.known_lock(&hash));
    }

    #[test]
    fn test_remove_chained_walks_descendants() {
        let (_dir, store) = open_store();

        // parent lock for tx_a, child lock spends tx_a's output,
        // grandchild spends the child's output.
        let tx_a = Hash::from_bytes(b"tx a");
        let lock_a = make_lock(b"tx a", vec![outpoint(b"funding", 0)]);
        let lock_b = Arc::new(InstantSendLock::new_deterministic(
            Hash::from_bytes(b"tx b"),
            vec![OutPoint::new(tx_a, 0)],
            Hash::from_bytes(b"cycle"),
            BlsSignature::zeroed(),
        ));
        let lock_c = Arc::new(InstantSendLock::new_deterministic(
            Hash::from_bytes(b"tx c"),
            vec![OutPoint::new(Hash::from_bytes(b"tx b"), 0)],
            Hash::from_bytes(b"cycle"),
            BlsSignature::zeroed(),
        ));
        // Unrelated lock stays.
        let lock_d = make_lock(b"tx d", vec![outpoint(b"elsewhere", 0)]);

        store.write_new(lock_a.hash(), &lock_a);
        store.write_new(lock_b.hash(), &lock_b);
        store.write_new(lock_c.hash(), &lock_c);
        store.write_new(lock_d.hash(), &lock_d);

        let removed = store.remove_chained(lock_a.hash(), lock_a.txid, 200);
        assert_eq!(removed.len(), 3);
        assert!(removed.contains(&lock_a.hash()));
        assert!(removed.contains(&lock_b.hash()));
        assert!(removed.contains(&lock_c.hash()));

        for hash in &removed {
            assert!(store.lock_by_hash(hash).is_none());
            assert!(store.known_lock(hash), "removed locks must be archived");
        }
        assert!(store.lock_by_hash(&lock_d.hash()).is_some());
    }

    #[test]
    fn test_upgrade_drops_unknown_transactions() {
        let (_dir, store) = open_store();
        let known = make_lock(b"known tx", vec![outpoint(b"parent", 0)]);
        let unknown = make_lock(b"unknown tx", vec![outpoint(b"parent", 1)]);
        let known_txid = known.txid;

        store.write_new(known.hash(), &known);
        store.write_new(unknown.hash(), &unknown);

        assert!(store.upgrade(&move |txid| *txid == known_txid));

        assert!(store.lock_by_hash(&known.hash()).is_some());
        assert!(store.lock_by_hash(&unknown.hash()).is_none());
        assert_eq!(store.version(), Some(CURRENT_VERSION));

        // Second call is a no-op.
        assert!(!store.upgrade(&|_| false));
        assert!(store.lock_by_hash(&known.hash()).is_some());
    }

    #[test]
    fn test_locks_by_parent() {
        let (_dir, store) = open_store();
        let parent = Hash::from_bytes(b"parent tx");
        let lock_a = make_lock(b"tx a", vec![OutPoint::new(parent, 0)]);
        let lock_b = make_lock(b"tx b", vec![OutPoint::new(parent, 1)]);
        let other = make_lock(b"tx c", vec![outpoint(b"other parent", 0)]);

        store.write_new(lock_a.hash(), &lock_a);
        store.write_new(lock_b.hash(), &lock_b);
        store.write_new(other.hash(), &other);

        let children = store.locks_by_parent(&parent);
        assert_eq!(children.len(), 2);
        assert!(children.contains(&lock_a.hash()));
        assert!(children.contains(&lock_b.hash()));
    }
}
