//! End-to-end scenarios for the lock manager against mock collaborators
//! with real BLS quorum signatures.

use instantlock_manager::{ChainView, InstantSendConfig, InstantSendManager, Worker};
use instantlock_store::LockStore;
use instantlock_test_helpers::mocks::{
    MockChain, MockMempool, MockNetwork, MockNotifier, MockSigner, MockToggles,
};
use instantlock_test_helpers::{make_tx, TestQuorum};
use instantlock_types::{
    input_lock_request_id, islock_request_id, Block, Hash, InstantSendLock, LlmqType, OutPoint,
    PeerId, Transaction,
};
use std::sync::Arc;

const LLMQ_TYPE: LlmqType = LlmqType(1);

struct Harness {
    _dir: tempfile::TempDir,
    manager: Arc<InstantSendManager>,
    store: Arc<LockStore>,
    signer: Arc<MockSigner>,
    chain: Arc<MockChain>,
    mempool: Arc<MockMempool>,
    network: Arc<MockNetwork>,
    notifier: Arc<MockNotifier>,
    toggles: Arc<MockToggles>,
    quorum: TestQuorum,
    prev_quorum: TestQuorum,
    dkg_interval: u32,
}

impl Harness {
    fn new() -> Self {
        let config = InstantSendConfig::new();
        let dkg_interval = config.dkg_interval;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LockStore::open(dir.path()).unwrap());
        let signer = Arc::new(MockSigner::new());
        let chain = Arc::new(MockChain::new());
        let mempool = Arc::new(MockMempool::new());
        let network = Arc::new(MockNetwork::new());
        let notifier = Arc::new(MockNotifier::new());
        let toggles = Arc::new(MockToggles::new());

        let quorum = TestQuorum::new(4, 1);
        let prev_quorum = TestQuorum::new(4, 2);
        signer.set_quorum(0, quorum.quorum());
        signer.set_quorum(dkg_interval, prev_quorum.quorum());

        // A short chain; tip high enough for 6-deep parents mined at 3.
        chain.advance_to(10);

        let manager = Arc::new(InstantSendManager::new(
            config,
            Arc::clone(&store),
            Arc::clone(&signer) as _,
            Arc::clone(&chain) as _,
            Arc::clone(&mempool) as _,
            Arc::clone(&network) as _,
            Arc::clone(&notifier) as _,
            Arc::clone(&toggles) as _,
        ));

        Self {
            _dir: dir,
            manager,
            store,
            signer,
            chain,
            mempool,
            network,
            notifier,
            toggles,
            quorum,
            prev_quorum,
            dkg_interval,
        }
    }

    /// A funding transaction mined at height 3 (8 confirmations at tip).
    fn mine_funding(&self) -> Arc<Transaction> {
        let funding = make_tx(vec![OutPoint::new(Hash::from_bytes(b"coinbase"), 0)], 99);
        self.chain.add_block(3, std::slice::from_ref(&funding));
        funding
    }

    /// Put a transaction in the mempool and announce it to the manager.
    fn submit_to_mempool(&self, tx: &Arc<Transaction>) {
        self.mempool.add(Arc::clone(tx));
        self.chain.add_tx_unmined(tx);
        self.manager.transaction_added_to_mempool(tx);
    }

    /// Deliver recovered input-lock signatures for every input of `tx`.
    fn inject_input_sigs(&self, tx: &Arc<Transaction>) {
        for input in &tx.inputs {
            let id = input_lock_request_id(input);
            let rec = self.quorum.recovered_sig(LLMQ_TYPE, id, tx.txid());
            self.signer.add_recovered_sig(rec.clone());
            self.manager.handle_new_recovered_sig(&rec);
        }
    }

    /// Deliver the recovered transaction-lock signature for `tx`.
    fn inject_lock_sig(&self, tx: &Arc<Transaction>) {
        let id = islock_request_id(&tx.inputs);
        let rec = self.quorum.recovered_sig(LLMQ_TYPE, id, tx.txid());
        self.signer.add_recovered_sig(rec.clone());
        self.manager.handle_new_recovered_sig(&rec);
    }

    /// Drive a transaction through the full self-signing pipeline.
    fn drive_lock(&self, tx: &Arc<Transaction>) {
        self.inject_input_sigs(tx);
        self.inject_lock_sig(tx);
        self.manager.process_pending_locks();
    }

    /// A deterministic lock over `tx` signed by the given quorum, bound
    /// to the current cycle.
    fn make_peer_lock(&self, tx: &Transaction, quorum: &TestQuorum) -> InstantSendLock {
        let tip = self.chain.tip();
        let cycle_height = tip.height - tip.height % self.dkg_interval;
        let cycle = self.chain.block_at_height(cycle_height).unwrap();

        let txid = tx.txid();
        let id = islock_request_id(&tx.inputs);
        let signature = quorum.sign_session(LLMQ_TYPE, &id, &txid);
        InstantSendLock::new_deterministic(txid, tx.inputs.clone(), cycle.hash, signature)
    }

    /// Mine `tx` into a fresh block and feed the block to the manager.
    fn connect_block_with(&self, height: u32, tx: &Arc<Transaction>) -> instantlock_types::BlockRef {
        let block_ref = self.chain.add_block(height, std::slice::from_ref(tx));
        let block = Block {
            transactions: vec![Arc::clone(tx)],
        };
        self.manager.block_connected(&block, &block_ref, &[]);
        block_ref
    }
}

// ═══════════════════════════════════════════════════════════════════════
// S1: happy path
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn locks_a_mempool_transaction_with_confirmed_parent() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.submit_to_mempool(&tx);

    // The manager voted on the input.
    let input_id = input_lock_request_id(&tx.inputs[0]);
    assert!(h.signer.has_request_for(&input_id));

    // Input lock recovered: the transaction lock gets requested.
    h.inject_input_sigs(&tx);
    let lock_id = islock_request_id(&tx.inputs);
    assert!(h.signer.has_request_for(&lock_id));

    // Lock signature recovered: the lock commits on the next drain.
    h.inject_lock_sig(&tx);
    h.manager.process_pending_locks();

    assert!(h.manager.is_locked(&tx.txid()));
    let lock = h.manager.lock_by_txid(&tx.txid()).unwrap();
    assert_eq!(lock.txid, tx.txid());
    assert_eq!(lock.inputs, tx.inputs);

    // Notified exactly once, and the lock was relayed.
    assert_eq!(h.notifier.notified(), vec![tx.txid()]);
    assert!(h.network.relayed().iter().any(|inv| inv.hash == lock.hash()));

    // Input-lock recovered sigs are dropped once the lock covers them.
    assert!(h.signer.truncated().contains(&input_id));
}

#[test]
fn unconfirmed_unlocked_parent_blocks_locking() {
    let h = Harness::new();
    // Parent mined at the tip: only 1 confirmation.
    let funding = make_tx(vec![OutPoint::new(Hash::from_bytes(b"coinbase"), 0)], 99);
    h.chain.add_block(10, std::slice::from_ref(&funding));

    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.submit_to_mempool(&tx);

    assert!(!h.signer.has_request_for(&input_lock_request_id(&tx.inputs[0])));
}

#[test]
fn chainlocked_parent_is_lockable_regardless_of_depth() {
    let h = Harness::new();
    let funding = make_tx(vec![OutPoint::new(Hash::from_bytes(b"coinbase"), 0)], 99);
    let block = h.chain.add_block(10, std::slice::from_ref(&funding));
    h.chain.set_chain_locked(block.hash);

    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.submit_to_mempool(&tx);

    assert!(h.signer.has_request_for(&input_lock_request_id(&tx.inputs[0])));
}

// ═══════════════════════════════════════════════════════════════════════
// S2: child retry
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn child_of_unlocked_mempool_parent_retries_after_parent_locks() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let parent = make_tx(vec![funding.outpoint(0)], 1);
    h.submit_to_mempool(&parent);

    // Child spends the unlocked mempool parent: not lockable yet.
    let child = make_tx(vec![OutPoint::new(parent.txid(), 0)], 2);
    h.submit_to_mempool(&child);
    let child_input_id = input_lock_request_id(&child.inputs[0]);
    assert!(!h.signer.has_request_for(&child_input_id));

    // Parent becomes locked; the commit queues the child for retry.
    h.drive_lock(&parent);
    assert!(h.manager.is_locked(&parent.txid()));

    // Next worker tick retries the child, which is now lockable.
    h.manager.process_pending_retries();
    assert!(h.signer.has_request_for(&child_input_id));
}

// ═══════════════════════════════════════════════════════════════════════
// S3: peer lock signed by the previous quorum set
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn peer_lock_from_previous_quorum_commits_without_scoring() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&tx);

    let lock = h.make_peer_lock(&tx, &h.prev_quorum);
    let lock_hash = lock.hash();

    h.manager.process_lock_message(PeerId(7), lock);
    h.manager.process_pending_locks();

    // First pass (current set) fails, second pass (previous set)
    // verifies; the peer is not scored.
    assert!(h.manager.is_locked(&tx.txid()));
    assert!(h.network.punished().is_empty());
    assert!(h.store.lock_by_hash(&lock_hash).is_some());

    // The verified signature was handed back to the signing service.
    let lock_id = islock_request_id(&tx.inputs);
    assert!(h.signer.reconstructed().iter().any(|s| s.id == lock_id));
}

#[test]
fn peer_lock_with_garbage_signature_is_scored_leniently() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&tx);

    let mut lock = h.make_peer_lock(&tx, &h.quorum);
    lock.signature = instantlock_types::BlsSignature::zeroed();
    let peer = PeerId(9);

    h.manager.process_lock_message(peer, lock);
    h.manager.process_pending_locks();

    assert!(!h.manager.is_locked(&tx.txid()));
    // Scored only on the second (banning) pass, and leniently.
    assert_eq!(h.network.punished(), vec![(peer, 20)]);
}

#[test]
fn structurally_invalid_lock_is_scored_hard() {
    let h = Harness::new();
    let lock = InstantSendLock::new_legacy(
        Hash::from_bytes(b"tx"),
        vec![
            OutPoint::new(Hash::from_bytes(b"dup"), 0),
            OutPoint::new(Hash::from_bytes(b"dup"), 0),
        ],
        instantlock_types::BlsSignature::zeroed(),
    );
    let peer = PeerId(4);

    h.manager.process_lock_message(peer, lock);

    assert_eq!(h.network.punished(), vec![(peer, 100)]);
    assert!(!h.manager.process_pending_locks());
}

#[test]
fn deterministic_lock_with_offcycle_block_is_scored_hard() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&tx);

    let mut lock = h.make_peer_lock(&tx, &h.quorum);
    // Height 3 is not a cycle boundary.
    lock.cycle_hash = h.chain.block_at_height(3).unwrap().hash;
    let peer = PeerId(5);

    h.manager.process_lock_message(peer, lock);

    assert_eq!(h.network.punished(), vec![(peer, 100)]);
}

// ═══════════════════════════════════════════════════════════════════════
// S4: mempool conflict
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn committed_lock_evicts_conflicting_mempool_spender() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let locked_tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&locked_tx);

    // A different spender of the same output sits in the mempool.
    let conflictor = make_tx(vec![funding.outpoint(0)], 2);
    h.mempool.add(Arc::clone(&conflictor));

    let lock = h.make_peer_lock(&locked_tx, &h.quorum);
    h.manager.process_lock_message(PeerId(3), lock);
    h.manager.process_pending_locks();

    assert!(h.manager.is_locked(&locked_tx.txid()));
    assert_eq!(h.mempool.removed(), vec![conflictor.txid()]);
    // Peers are asked to re-offer the locked transaction.
    assert_eq!(h.network.asked(), vec![locked_tx.txid()]);
}

// ═══════════════════════════════════════════════════════════════════════
// S5 / S6: mined conflicts
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn chainlocked_conflict_prunes_the_lock() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let locked_tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&locked_tx);

    // The conflicting spender gets mined, then the block is ChainLocked.
    let conflictor = make_tx(vec![funding.outpoint(0)], 2);
    let conflict_block = h.connect_block_with(11, &conflictor);
    h.chain.set_chain_locked(conflict_block.hash);

    let lock = h.make_peer_lock(&locked_tx, &h.quorum);
    let lock_hash = lock.hash();
    h.manager.process_lock_message(PeerId(3), lock);
    h.manager.process_pending_locks();

    // The lock lost: pruned, archived, and the chain is untouched.
    assert!(h.store.lock_by_hash(&lock_hash).is_none());
    assert!(h.store.known_lock(&lock_hash));
    assert!(h.chain.invalidated().is_empty());
}

#[test]
fn non_chainlocked_conflicting_block_is_invalidated() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let locked_tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&locked_tx);

    let conflictor = make_tx(vec![funding.outpoint(0)], 2);
    let conflict_block = h.connect_block_with(11, &conflictor);

    let lock = h.make_peer_lock(&locked_tx, &h.quorum);
    let lock_hash = lock.hash();
    h.manager.process_lock_message(PeerId(3), lock);
    h.manager.process_pending_locks();

    // The lock wins: the conflicting block is invalidated and the best
    // chain re-activated.
    assert_eq!(h.chain.invalidated(), vec![conflict_block.hash]);
    assert_eq!(h.chain.activations(), 1);
    assert!(h.store.lock_by_hash(&lock_hash).is_some());
    assert!(h.manager.is_locked(&locked_tx.txid()));
}

// ═══════════════════════════════════════════════════════════════════════
// Confirmation, disconnect, and expiry
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn mined_index_follows_connects_and_disconnects() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.submit_to_mempool(&tx);
    h.drive_lock(&tx);
    assert!(h.manager.is_locked(&tx.txid()));

    // Mined at 11, then the block is disconnected again.
    let block_ref = h.connect_block_with(11, &tx);
    let block = Block {
        transactions: vec![Arc::clone(&tx)],
    };
    h.manager.block_disconnected(&block, &block_ref);

    // Fully confirming height 11 removes nothing: the mined entry is gone.
    h.manager.notify_chain_lock(&block_ref);
    assert!(h.manager.is_locked(&tx.txid()));
    assert!(h.store.lock_by_txid(&tx.txid()).is_some());

    // Re-mined at 12 and fully confirmed: removed but still known.
    let block_ref = h.connect_block_with(12, &tx);
    let lock_hash = h.store.lock_by_txid(&tx.txid()).unwrap().hash();
    h.manager.notify_chain_lock(&block_ref);

    assert!(h.store.lock_by_txid(&tx.txid()).is_none());
    assert!(h.store.known_lock(&lock_hash));
    assert!(h.manager.already_have(&lock_hash));
}

#[test]
fn updated_block_tip_runs_migration_once_active() {
    let h = Harness::new();
    assert_eq!(h.store.version(), None);

    h.manager.updated_block_tip(&h.chain.tip());
    assert_eq!(h.store.version(), None);

    h.toggles.set_upgrade_active(true);
    h.manager.updated_block_tip(&h.chain.tip());
    assert_eq!(h.store.version(), Some(instantlock_store::CURRENT_VERSION));
}

#[test]
fn removing_locked_tx_from_mempool_prunes_its_lock() {
    let h = Harness::new();
    // The eviction path is gated on the completed migration.
    h.toggles.set_upgrade_active(true);
    h.manager.updated_block_tip(&h.chain.tip());

    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.submit_to_mempool(&tx);
    h.drive_lock(&tx);
    let lock_hash = h.store.lock_by_txid(&tx.txid()).unwrap().hash();

    h.manager.transaction_removed_from_mempool(&tx);

    assert!(h.store.lock_by_hash(&lock_hash).is_none());
    assert!(h.store.known_lock(&lock_hash));
}

// ═══════════════════════════════════════════════════════════════════════
// Queries and input exclusivity
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn conflicting_lock_is_reported_for_double_spends() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let locked_tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&locked_tx);

    let lock = h.make_peer_lock(&locked_tx, &h.quorum);
    h.manager.process_lock_message(PeerId(2), lock);
    h.manager.process_pending_locks();

    let double_spend = make_tx(vec![funding.outpoint(0)], 2);
    let conflicting = h.manager.conflicting_lock(&double_spend).unwrap();
    assert_eq!(conflicting.txid, locked_tx.txid());

    // A double spend never gets voted on.
    h.submit_to_mempool(&double_spend);
    assert!(!h
        .signer
        .has_request_for(&islock_request_id(&double_spend.inputs)));
    assert!(!h.manager.is_locked(&double_spend.txid()));
    assert_eq!(h.manager.lock_count(), 1);
}

#[test]
fn duplicate_lock_delivery_is_recognized() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&tx);

    let lock = h.make_peer_lock(&tx, &h.quorum);
    let lock_hash = lock.hash();

    h.manager.process_lock_message(PeerId(1), lock.clone());
    assert!(h.manager.already_have(&lock_hash));
    h.manager.process_pending_locks();

    // Replays from other peers are silently dropped.
    h.manager.process_lock_message(PeerId(2), lock);
    assert!(!h.manager.process_pending_locks());
    assert!(h.manager.already_have(&lock_hash));
    assert_eq!(h.notifier.notified().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn worker_drains_pending_locks() {
    let h = Harness::new();
    let funding = h.mine_funding();
    let tx = make_tx(vec![funding.outpoint(0)], 1);
    h.chain.add_tx_unmined(&tx);

    let worker = Worker::spawn(Arc::clone(&h.manager));

    let lock = h.make_peer_lock(&tx, &h.quorum);
    h.manager.process_lock_message(PeerId(6), lock);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !h.manager.is_locked(&tx.txid()) {
        assert!(
            std::time::Instant::now() < deadline,
            "worker did not commit the pending lock in time"
        );
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    worker.stop();
}
