//! Recording in-memory mocks for every lock manager collaborator.

use instantlock_manager::{
    ChainView, LockNotifier, MempoolView, PeerNetwork, RuntimeToggles, SigningService,
};
use instantlock_types::{
    BlockRef, Hash, InstantSendLock, Inv, LlmqType, OutPoint, PeerId, Quorum, RecoveredSig,
    Transaction,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════
// Signing service
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct SignerState {
    recovered: HashMap<Hash, RecoveredSig>,
    votes: HashMap<Hash, Hash>,
    sign_requests: Vec<(Hash, Hash)>,
    quorums: HashMap<u32, Quorum>,
    conflicting: HashSet<Hash>,
    truncated: Vec<Hash>,
    reconstructed: Vec<RecoveredSig>,
}

/// Mock signing service: records sign requests and serves recovered
/// signatures and quorums injected by the test.
#[derive(Default)]
pub struct MockSigner {
    state: Mutex<SignerState>,
    member: AtomicBool,
}

impl MockSigner {
    /// Create a signer that reports quorum membership.
    pub fn new() -> Self {
        let signer = Self::default();
        signer.member.store(true, Ordering::Release);
        signer
    }

    /// Set whether this node is a member of selected quorums.
    pub fn set_member(&self, member: bool) {
        self.member.store(member, Ordering::Release);
    }

    /// Serve `quorum` for selections at `sign_offset`.
    pub fn set_quorum(&self, sign_offset: u32, quorum: Quorum) {
        self.state.lock().quorums.insert(sign_offset, quorum);
    }

    /// Inject a recovered signature, as if the session completed.
    pub fn add_recovered_sig(&self, sig: RecoveredSig) {
        let mut state = self.state.lock();
        state.votes.insert(sig.id, sig.msg_hash);
        state.recovered.insert(sig.id, sig);
    }

    /// Flag a request id as having a conflicting session.
    pub fn set_conflicting(&self, id: Hash) {
        self.state.lock().conflicting.insert(id);
    }

    /// All `(id, msg_hash)` sign requests seen so far.
    pub fn sign_requests(&self) -> Vec<(Hash, Hash)> {
        self.state.lock().sign_requests.clone()
    }

    /// Whether a sign request was issued for `id`.
    pub fn has_request_for(&self, id: &Hash) -> bool {
        self.state.lock().sign_requests.iter().any(|(i, _)| i == id)
    }

    /// Request ids whose recovered signatures were truncated.
    pub fn truncated(&self) -> Vec<Hash> {
        self.state.lock().truncated.clone()
    }

    /// Recovered signatures pushed back from verified locks.
    pub fn reconstructed(&self) -> Vec<RecoveredSig> {
        self.state.lock().reconstructed.clone()
    }
}

impl SigningService for MockSigner {
    fn async_sign_if_member(
        &self,
        _llmq_type: LlmqType,
        id: Hash,
        msg_hash: Hash,
        _allow_re_sign: bool,
    ) -> bool {
        let mut state = self.state.lock();
        state.sign_requests.push((id, msg_hash));
        state.votes.entry(id).or_insert(msg_hash);
        self.member.load(Ordering::Acquire)
    }

    fn vote_for_id(&self, _llmq_type: LlmqType, id: &Hash) -> Option<Hash> {
        self.state.lock().votes.get(id).copied()
    }

    fn is_conflicting(&self, _llmq_type: LlmqType, id: &Hash, _msg_hash: &Hash) -> bool {
        self.state.lock().conflicting.contains(id)
    }

    fn has_recovered_sig(&self, _llmq_type: LlmqType, id: &Hash, msg_hash: &Hash) -> bool {
        self.state
            .lock()
            .recovered
            .get(id)
            .is_some_and(|sig| sig.msg_hash == *msg_hash)
    }

    fn has_recovered_sig_for_id(&self, _llmq_type: LlmqType, id: &Hash) -> bool {
        self.state.lock().recovered.contains_key(id)
    }

    fn select_quorum(
        &self,
        _llmq_type: LlmqType,
        _id: &Hash,
        _sign_height: Option<u32>,
        sign_offset: u32,
    ) -> Option<Quorum> {
        self.state.lock().quorums.get(&sign_offset).cloned()
    }

    fn truncate_recovered_sig(&self, _llmq_type: LlmqType, id: &Hash) {
        let mut state = self.state.lock();
        state.recovered.remove(id);
        state.truncated.push(*id);
    }

    fn push_reconstructed_sig(&self, _llmq_type: LlmqType, sig: RecoveredSig) {
        let mut state = self.state.lock();
        state.votes.insert(sig.id, sig.msg_hash);
        state.recovered.insert(sig.id, sig.clone());
        state.reconstructed.push(sig);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Chain view
// ═══════════════════════════════════════════════════════════════════════

struct ChainState {
    tip: BlockRef,
    by_height: HashMap<u32, BlockRef>,
    by_hash: HashMap<Hash, BlockRef>,
    txs: HashMap<Hash, (Arc<Transaction>, Option<Hash>)>,
    chain_locked: HashSet<Hash>,
    invalidated: Vec<Hash>,
    activations: usize,
}

/// Mock linear chain with a transaction index.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// Create a chain holding only a genesis block at height 0.
    pub fn new() -> Self {
        let genesis = BlockRef::new(Hash::from_bytes(b"genesis"), 0);
        let mut by_height = HashMap::new();
        let mut by_hash = HashMap::new();
        by_height.insert(0, genesis);
        by_hash.insert(genesis.hash, genesis);
        Self {
            state: Mutex::new(ChainState {
                tip: genesis,
                by_height,
                by_hash,
                txs: HashMap::new(),
                chain_locked: HashSet::new(),
                invalidated: Vec::new(),
                activations: 0,
            }),
        }
    }

    /// Append a block at `height` containing `txs`, advancing the tip if
    /// it extends it.
    pub fn add_block(&self, height: u32, txs: &[Arc<Transaction>]) -> BlockRef {
        let hash = Hash::from_parts(&[b"block", &height.to_le_bytes()]);
        let block = BlockRef::new(hash, height);

        let mut state = self.state.lock();
        state.by_height.insert(height, block);
        state.by_hash.insert(hash, block);
        if height > state.tip.height {
            state.tip = block;
        }
        for tx in txs {
            state.txs.insert(tx.txid(), (Arc::clone(tx), Some(hash)));
        }
        block
    }

    /// Extend the chain with empty blocks up to `height`.
    pub fn advance_to(&self, height: u32) {
        let current = self.state.lock().tip.height;
        for h in current + 1..=height {
            self.add_block(h, &[]);
        }
    }

    /// Index an unmined transaction (mempool-visible to lookups).
    pub fn add_tx_unmined(&self, tx: &Arc<Transaction>) {
        self.state.lock().txs.insert(tx.txid(), (Arc::clone(tx), None));
    }

    /// Mark a block ChainLocked.
    pub fn set_chain_locked(&self, hash: Hash) {
        self.state.lock().chain_locked.insert(hash);
    }

    /// Blocks invalidated so far.
    pub fn invalidated(&self) -> Vec<Hash> {
        self.state.lock().invalidated.clone()
    }

    /// Number of best-chain activations.
    pub fn activations(&self) -> usize {
        self.state.lock().activations
    }
}

impl ChainView for MockChain {
    fn tip(&self) -> BlockRef {
        self.state.lock().tip
    }

    fn block_at_height(&self, height: u32) -> Option<BlockRef> {
        self.state.lock().by_height.get(&height).copied()
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<BlockRef> {
        self.state.lock().by_hash.get(hash).copied()
    }

    fn ancestor(&self, block: &BlockRef, height: u32) -> Option<BlockRef> {
        if height > block.height {
            return None;
        }
        self.block_at_height(height)
    }

    fn transaction(&self, txid: &Hash) -> Option<(Arc<Transaction>, Option<Hash>)> {
        self.state.lock().txs.get(txid).cloned()
    }

    fn has_chain_lock(&self, _height: u32, hash: &Hash) -> bool {
        self.state.lock().chain_locked.contains(hash)
    }

    fn invalidate_block(&self, hash: &Hash) -> bool {
        self.state.lock().invalidated.push(*hash);
        true
    }

    fn activate_best_chain(&self) -> bool {
        self.state.lock().activations += 1;
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Mempool
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MempoolState {
    txs: HashMap<Hash, Arc<Transaction>>,
    removed: Vec<Hash>,
    updates: usize,
}

/// Mock mempool with spender lookup and recorded evictions.
#[derive(Default)]
pub struct MockMempool {
    state: Mutex<MempoolState>,
}

impl MockMempool {
    /// Create an empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction.
    pub fn add(&self, tx: Arc<Transaction>) {
        self.state.lock().txs.insert(tx.txid(), tx);
    }

    /// Txids evicted via `remove_recursive`.
    pub fn removed(&self) -> Vec<Hash> {
        self.state.lock().removed.clone()
    }

    /// Number of transactions-updated bumps.
    pub fn updates(&self) -> usize {
        self.state.lock().updates
    }
}

impl MempoolView for MockMempool {
    fn contains(&self, txid: &Hash) -> bool {
        self.state.lock().txs.contains_key(txid)
    }

    fn get(&self, txid: &Hash) -> Option<Arc<Transaction>> {
        self.state.lock().txs.get(txid).cloned()
    }

    fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash> {
        let state = self.state.lock();
        state
            .txs
            .values()
            .find(|tx| tx.inputs.contains(outpoint))
            .map(|tx| tx.txid())
    }

    fn remove_recursive(&self, txid: &Hash) {
        let mut state = self.state.lock();
        state.txs.remove(txid);
        state.removed.push(*txid);
    }

    fn bump_transactions_updated(&self) {
        self.state.lock().updates += 1;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Peer network
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct NetworkState {
    relayed: Vec<Inv>,
    punished: Vec<(PeerId, u32)>,
    asked: Vec<Hash>,
    withdrawn: Vec<(PeerId, Inv)>,
}

/// Mock peer network recording every outbound side effect.
#[derive(Default)]
pub struct MockNetwork {
    state: Mutex<NetworkState>,
}

impl MockNetwork {
    /// Create a network with no recorded activity.
    pub fn new() -> Self {
        Self::default()
    }

    /// All relayed inventory items.
    pub fn relayed(&self) -> Vec<Inv> {
        self.state.lock().relayed.clone()
    }

    /// All misbehavior scores applied.
    pub fn punished(&self) -> Vec<(PeerId, u32)> {
        self.state.lock().punished.clone()
    }

    /// Txids re-requested from peers.
    pub fn asked(&self) -> Vec<Hash> {
        self.state.lock().asked.clone()
    }
}

impl PeerNetwork for MockNetwork {
    fn withdraw_request(&self, peer: PeerId, inv: Inv) {
        self.state.lock().withdrawn.push((peer, inv));
    }

    fn relay_inv_filtered(&self, inv: Inv, _tx: &Transaction, _min_proto_version: u32) {
        self.state.lock().relayed.push(inv);
    }

    fn relay_inv_filtered_by_txid(&self, inv: Inv, _txid: Hash, _min_proto_version: u32) {
        self.state.lock().relayed.push(inv);
    }

    fn punish_peer(&self, peer: PeerId, score: u32) {
        self.state.lock().punished.push((peer, score));
    }

    fn ask_peers_for_transaction(&self, txid: Hash) {
        self.state.lock().asked.push(txid);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Notifier
// ═══════════════════════════════════════════════════════════════════════

/// Mock lock notification sink.
#[derive(Default)]
pub struct MockNotifier {
    notified: Mutex<Vec<Hash>>,
}

impl MockNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Txids notified as locked, in order.
    pub fn notified(&self) -> Vec<Hash> {
        self.notified.lock().clone()
    }
}

impl LockNotifier for MockNotifier {
    fn notify_transaction_lock(&self, tx: &Transaction, _lock: &InstantSendLock) {
        self.notified.lock().push(tx.txid());
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Runtime toggles
// ═══════════════════════════════════════════════════════════════════════

/// Mock toggles: everything enabled, ChainLocks and the DB migration off,
/// each independently switchable.
pub struct MockToggles {
    enabled: AtomicBool,
    mempool_signing: AtomicBool,
    reject_conflicting: AtomicBool,
    masternode: AtomicBool,
    synced: AtomicBool,
    chain_locks: AtomicBool,
    upgrade_active: AtomicBool,
}

impl Default for MockToggles {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToggles {
    /// Create toggles in the usual test posture.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            mempool_signing: AtomicBool::new(true),
            reject_conflicting: AtomicBool::new(true),
            masternode: AtomicBool::new(true),
            synced: AtomicBool::new(true),
            chain_locks: AtomicBool::new(false),
            upgrade_active: AtomicBool::new(false),
        }
    }

    /// Switch the whole subsystem on or off.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Release);
    }

    /// Switch mempool signing on or off.
    pub fn set_mempool_signing(&self, on: bool) {
        self.mempool_signing.store(on, Ordering::Release);
    }

    /// Switch masternode mode on or off.
    pub fn set_masternode(&self, on: bool) {
        self.masternode.store(on, Ordering::Release);
    }

    /// Switch ChainLocks on or off.
    pub fn set_chain_locks(&self, on: bool) {
        self.chain_locks.store(on, Ordering::Release);
    }

    /// Activate the one-time DB migration.
    pub fn set_upgrade_active(&self, on: bool) {
        self.upgrade_active.store(on, Ordering::Release);
    }
}

impl RuntimeToggles for MockToggles {
    fn instant_send_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn mempool_signing_enabled(&self) -> bool {
        self.mempool_signing.load(Ordering::Acquire)
    }

    fn reject_conflicting_blocks(&self) -> bool {
        self.reject_conflicting.load(Ordering::Acquire)
    }

    fn is_masternode(&self) -> bool {
        self.masternode.load(Ordering::Acquire)
    }

    fn is_blockchain_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn chain_locks_enabled(&self) -> bool {
        self.chain_locks.load(Ordering::Acquire)
    }

    fn db_upgrade_active(&self, _tip: &BlockRef) -> bool {
        self.upgrade_active.load(Ordering::Acquire)
    }
}
