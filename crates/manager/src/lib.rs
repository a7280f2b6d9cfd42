//! # InstantSend lock manager
//!
//! The state machine at the core of the InstantSend subsystem: it decides
//! when to vote on a transaction's inputs, aggregates input-lock
//! signatures into a transaction-level lock, verifies and commits locks
//! produced by peers, and reacts when a committed lock contradicts the
//! mempool or the chain.
//!
//! External capabilities (the BLS threshold signing service, chain state,
//! the mempool, the peer network, downstream notifications, and dynamic
//! toggles) are injected through the traits in [`traits`]. A dedicated
//! [`worker::Worker`] thread drives batch verification of received locks
//! and the retry queue.
//!
//! Event flow for a transaction this node locks itself:
//!
//! ```text
//! transaction_added_to_mempool / block_connected
//!   -> process_tx -> check_can_lock -> input-lock sign requests
//!   -> handle_new_recovered_sig (per input) -> try_sign_lock
//!   -> handle_new_recovered_sig (lock) -> pending queue
//!   -> worker: process_pending_locks -> batch verify -> commit
//!   -> relay, conflict resolution, notification
//! ```
//!
//! Peer-delivered locks enter at `process_lock_message` and merge into
//! the same pipeline at the pending queue.

mod config;
mod manager;
mod pending;
mod resolver;
mod tracker;
mod traits;
mod verify;
mod worker;

pub use config::{
    InstantSendConfig, DEFAULT_ARCHIVE_RETENTION_BLOCKS, DEFAULT_CONFIRMATIONS_REQUIRED,
    DEFAULT_DKG_INTERVAL, DEFAULT_KEEP_LOCK_BLOCKS, DEFAULT_PENDING_BATCH_LIMIT,
    DEFAULT_WORKER_INTERVAL_MS,
};
pub use manager::InstantSendManager;
pub use pending::{CreatingLocks, LockDraft, PendingLocks};
pub use tracker::{NonLockedTx, TxTracker};
pub use traits::{
    ChainView, LockNotifier, MempoolView, PeerNetwork, RuntimeToggles, SigningService,
};
pub use worker::Worker;
