//! Foundation types for the InstantSend lock subsystem.
//!
//! This crate provides the types shared by the lock store and the lock
//! manager:
//!
//! - **Primitives**: Hash, BLS keys and signatures, batch verification
//! - **Chain types**: OutPoint, Transaction, Block, BlockRef
//! - **Protocol types**: InstantSendLock (legacy/deterministic), inventory
//!   items, recovered signatures, quorum handles
//! - **Derivations**: request ids and quorum sign hashes
//! - **Codec**: the consensus wire encoding
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod crypto;
mod encode;
mod hash;
mod lock;
mod signing;
mod transaction;

pub use crypto::{batch_verify_distinct, verify_bls, BlsPublicKey, BlsSecretKey, BlsSignature};
pub use encode::{
    put_compact_size, put_var_bytes, read_compact_size, read_vec_len, take, CodecError, Decodable,
    Encodable,
};
pub use hash::{Hash, HexError};
pub use lock::{
    InstantSendLock, Inv, InvType, LockVersion, ISDLOCK_MIN_PROTO_VERSION,
    ISLOCK_MIN_PROTO_VERSION,
};
pub use signing::{
    input_lock_request_id, islock_request_id, sign_hash, LlmqType, PeerId, Quorum, RecoveredSig,
    INPUT_LOCK_REQUEST_TAG, ISLOCK_REQUEST_TAG,
};
pub use transaction::{Block, BlockRef, OutPoint, Transaction, TxOut};
