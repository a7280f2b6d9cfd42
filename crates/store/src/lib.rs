//! # Lock database
//!
//! Persistent storage of committed InstantSend locks, with fast lookup by
//! lock hash, txid, and spent outpoint, a height-indexed mined set, and a
//! height-indexed archive of removed locks.
//!
//! The key layout (including the inverse big-endian height encoding) is
//! part of the persisted format; see [`keys`].

pub mod keys;
mod store;

pub use store::{LockStore, StoreError, CURRENT_VERSION};
