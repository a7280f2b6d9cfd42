//! Key encoding for the lock database.
//!
//! Every key starts with a length-prefixed tag naming its key space,
//! followed by the payload. Height-indexed key spaces store the height as
//! `be32(u32::MAX - height)` so that an ascending prefix scan starting at a
//! given height walks heights below it in descending order. Both layouts
//! are part of the persisted format and must stay bit-exact.

use instantlock_types::{put_var_bytes, Encodable, Hash, OutPoint};

/// `lock hash -> lock body`.
pub const PREFIX_LOCK_BY_HASH: &[u8] = b"is_i";
/// `txid -> lock hash`.
pub const PREFIX_HASH_BY_TXID: &[u8] = b"is_tx";
/// `spent outpoint -> lock hash`.
pub const PREFIX_HASH_BY_OUTPOINT: &[u8] = b"is_in";
/// `(inverse height, lock hash) -> ()` for locks mined into blocks.
pub const PREFIX_MINED: &[u8] = b"is_m";
/// `(inverse height, lock hash) -> ()` for archived locks.
pub const PREFIX_ARCHIVED_BY_HEIGHT: &[u8] = b"is_a1";
/// `lock hash -> ()` for archived locks.
pub const PREFIX_ARCHIVED_BY_HASH: &[u8] = b"is_a2";
/// Database schema version.
pub const PREFIX_VERSION: &[u8] = b"is_v";

/// The length-prefixed tag that starts every key in a key space.
pub fn tag(prefix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + prefix.len());
    put_var_bytes(&mut key, prefix);
    key
}

fn tagged_with(prefix: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut key = tag(prefix);
    key.extend_from_slice(payload);
    key
}

/// Encode a height so ascending key order is descending height order.
pub fn inverse_height(height: u32) -> [u8; 4] {
    (u32::MAX - height).to_be_bytes()
}

/// Recover a height from its inverse encoding.
pub fn height_from_inverse(bytes: [u8; 4]) -> u32 {
    u32::MAX - u32::from_be_bytes(bytes)
}

/// Key for a lock body.
pub fn lock_by_hash(hash: &Hash) -> Vec<u8> {
    tagged_with(PREFIX_LOCK_BY_HASH, hash.as_bytes())
}

/// Key for the txid index.
pub fn hash_by_txid(txid: &Hash) -> Vec<u8> {
    tagged_with(PREFIX_HASH_BY_TXID, txid.as_bytes())
}

/// Key for the outpoint index.
pub fn hash_by_outpoint(outpoint: &OutPoint) -> Vec<u8> {
    tagged_with(PREFIX_HASH_BY_OUTPOINT, &outpoint.encode())
}

/// Scan prefix covering every outpoint of one parent transaction.
pub fn outpoint_parent_prefix(parent_txid: &Hash) -> Vec<u8> {
    tagged_with(PREFIX_HASH_BY_OUTPOINT, parent_txid.as_bytes())
}

/// Key for the mined index.
pub fn mined(hash: &Hash, height: u32) -> Vec<u8> {
    let mut key = tag(PREFIX_MINED);
    key.extend_from_slice(&inverse_height(height));
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Seek position from which an ascending scan of the mined index visits
/// heights `<= height` in descending order.
pub fn mined_scan_start(height: u32) -> Vec<u8> {
    mined(&Hash::ZERO, height)
}

/// Key for the height-indexed archive.
pub fn archived_by_height(hash: &Hash, height: u32) -> Vec<u8> {
    let mut key = tag(PREFIX_ARCHIVED_BY_HEIGHT);
    key.extend_from_slice(&inverse_height(height));
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Seek position for the height-indexed archive, as for the mined index.
pub fn archived_scan_start(height: u32) -> Vec<u8> {
    archived_by_height(&Hash::ZERO, height)
}

/// Key for the hash-indexed archive.
pub fn archived_by_hash(hash: &Hash) -> Vec<u8> {
    tagged_with(PREFIX_ARCHIVED_BY_HASH, hash.as_bytes())
}

/// Key for the schema version.
pub fn version() -> Vec<u8> {
    tag(PREFIX_VERSION)
}

/// Split a height-indexed key into its height and lock hash, given the
/// key space tag it must carry. Returns `None` for keys of other spaces.
pub fn parse_height_key(prefix: &[u8], key: &[u8]) -> Option<(u32, Hash)> {
    let prefix_tag = tag(prefix);
    let rest = key.strip_prefix(prefix_tag.as_slice())?;
    if rest.len() != 4 + Hash::BYTES {
        return None;
    }
    let height = height_from_inverse([rest[0], rest[1], rest[2], rest[3]]);
    let hash = Hash::from_hash_bytes(&rest[4..]);
    Some((height, hash))
}

/// Split a key from the lock-body space into its lock hash.
pub fn parse_lock_key(key: &[u8]) -> Option<Hash> {
    let prefix_tag = tag(PREFIX_LOCK_BY_HASH);
    let rest = key.strip_prefix(prefix_tag.as_slice())?;
    if rest.len() != Hash::BYTES {
        return None;
    }
    Some(Hash::from_hash_bytes(rest))
}
