//! Signing-session identifiers and sign-hash construction.
//!
//! Request ids fingerprint what a quorum is being asked to sign; the sign
//! hash is the domain-separated message the quorum members actually sign.
//! Both derivations are part of the protocol and must be byte-exact:
//!
//! - `input lock id = H(varbytes("inlock") || outpoint)`
//! - `islock id     = H(varbytes("islock") || inputs)`
//! - `sign hash     = H(llmq_type || quorum_hash || id || msg_hash)`

use crate::crypto::{BlsPublicKey, BlsSignature};
use crate::encode::{put_compact_size, put_var_bytes, Encodable};
use crate::transaction::OutPoint;
use crate::Hash;
use std::fmt;

/// Request-id tag for input lock signing sessions.
pub const INPUT_LOCK_REQUEST_TAG: &[u8] = b"inlock";

/// Request-id tag for transaction lock signing sessions.
pub const ISLOCK_REQUEST_TAG: &[u8] = b"islock";

/// The quorum type used for a signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LlmqType(pub u8);

/// A node on the peer network. Negative ids are reserved;
/// [`PeerId::LOCAL`] marks locks this node produced itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub i64);

impl PeerId {
    /// The local node, used as the source of self-signed locks.
    pub const LOCAL: PeerId = PeerId(-1);

    /// Whether this id refers to the local node.
    pub fn is_local(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A quorum selected for a signing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    /// Hash of the quorum's commitment.
    pub quorum_hash: Hash,
    /// The quorum threshold public key.
    pub public_key: BlsPublicKey,
}

/// A reconstructed threshold signature for a `(id, msg_hash)` pair,
/// as delivered by (or handed back to) the signing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredSig {
    /// Request id of the signing session.
    pub id: Hash,
    /// The message hash that was signed.
    pub msg_hash: Hash,
    /// Hash of the quorum that produced the signature.
    pub quorum_hash: Hash,
    /// The recovered threshold signature.
    pub signature: BlsSignature,
}

fn tagged_hash(tag: &[u8], payload: &[u8]) -> Hash {
    let mut preimage = Vec::with_capacity(1 + tag.len() + payload.len());
    put_var_bytes(&mut preimage, tag);
    preimage.extend_from_slice(payload);
    Hash::from_bytes(&preimage)
}

/// Request id for voting on a single input: `H("inlock" || outpoint)`.
pub fn input_lock_request_id(outpoint: &OutPoint) -> Hash {
    tagged_hash(INPUT_LOCK_REQUEST_TAG, &outpoint.encode())
}

/// Request id for a transaction lock: `H("islock" || inputs)`.
///
/// Depends on the input sequence in transaction order.
pub fn islock_request_id(inputs: &[OutPoint]) -> Hash {
    let mut payload = Vec::with_capacity(9 + inputs.len() * OutPoint::ENCODED_SIZE);
    put_compact_size(&mut payload, inputs.len() as u64);
    for input in inputs {
        input.encode_into(&mut payload);
    }
    tagged_hash(ISLOCK_REQUEST_TAG, &payload)
}

/// The message a quorum signs for a session:
/// `H(llmq_type || quorum_hash || id || msg_hash)`.
pub fn sign_hash(llmq_type: LlmqType, quorum_hash: &Hash, id: &Hash, msg_hash: &Hash) -> Hash {
    Hash::from_parts(&[
        &[llmq_type.0],
        quorum_hash.as_bytes(),
        id.as_bytes(),
        msg_hash.as_bytes(),
    ])
}
