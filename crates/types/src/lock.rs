//! InstantSend lock messages.
//!
//! Two wire variants exist: the legacy `ISLOCK` and the deterministic
//! `ISDLOCK`, which additionally binds the quorum cycle via `cycle_hash`.
//! The variant is a tagged field, not a type split; the serializer writes
//! `cycle_hash` only for the deterministic variant, and the decoder picks
//! the variant from the message type it was handed.

use crate::crypto::BlsSignature;
use crate::encode::{take, CodecError, Decodable, Encodable};
use crate::signing::islock_request_id;
use crate::transaction::OutPoint;
use crate::Hash;

/// Minimum peer protocol version for legacy `ISLOCK` relay.
pub const ISLOCK_MIN_PROTO_VERSION: u32 = 70214;

/// Minimum peer protocol version for deterministic `ISDLOCK` relay.
pub const ISDLOCK_MIN_PROTO_VERSION: u32 = 70220;

/// Wire variant of an InstantSend lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockVersion {
    /// Legacy lock without a quorum cycle binding.
    Legacy,
    /// Deterministic lock carrying the quorum cycle block hash.
    Deterministic,
}

/// Inventory object kinds the lock subsystem announces or requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    /// A transaction.
    Transaction,
    /// A legacy InstantSend lock.
    IsLock,
    /// A deterministic InstantSend lock.
    IsdLock,
}

/// An inventory item: object kind plus identifying hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inv {
    /// Object kind.
    pub kind: InvType,
    /// Object hash.
    pub hash: Hash,
}

/// A committed InstantSend lock: a quorum threshold signature binding a
/// transaction id to its exact input set.
///
/// Immutable once built. The canonical identity of a lock is the hash of
/// its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantSendLock {
    /// Wire variant.
    pub version: LockVersion,
    /// Id of the locked transaction.
    pub txid: Hash,
    /// Spent outpoints, in the transaction's input order.
    pub inputs: Vec<OutPoint>,
    /// Block hash of the quorum cycle start. Zero for legacy locks.
    pub cycle_hash: Hash,
    /// Aggregate quorum signature over the sign hash of
    /// `(request_id, txid)`.
    pub signature: BlsSignature,
}

impl InstantSendLock {
    /// Build a legacy lock.
    pub fn new_legacy(txid: Hash, inputs: Vec<OutPoint>, signature: BlsSignature) -> Self {
        Self {
            version: LockVersion::Legacy,
            txid,
            inputs,
            cycle_hash: Hash::ZERO,
            signature,
        }
    }

    /// Build a deterministic lock.
    pub fn new_deterministic(
        txid: Hash,
        inputs: Vec<OutPoint>,
        cycle_hash: Hash,
        signature: BlsSignature,
    ) -> Self {
        Self {
            version: LockVersion::Deterministic,
            txid,
            inputs,
            cycle_hash,
            signature,
        }
    }

    /// Whether this is the deterministic variant.
    pub fn is_deterministic(&self) -> bool {
        self.version == LockVersion::Deterministic
    }

    /// The canonical lock hash: hash of the wire encoding.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.encode())
    }

    /// The signing-session request id, derived from the input sequence.
    pub fn request_id(&self) -> Hash {
        islock_request_id(&self.inputs)
    }

    /// The inventory item announcing this lock.
    pub fn inv(&self) -> Inv {
        Inv {
            kind: if self.is_deterministic() {
                InvType::IsdLock
            } else {
                InvType::IsLock
            },
            hash: self.hash(),
        }
    }

    /// The minimum peer protocol version that understands this variant.
    pub fn min_proto_version(&self) -> u32 {
        if self.is_deterministic() {
            ISDLOCK_MIN_PROTO_VERSION
        } else {
            ISLOCK_MIN_PROTO_VERSION
        }
    }

    /// Decode a lock of the given wire variant.
    ///
    /// The variant is carried by the message type (`ISLOCK` vs `ISDLOCK`),
    /// not by the payload, so the caller must supply it.
    pub fn decode_with_version(
        version: LockVersion,
        bytes: &[u8],
    ) -> Result<Self, CodecError> {
        let mut input = bytes;
        let lock = Self::decode_body(version, &mut input)?;
        if !input.is_empty() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(lock)
    }

    /// Decode the lock body from the front of `input`.
    pub fn decode_body(
        version: LockVersion,
        input: &mut &[u8],
    ) -> Result<Self, CodecError> {
        let txid = Hash::decode_from(input)?;
        let inputs = Vec::<OutPoint>::decode_from(input)?;
        let cycle_hash = match version {
            LockVersion::Legacy => Hash::ZERO,
            LockVersion::Deterministic => Hash::decode_from(input)?,
        };
        let sig_bytes = take(input, 96)?;
        let mut sig = [0u8; 96];
        sig.copy_from_slice(sig_bytes);
        Ok(Self {
            version,
            txid,
            inputs,
            cycle_hash,
            signature: BlsSignature(sig),
        })
    }
}

impl Encodable for InstantSendLock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.txid.encode_into(buf);
        self.inputs.encode_into(buf);
        if self.is_deterministic() {
            self.cycle_hash.encode_into(buf);
        }
        buf.extend_from_slice(&self.signature.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> Vec<OutPoint> {
        vec![
            OutPoint::new(Hash::from_bytes(b"parent a"), 0),
            OutPoint::new(Hash::from_bytes(b"parent b"), 1),
        ]
    }

    #[test]
    fn test_legacy_roundtrip() {
        let lock = InstantSendLock::new_legacy(
            Hash::from_bytes(b"tx"),
            sample_inputs(),
            BlsSignature::zeroed(),
        );
        let encoded = lock.encode();
        let decoded = InstantSendLock::decode_with_version(LockVersion::Legacy, &encoded).unwrap();
        assert_eq!(decoded, lock);
        assert_eq!(decoded.hash(), lock.hash());
    }

    #[test]
    fn test_deterministic_roundtrip() {
        let lock = InstantSendLock::new_deterministic(
            Hash::from_bytes(b"tx"),
            sample_inputs(),
            Hash::from_bytes(b"cycle"),
            BlsSignature::zeroed(),
        );
        let encoded = lock.encode();
        let decoded =
            InstantSendLock::decode_with_version(LockVersion::Deterministic, &encoded).unwrap();
        assert_eq!(decoded, lock);
    }

    #[test]
    fn test_variants_encode_differently() {
        let legacy = InstantSendLock::new_legacy(
            Hash::from_bytes(b"tx"),
            sample_inputs(),
            BlsSignature::zeroed(),
        );
        let deterministic = InstantSendLock::new_deterministic(
            Hash::from_bytes(b"tx"),
            sample_inputs(),
            Hash::from_bytes(b"cycle"),
            BlsSignature::zeroed(),
        );
        assert_eq!(legacy.encode().len() + 32, deterministic.encode().len());
        assert_ne!(legacy.hash(), deterministic.hash());
    }

    #[test]
    fn test_request_id_is_input_order_sensitive() {
        let mut inputs = sample_inputs();
        let lock_a = InstantSendLock::new_legacy(
            Hash::from_bytes(b"tx"),
            inputs.clone(),
            BlsSignature::zeroed(),
        );
        inputs.reverse();
        let lock_b =
            InstantSendLock::new_legacy(Hash::from_bytes(b"tx"), inputs, BlsSignature::zeroed());
        assert_ne!(lock_a.request_id(), lock_b.request_id());
    }

    #[test]
    fn test_request_id_ignores_txid_and_signature() {
        let lock_a = InstantSendLock::new_legacy(
            Hash::from_bytes(b"tx a"),
            sample_inputs(),
            BlsSignature::zeroed(),
        );
        let mut sig = [0u8; 96];
        sig[0] = 1;
        let lock_b = InstantSendLock::new_legacy(
            Hash::from_bytes(b"tx b"),
            sample_inputs(),
            BlsSignature(sig),
        );
        assert_eq!(lock_a.request_id(), lock_b.request_id());
    }

    #[test]
    fn test_truncated_decode_fails() {
        let lock = InstantSendLock::new_legacy(
            Hash::from_bytes(b"tx"),
            sample_inputs(),
            BlsSignature::zeroed(),
        );
        let encoded = lock.encode();
        let truncated = &encoded[..encoded.len() - 1];
        assert!(InstantSendLock::decode_with_version(LockVersion::Legacy, truncated).is_err());
    }
}
