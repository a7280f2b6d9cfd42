//! Test helpers for the InstantSend subsystem - properly-signed fixtures
//! and in-memory mock collaborators.
//!
//! [`TestQuorum`] provides deterministic BLS member keys and produces real
//! aggregate signatures, so tests exercise the actual verification paths
//! rather than bypassing them with `BlsSignature::zeroed()`. The [`mocks`]
//! module implements every collaborator trait of the lock manager with
//! recording in-memory state.

pub mod mocks;

use instantlock_types::{
    sign_hash, BlsPublicKey, BlsSecretKey, BlsSignature, Hash, LlmqType, OutPoint, Quorum,
    RecoveredSig, Transaction, TxOut,
};
use std::sync::Arc;

/// A quorum of test members with deterministic BLS keypairs.
///
/// The quorum public key is the aggregate of all member keys, and
/// [`TestQuorum::sign`] aggregates every member's signature, standing in
/// for a full threshold recovery.
pub struct TestQuorum {
    members: Vec<BlsSecretKey>,
    public_keys: Vec<BlsPublicKey>,
    quorum_hash: Hash,
}

impl TestQuorum {
    /// Create a quorum of `size` members with keys derived from `seed`.
    pub fn new(size: usize, seed: u64) -> Self {
        let mut members = Vec::with_capacity(size);
        let mut public_keys = Vec::with_capacity(size);
        for i in 0..size {
            let mut seed_bytes = [0u8; 32];
            seed_bytes[..8].copy_from_slice(&seed.to_le_bytes());
            seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
            let key = BlsSecretKey::from_seed(&seed_bytes);
            public_keys.push(key.public_key());
            members.push(key);
        }
        let quorum_hash = Hash::from_parts(&[b"quorum", &seed.to_le_bytes()]);
        Self {
            members,
            public_keys,
            quorum_hash,
        }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The quorum commitment hash.
    pub fn quorum_hash(&self) -> Hash {
        self.quorum_hash
    }

    /// The quorum handle handed out by the signing service.
    pub fn quorum(&self) -> Quorum {
        Quorum {
            quorum_hash: self.quorum_hash,
            public_key: BlsPublicKey::aggregate(&self.public_keys)
                .expect("aggregating member keys"),
        }
    }

    /// Aggregate signature of all members over `message`.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let sigs: Vec<BlsSignature> = self.members.iter().map(|m| m.sign(message)).collect();
        BlsSignature::aggregate(&sigs).expect("aggregating member signatures")
    }

    /// Aggregate signature over the session sign hash for
    /// `(id, msg_hash)`, as the signing service would recover it.
    pub fn sign_session(&self, llmq_type: LlmqType, id: &Hash, msg_hash: &Hash) -> BlsSignature {
        let message = sign_hash(llmq_type, &self.quorum_hash, id, msg_hash);
        self.sign(message.as_bytes())
    }

    /// A full recovered signature for a session signed by this quorum.
    pub fn recovered_sig(&self, llmq_type: LlmqType, id: Hash, msg_hash: Hash) -> RecoveredSig {
        RecoveredSig {
            id,
            msg_hash,
            quorum_hash: self.quorum_hash,
            signature: self.sign_session(llmq_type, &id, &msg_hash),
        }
    }
}

/// Build a transaction spending `inputs`, salted so equal input sets
/// still produce distinct txids.
pub fn make_tx(inputs: Vec<OutPoint>, salt: u64) -> Arc<Transaction> {
    Arc::new(Transaction {
        version: 2,
        inputs,
        outputs: vec![TxOut { value: salt }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use instantlock_types::verify_bls;

    #[test]
    fn test_quorum_is_deterministic() {
        let a = TestQuorum::new(3, 42);
        let b = TestQuorum::new(3, 42);
        assert_eq!(a.quorum(), b.quorum());

        let c = TestQuorum::new(3, 43);
        assert_ne!(a.quorum().public_key, c.quorum().public_key);
    }

    #[test]
    fn test_quorum_signature_verifies() {
        let quorum = TestQuorum::new(4, 7);
        let message = b"session message";
        let sig = quorum.sign(message);
        assert!(verify_bls(message, &quorum.quorum().public_key, &sig));
    }

    #[test]
    fn test_session_signature_matches_sign_hash() {
        let quorum = TestQuorum::new(4, 7);
        let llmq_type = LlmqType(1);
        let id = Hash::from_bytes(b"id");
        let msg_hash = Hash::from_bytes(b"msg");

        let sig = quorum.sign_session(llmq_type, &id, &msg_hash);
        let message = sign_hash(llmq_type, &quorum.quorum_hash(), &id, &msg_hash);
        assert!(verify_bls(
            message.as_bytes(),
            &quorum.quorum().public_key,
            &sig
        ));
    }

    #[test]
    fn test_make_tx_salts_txids() {
        let input = OutPoint::new(Hash::from_bytes(b"parent"), 0);
        assert_ne!(
            make_tx(vec![input], 1).txid(),
            make_tx(vec![input], 2).txid()
        );
    }
}
