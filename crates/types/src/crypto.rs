//! BLS12-381 keys, signatures, and batch verification.
//!
//! Thin wrappers around `blst` in the min_pk configuration: 48-byte G1
//! public keys, 96-byte G2 signatures. Recovered threshold signatures
//! arrive from the signing service as plain aggregate signatures and
//! verify under the quorum public key, so no threshold machinery lives
//! here. Batches of pending locks, each signed over its own quorum sign
//! hash, are checked together through [`batch_verify_distinct`].

use std::fmt;

/// Domain separation tag for the BLS basic scheme.
const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

/// A BLS12-381 secret key.
pub struct BlsSecretKey(blst::min_pk::SecretKey);

/// A compressed BLS12-381 G1 public key (48 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsPublicKey(pub [u8; 48]);

/// A compressed BLS12-381 G2 signature (96 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; 96]);

impl BlsSecretKey {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive a keypair from a 32-byte seed.
    ///
    /// Deterministic, so fixtures and simulations get stable keys. The
    /// seed goes through blst's `key_gen`, which maps any value to a
    /// valid scalar.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let sk = blst::min_pk::SecretKey::key_gen(seed, &[]).expect("key_gen should not fail");
        Self(sk)
    }

    /// Derive the public key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.sk_to_pk().compress())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.0.sign(message, BLS_DST, &[]).compress())
    }
}

impl BlsPublicKey {
    /// Parse and group-check the compressed bytes.
    fn to_blst(self) -> Option<blst::min_pk::PublicKey> {
        blst::min_pk::PublicKey::from_bytes(&self.0).ok()
    }

    /// Aggregate several public keys into one.
    ///
    /// Returns `None` if any key fails to parse or the input is empty.
    pub fn aggregate(keys: &[BlsPublicKey]) -> Option<BlsPublicKey> {
        if keys.is_empty() {
            return None;
        }
        let parsed: Option<Vec<_>> = keys.iter().map(|k| k.to_blst()).collect();
        let parsed = parsed?;
        let refs: Vec<&blst::min_pk::PublicKey> = parsed.iter().collect();
        let agg = blst::min_pk::AggregatePublicKey::aggregate(&refs, true).ok()?;
        Some(BlsPublicKey(agg.to_public_key().compress()))
    }
}

impl BlsSignature {
    /// All-zero placeholder signature for tests. Never valid.
    pub const fn zeroed() -> Self {
        Self([0u8; 96])
    }

    fn to_blst(self) -> Option<blst::min_pk::Signature> {
        blst::min_pk::Signature::from_bytes(&self.0).ok()
    }

    /// Whether the bytes deserialize to a valid group element.
    pub fn is_valid(&self) -> bool {
        self.to_blst()
            .map(|sig| sig.validate(true).is_ok())
            .unwrap_or(false)
    }

    /// Aggregate several signatures over the same message into one.
    ///
    /// Returns `None` if any signature fails to parse or the input is empty.
    pub fn aggregate(sigs: &[BlsSignature]) -> Option<BlsSignature> {
        if sigs.is_empty() {
            return None;
        }
        let parsed: Option<Vec<_>> = sigs.iter().map(|s| s.to_blst()).collect();
        let parsed = parsed?;
        let refs: Vec<&blst::min_pk::Signature> = parsed.iter().collect();
        let agg = blst::min_pk::AggregateSignature::aggregate(&refs, true).ok()?;
        Some(BlsSignature(agg.to_signature().compress()))
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({}..)", hex::encode(&self.0[..4]))
    }
}

/// Verify a single BLS signature.
pub fn verify_bls(message: &[u8], pubkey: &BlsPublicKey, signature: &BlsSignature) -> bool {
    let Some(pk) = pubkey.to_blst() else {
        return false;
    };
    let Some(sig) = signature.to_blst() else {
        return false;
    };
    sig.verify(true, message, BLS_DST, &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
}

/// Verify a batch of signatures over pairwise-distinct messages,
/// reporting validity per entry.
///
/// The pending-lock pipeline drains unrelated locks into one batch, each
/// carrying a signature over its own quorum sign hash. The whole batch is
/// first checked with a single randomized pairing equation; only when
/// that check fails is each entry verified on its own, to tell the good
/// locks from the bad ones.
pub fn batch_verify_distinct(
    messages: &[&[u8]],
    signatures: &[BlsSignature],
    pubkeys: &[BlsPublicKey],
) -> Vec<bool> {
    let count = messages.len();
    if signatures.len() != count || pubkeys.len() != count {
        return vec![false; count.max(signatures.len()).max(pubkeys.len())];
    }

    match count {
        0 => vec![],
        // One entry: the combined equation costs as much as verifying it
        // directly.
        1 => vec![verify_bls(messages[0], &pubkeys[0], &signatures[0])],
        _ if verify_batch_combined(messages, signatures, pubkeys) => vec![true; count],
        _ => (0..count)
            .map(|i| verify_bls(messages[i], &pubkeys[i], &signatures[i]))
            .collect(),
    }
}

/// One check over the whole batch. Every entry is weighted by a fresh
/// random scalar before the pairing, so a forged entry cannot cancel
/// against the others except with negligible probability. Accepts iff
/// all entries are valid; says nothing about which entry failed.
fn verify_batch_combined(
    messages: &[&[u8]],
    signatures: &[BlsSignature],
    pubkeys: &[BlsPublicKey],
) -> bool {
    let mut parsed_sigs = Vec::with_capacity(signatures.len());
    let mut parsed_keys = Vec::with_capacity(pubkeys.len());
    for (signature, pubkey) in signatures.iter().zip(pubkeys) {
        match (signature.to_blst(), pubkey.to_blst()) {
            (Some(signature), Some(pubkey)) => {
                parsed_sigs.push(signature);
                parsed_keys.push(pubkey);
            }
            _ => return false,
        }
    }

    let weights: Vec<blst::blst_scalar> = (0..parsed_sigs.len()).map(|_| random_weight()).collect();
    let sig_refs: Vec<_> = parsed_sigs.iter().collect();
    let key_refs: Vec<_> = parsed_keys.iter().collect();

    blst::min_pk::Signature::verify_multiple_aggregate_signatures(
        messages, BLS_DST, &key_refs, true, &sig_refs, true, &weights, 64,
    ) == blst::BLST_ERROR::BLST_SUCCESS
}

/// A random scalar weighting one entry of a combined batch check.
fn random_weight() -> blst::blst_scalar {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    let mut scalar = blst::blst_scalar::default();
    unsafe {
        blst::blst_scalar_from_bendian(&mut scalar, bytes.as_ptr());
    }
    scalar
}
