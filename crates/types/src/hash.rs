//! 32-byte Blake3 hashes.
//!
//! One hash type serves every identity in the subsystem: txids, block
//! hashes, canonical lock hashes, signing request ids, and quorum sign
//! hashes. [`Hash::from_parts`] feeds several slices through a single
//! hasher, which is how the tagged request-id derivations are built
//! without assembling intermediate buffers.

use std::fmt;

/// A 32-byte Blake3 digest.
///
/// Plain value type: cheap to copy, usable as a map key, and ordered so
/// it can double as a storage sort key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Width of a digest in bytes.
    pub const BYTES: usize = 32;

    /// The all-zero hash. Marks "no hash" in wire fields (a legacy
    /// lock's cycle hash, a null txid) and is never a real digest.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hash a byte string.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    /// Wrap 32 raw digest bytes without hashing them.
    ///
    /// # Panics
    ///
    /// Panics when `bytes` is not exactly 32 bytes long.
    pub fn from_hash_bytes(bytes: &[u8]) -> Self {
        Self(bytes.try_into().expect("raw hash input must be 32 bytes"))
    }

    /// Hash the concatenation of several slices.
    ///
    /// Equivalent to joining the slices and hashing once; used for tagged
    /// derivations like `H("inlock" || outpoint)`.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        if hex.len() != 64 {
            return Err(HexError::BadLength(hex.len()));
        }
        let mut digest = [0u8; 32];
        hex::decode_to_slice(hex, &mut digest).map_err(|_| HexError::BadDigit)?;
        Ok(Self(digest))
    }

    /// Lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Borrow the digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The digest bytes by value.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Whether this is [`Hash::ZERO`].
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Twelve leading nibbles identify a digest in logs.
        write!(f, "Hash({:.12})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hex parse failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// Input was not 64 characters.
    #[error("hex hash must be 64 characters, got {0}")]
    BadLength(usize),

    /// Input held a non-hex character.
    #[error("invalid hex digit")]
    BadDigit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_input_same_digest() {
        let encoded_lock = b"txid || inputs || cycle || sig";
        assert_eq!(Hash::from_bytes(encoded_lock), Hash::from_bytes(encoded_lock));
    }

    #[test]
    fn test_one_byte_difference_changes_digest() {
        assert_ne!(
            Hash::from_bytes(b"outpoint:0"),
            Hash::from_bytes(b"outpoint:1")
        );
    }

    #[test]
    fn test_from_parts_matches_concatenation() {
        // Tagged derivations hash tag and payload as one stream.
        let joined = Hash::from_bytes(b"inlockpayload");
        let parts = Hash::from_parts(&[b"inlock", b"payload"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = Hash::from_bytes(b"request id");
        assert_eq!(Hash::from_hex(&id.to_hex()), Ok(id));
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert_eq!(Hash::from_hex("abcd"), Err(HexError::BadLength(4)));

        let not_hex = "zz".repeat(32);
        assert_eq!(Hash::from_hex(&not_hex), Err(HexError::BadDigit));
    }

    #[test]
    fn test_raw_digest_roundtrip() {
        let digest = Hash::from_bytes(b"lock body");
        assert_eq!(Hash::from_hash_bytes(digest.as_bytes()), digest);
    }

    #[test]
    fn test_zero_marker() {
        assert!(Hash::ZERO.is_zero());
        assert_eq!(Hash::default(), Hash::ZERO);
        // Even hashing nothing yields a real digest, not the marker.
        assert!(!Hash::from_bytes(b"").is_zero());
    }
}
