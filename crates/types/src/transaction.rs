//! Transaction, outpoint, and block reference types.

use crate::encode::{
    put_compact_size, read_vec_len, CodecError, Decodable, Encodable,
};
use crate::Hash;
use std::fmt;
use std::sync::Arc;

/// A reference to one output of a prior transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Hash of the transaction that created the output.
    pub txid: Hash,
    /// Output index within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// Encoded size: 32-byte txid + 4-byte index.
    pub const ENCODED_SIZE: usize = 36;

    /// Create a new outpoint.
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }
}

impl Encodable for OutPoint {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.txid.encode_into(buf);
        self.index.encode_into(buf);
    }
}

impl Decodable for OutPoint {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let txid = Hash::decode_from(input)?;
        let index = u32::decode_from(input)?;
        Ok(Self { txid, index })
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({}:{})", &self.txid.to_hex()[..8], self.index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", &self.txid.to_hex()[..16], self.index)
    }
}

impl Encodable for Vec<OutPoint> {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        put_compact_size(buf, self.len() as u64);
        for outpoint in self {
            outpoint.encode_into(buf);
        }
    }
}

impl Decodable for Vec<OutPoint> {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let len = read_vec_len(input, OutPoint::ENCODED_SIZE)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(OutPoint::decode_from(input)?);
        }
        Ok(out)
    }
}

/// A transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOut {
    /// Output value in base units.
    pub value: u64,
}

impl Encodable for TxOut {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.value.encode_into(buf);
    }
}

impl Decodable for TxOut {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            value: u64::decode_from(input)?,
        })
    }
}

/// A transaction: a set of spent outpoints and created outputs.
///
/// Only the shape the lock subsystem needs. Transactions with no inputs
/// (coinbase-like) can never be locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction format version.
    pub version: u16,
    /// Spent outpoints, in signature-relevant order.
    pub inputs: Vec<OutPoint>,
    /// Created outputs.
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// The transaction id: hash of the consensus encoding.
    pub fn txid(&self) -> Hash {
        Hash::from_bytes(&self.encode())
    }

    /// The outpoint for output `index` of this transaction.
    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.txid(), index)
    }

    /// Whether this transaction can never be locked (no inputs).
    pub fn is_inputless(&self) -> bool {
        self.inputs.is_empty()
    }
}

impl Encodable for Transaction {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.version.encode_into(buf);
        self.inputs.encode_into(buf);
        put_compact_size(buf, self.outputs.len() as u64);
        for out in &self.outputs {
            out.encode_into(buf);
        }
    }
}

impl Decodable for Transaction {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let version = u16::decode_from(input)?;
        let inputs = Vec::<OutPoint>::decode_from(input)?;
        let len = read_vec_len(input, 8)?;
        let mut outputs = Vec::with_capacity(len);
        for _ in 0..len {
            outputs.push(TxOut::decode_from(input)?);
        }
        Ok(Self {
            version,
            inputs,
            outputs,
        })
    }
}

/// A block's transactions as seen by the lock subsystem.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Transactions in block order.
    pub transactions: Vec<Arc<Transaction>>,
}

/// A block's position in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    /// Block hash.
    pub hash: Hash,
    /// Block height.
    pub height: u32,
}

impl BlockRef {
    /// Create a new block reference.
    pub fn new(hash: Hash, height: u32) -> Self {
        Self { hash, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![
                OutPoint::new(Hash::from_bytes(b"parent a"), 0),
                OutPoint::new(Hash::from_bytes(b"parent b"), 3),
            ],
            outputs: vec![TxOut { value: 5000 }, TxOut { value: 100 }],
        }
    }

    #[test]
    fn test_outpoint_roundtrip() {
        let outpoint = OutPoint::new(Hash::from_bytes(b"prev"), 7);
        let encoded = outpoint.encode();
        assert_eq!(encoded.len(), OutPoint::ENCODED_SIZE);
        assert_eq!(OutPoint::decode(&encoded).unwrap(), outpoint);
    }

    #[test]
    fn test_transaction_roundtrip() {
        let tx = sample_tx();
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
    }

    #[test]
    fn test_txid_depends_on_inputs() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.inputs[0].index = 1;
        assert_ne!(tx1.txid(), tx2.txid());
    }

    #[test]
    fn test_txid_depends_on_outputs() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.outputs[0].value += 1;
        assert_ne!(tx1.txid(), tx2.txid());
    }

    #[test]
    fn test_inputless_detection() {
        let coinbase = Transaction {
            version: 2,
            inputs: vec![],
            outputs: vec![TxOut { value: 50 }],
        };
        assert!(coinbase.is_inputless());
        assert!(!sample_tx().is_inputless());
    }
}
