use meridian_core::Hash256;

use crate::StoreError;

/// Stored object kinds, written as the fifth byte of the record header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum NodeObjectType {
    Unknown = 0,
    Ledger = 1,
    AccountNode = 3,
    TransactionNode = 4,
}

impl NodeObjectType {
    pub fn from_byte(b: u8) -> Option<NodeObjectType> {
        Some(match b {
            0 => NodeObjectType::Unknown,
            1 => NodeObjectType::Ledger,
            3 => NodeObjectType::AccountNode,
            4 => NodeObjectType::TransactionNode,
            _ => return None,
        })
    }
}

/// A keyed blob in the node store. The key is always the digest of the
/// originating node, never derived from the body on write.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeObject {
    pub key: Hash256,
    pub object_type: NodeObjectType,
    pub body: Vec<u8>,
}

impl NodeObject {
    pub fn new(key: Hash256, object_type: NodeObjectType, body: Vec<u8>) -> Self {
        Self {
            key,
            object_type,
            body,
        }
    }

    /// Record layout: 4 reserved zero bytes, 1 type byte, then the body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.body.len());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.push(self.object_type as u8);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(key: Hash256, record: &[u8]) -> Result<NodeObject, StoreError> {
        if record.len() < 5 || record[..4] != [0, 0, 0, 0] {
            return Err(StoreError::BadHeader);
        }
        let object_type = NodeObjectType::from_byte(record[4]).ok_or(StoreError::BadHeader)?;
        Ok(NodeObject {
            key,
            object_type,
            body: record[5..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let obj = NodeObject::new(
            Hash256::from_bytes([1u8; 32]),
            NodeObjectType::AccountNode,
            vec![5, 6, 7],
        );
        let rec = obj.encode();
        assert_eq!(&rec[..4], &[0, 0, 0, 0]);
        assert_eq!(rec[4], 3);
        let back = NodeObject::decode(obj.key, &rec).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn decode_rejects_short_or_dirty_header() {
        let key = Hash256::ZERO;
        assert!(NodeObject::decode(key, &[0, 0, 0]).is_err());
        assert!(NodeObject::decode(key, &[1, 0, 0, 0, 1, 9]).is_err());
        assert!(NodeObject::decode(key, &[0, 0, 0, 0, 2, 9]).is_err());
    }
}
