use meridian_core::Hash256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a node in the tree: a depth and the key bits consumed so
/// far (remaining nibbles zeroed). The root is depth 0 with a zero key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaMapNodeId {
    depth: u8,
    key: Hash256,
}

impl ShaMapNodeId {
    pub const ROOT: ShaMapNodeId = ShaMapNodeId {
        depth: 0,
        key: Hash256::ZERO,
    };

    /// Construct, masking away bits below `depth` nibbles.
    pub fn new(depth: u8, key: Hash256) -> Self {
        debug_assert!(depth <= 64);
        let mut masked = [0u8; 32];
        let full_bytes = (depth / 2) as usize;
        masked[..full_bytes].copy_from_slice(&key.as_bytes()[..full_bytes]);
        if depth % 2 == 1 {
            masked[full_bytes] = key.as_bytes()[full_bytes] & 0xF0;
        }
        Self {
            depth,
            key: Hash256::from_bytes(masked),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn key(&self) -> Hash256 {
        self.key
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// The id of child `branch` one level down.
    pub fn child(&self, branch: u8) -> ShaMapNodeId {
        debug_assert!(branch < 16);
        debug_assert!(self.depth < 64);
        let mut key = *self.key.as_bytes();
        let idx = (self.depth / 2) as usize;
        if self.depth % 2 == 0 {
            key[idx] |= branch << 4;
        } else {
            key[idx] |= branch;
        }
        ShaMapNodeId {
            depth: self.depth + 1,
            key: Hash256::from_bytes(key),
        }
    }

    /// The branch a full key takes from this node.
    pub fn select_branch(&self, key: &Hash256) -> u8 {
        key.nibble(self.depth as usize)
    }

    /// True when `key` lies in this node's subtree.
    pub fn contains(&self, key: &Hash256) -> bool {
        ShaMapNodeId::new(self.depth, *key) == *self
    }

    /// Wire form: depth byte followed by the masked key.
    pub fn to_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = self.depth;
        out[1..].copy_from_slice(self.key.as_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<ShaMapNodeId> {
        if data.len() != 33 || data[0] > 64 {
            return None;
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&data[1..]);
        Some(ShaMapNodeId::new(data[0], Hash256::from_bytes(key)))
    }
}

impl fmt::Debug for ShaMapNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeId(d{}, {})",
            self.depth,
            &hex::encode(&self.key.as_bytes()[..(self.depth as usize + 1) / 2 + 1])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_accumulate_nibbles() {
        let id = ShaMapNodeId::ROOT.child(0xA).child(0xB).child(0xC);
        assert_eq!(id.depth(), 3);
        assert_eq!(id.key().as_bytes()[0], 0xAB);
        assert_eq!(id.key().as_bytes()[1], 0xC0);
    }

    #[test]
    fn select_branch_reads_the_right_nibble() {
        let mut k = [0u8; 32];
        k[0] = 0x5F;
        let key = Hash256::from_bytes(k);
        assert_eq!(ShaMapNodeId::ROOT.select_branch(&key), 5);
        assert_eq!(ShaMapNodeId::ROOT.child(5).select_branch(&key), 0xF);
    }

    #[test]
    fn contains_checks_prefix() {
        let mut k = [0u8; 32];
        k[0] = 0xAB;
        let key = Hash256::from_bytes(k);
        let id = ShaMapNodeId::ROOT.child(0xA);
        assert!(id.contains(&key));
        assert!(!ShaMapNodeId::ROOT.child(0xC).contains(&key));
    }

    #[test]
    fn wire_round_trip() {
        let id = ShaMapNodeId::ROOT.child(1).child(2);
        let bytes = id.to_bytes();
        assert_eq!(ShaMapNodeId::from_bytes(&bytes).unwrap(), id);
    }

    #[test]
    fn construction_masks_low_bits() {
        let key = Hash256::from_bytes([0xFF; 32]);
        let id = ShaMapNodeId::new(1, key);
        assert_eq!(id.key().as_bytes()[0], 0xF0);
        assert_eq!(id.key().as_bytes()[1], 0x00);
    }
}
