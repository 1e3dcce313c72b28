use meridian_core::Hash256;
use std::fmt;

/// A leaf payload: a 256-bit key and its opaque serialized entry.
#[derive(Clone, PartialEq, Eq)]
pub struct ShaMapItem {
    key: Hash256,
    data: Vec<u8>,
}

impl ShaMapItem {
    pub fn new(key: Hash256, data: Vec<u8>) -> Self {
        Self { key, data }
    }

    pub fn key(&self) -> Hash256 {
        self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for ShaMapItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaMapItem({}, {} bytes)", self.key, self.data.len())
    }
}
