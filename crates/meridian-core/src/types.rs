use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Ledger sequence number. Genesis is 1.
pub type LedgerIndex = u32;

/// Seconds since the network epoch (2000-01-01 00:00:00 UTC).
pub type NetClock = u32;

/// Offset of the network epoch from the Unix epoch, in seconds.
pub const NET_EPOCH_OFFSET: i64 = 946_684_800;

// ── Hash256 ──────────────────────────────────────────────────────────────────

/// 32-byte cryptographic digest. Identifies ledgers, transactions, state
/// entries and tree nodes alike.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The key nibble at `depth` (0 = most significant half of byte 0).
    pub fn nibble(&self, depth: usize) -> u8 {
        let byte = self.0[depth / 2];
        if depth % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|_| CoreError::BadHex(s.into()))?;
        if bytes.len() != 32 {
            return Err(CoreError::BadHex(s.into()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Bytewise XOR, used to salt canonical transaction ordering.
    pub fn xor(&self, other: &Hash256) -> Hash256 {
        let mut out = [0u8; 32];
        for i in 0..32 {
            out[i] = self.0[i] ^ other.0[i];
        }
        Hash256(out)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({}…)", &self.to_hex()[..16])
    }
}

// ── Hash160 ──────────────────────────────────────────────────────────────────

/// 20-byte digest: RIPEMD-160(SHA-256(x)). Account identifiers and currency
/// codes share this width.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub const ZERO: Hash160 = Hash160([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash160({})", hex::encode(self.0))
    }
}

// ── Base58 token types ───────────────────────────────────────────────────────

/// Version prefixes for the base58 check-encoded external forms.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenType {
    AccountId = 0x00,
    NodePublic = 0x1C,
    AccountPublic = 0x23,
    FamilySeed = 0x21,
}

const B58_ALPHABET: &bs58::Alphabet = bs58::Alphabet::RIPPLE;

/// Encode `payload` with a 1-byte version tag and double-SHA-256 checksum.
pub fn base58_encode(token: TokenType, payload: &[u8]) -> String {
    bs58::encode(payload)
        .with_alphabet(B58_ALPHABET)
        .with_check_version(token as u8)
        .into_string()
}

/// Decode a checked base58 token, verifying version and checksum. Returns the
/// payload without the version byte.
pub fn base58_decode(token: TokenType, s: &str) -> Result<Vec<u8>, CoreError> {
    let bytes = bs58::decode(s)
        .with_alphabet(B58_ALPHABET)
        .with_check(Some(token as u8))
        .into_vec()
        .map_err(|_| CoreError::BadBase58(s.into()))?;
    Ok(bytes[1..].to_vec())
}

// ── AccountId ────────────────────────────────────────────────────────────────

/// 160-bit account identifier: RIPEMD-160(SHA-256(public key)).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct AccountId(pub [u8; 20]);

impl AccountId {
    pub const ZERO: AccountId = AccountId([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Checked base58 address form ("r…").
    pub fn to_base58(&self) -> String {
        base58_encode(TokenType::AccountId, &self.0)
    }

    pub fn from_base58(s: &str) -> Result<Self, CoreError> {
        let payload = base58_decode(TokenType::AccountId, s)?;
        if payload.len() != 20 {
            return Err(CoreError::BadBase58(s.into()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&payload);
        Ok(Self(arr))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_base58())
    }
}

// ── NodeId ───────────────────────────────────────────────────────────────────

/// Identifies a peer/validator by the 160-bit hash of its node public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

// ── PublicKey bytes ──────────────────────────────────────────────────────────

/// Serialized public key: 33-byte compressed secp256k1, or 0xED-tagged
/// 32-byte ed25519 (33 bytes total).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_ed25519(&self) -> bool {
        self.0.len() == 33 && self.0[0] == 0xED
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibble_order_is_big_endian() {
        let mut b = [0u8; 32];
        b[0] = 0xAB;
        b[1] = 0xCD;
        let h = Hash256::from_bytes(b);
        assert_eq!(h.nibble(0), 0xA);
        assert_eq!(h.nibble(1), 0xB);
        assert_eq!(h.nibble(2), 0xC);
        assert_eq!(h.nibble(3), 0xD);
    }

    #[test]
    fn hash_hex_round_trip() {
        let h = Hash256::from_bytes([0x5A; 32]);
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn xor_is_involutive() {
        let a = Hash256::from_bytes([0x11; 32]);
        let b = Hash256::from_bytes([0xF0; 32]);
        assert_eq!(a.xor(&b).xor(&b), a);
    }

    #[test]
    fn account_base58_round_trip() {
        let id = AccountId::from_bytes([7u8; 20]);
        let s = id.to_base58();
        assert!(s.starts_with('r'));
        assert_eq!(AccountId::from_base58(&s).unwrap(), id);
    }

    #[test]
    fn account_base58_rejects_wrong_version() {
        let id = AccountId::from_bytes([9u8; 20]);
        let as_seed = base58_encode(TokenType::FamilySeed, id.as_bytes());
        assert!(AccountId::from_base58(&as_seed).is_err());
    }
}
