use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

use meridian_core::{Hash160, Hash256, HashPrefix};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// The protocol digest: the first half of SHA-512. Faster than SHA-256 on
/// 64-bit hardware and the full 512-bit state resists length extension.
pub fn sha512_half(data: &[u8]) -> Hash256 {
    let digest: [u8; 64] = Sha512::digest(data).into();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash256::from_bytes(out)
}

/// SHA-512-half over a domain prefix followed by the payload.
pub fn prefixed_hash256(prefix: HashPrefix, data: &[u8]) -> Hash256 {
    let mut hasher = Sha512::new();
    hasher.update(prefix.to_bytes());
    hasher.update(data);
    let digest: [u8; 64] = hasher.finalize().into();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash256::from_bytes(out)
}

/// Shorthand for the unprefixed protocol digest.
pub fn hash256(data: &[u8]) -> Hash256 {
    sha512_half(data)
}

/// RIPEMD-160(SHA-256(data)): the account-identifier digest.
pub fn hash160(data: &[u8]) -> Hash160 {
    let inner = sha256(data);
    let digest: [u8; 20] = Ripemd160::digest(inner).into();
    Hash160::from_bytes(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_half_is_prefix_of_sha512() {
        let full: [u8; 64] = Sha512::digest(b"meridian").into();
        let half = sha512_half(b"meridian");
        assert_eq!(half.as_bytes(), &full[..32]);
    }

    #[test]
    fn prefix_separates_domains() {
        let a = prefixed_hash256(HashPrefix::TransactionId, b"x");
        let b = prefixed_hash256(HashPrefix::LeafNode, b"x");
        assert_ne!(a, b);
    }

    #[test]
    fn hash160_is_20_bytes_and_stable() {
        let h1 = hash160(b"key material");
        let h2 = hash160(b"key material");
        assert_eq!(h1, h2);
        assert_ne!(h1, Hash160::ZERO);
    }
}
