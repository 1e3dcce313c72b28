use once_cell::sync::Lazy;
use rand::RngCore;
use secp256k1::{ecdsa, Message, Scalar, Secp256k1, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use meridian_core::types::{base58_decode, base58_encode, AccountId, NodeId, PublicKeyBytes, TokenType};

use crate::hash::{hash160, sha512_half};
use crate::CryptoError;

static SECP: Lazy<Secp256k1<secp256k1::All>> = Lazy::new(Secp256k1::new);

/// Signature schemes supported for account and node keys.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyType {
    Secp256k1,
    Ed25519,
}

// ── Seed ─────────────────────────────────────────────────────────────────────

/// 128-bit key-derivation seed. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 16]);

impl Seed {
    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(b)
    }

    pub fn random() -> Self {
        let mut b = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut b);
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Checked base58 form ("s…").
    pub fn to_base58(&self) -> String {
        base58_encode(TokenType::FamilySeed, &self.0)
    }

    pub fn from_base58(s: &str) -> Result<Self, CryptoError> {
        let payload = base58_decode(TokenType::FamilySeed, s).map_err(|_| CryptoError::BadSeed)?;
        if payload.len() != 16 {
            return Err(CryptoError::BadSeed);
        }
        let mut b = [0u8; 16];
        b.copy_from_slice(&payload);
        Ok(Self(b))
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed(…)")
    }
}

// ── Keypair ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum SecretMaterial {
    Secp256k1(SecretKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// A signing keypair of either scheme, with the serialized public form
/// cached (33-byte compressed secp256k1, or 0xED-tagged ed25519).
#[derive(Clone)]
pub struct Keypair {
    key_type: KeyType,
    secret: SecretMaterial,
    public: PublicKeyBytes,
}

impl Keypair {
    /// Deterministic derivation from a seed.
    ///
    /// ed25519 keys come straight from the digest of the seed. secp256k1
    /// searches seed‖counter digests for the first valid root scalar, then
    /// derives account key zero by tweaking the root with a digest of the
    /// root public key, matching the chain-iterated family-key scheme.
    pub fn from_seed(key_type: KeyType, seed: &Seed) -> Result<Self, CryptoError> {
        match key_type {
            KeyType::Ed25519 => {
                let digest = sha512_half(seed.as_bytes());
                let signing = ed25519_dalek::SigningKey::from_bytes(digest.as_bytes());
                let mut public = vec![0xEDu8];
                public.extend_from_slice(signing.verifying_key().as_bytes());
                Ok(Self {
                    key_type,
                    secret: SecretMaterial::Ed25519(signing),
                    public: PublicKeyBytes(public),
                })
            }
            KeyType::Secp256k1 => {
                let root = scan_scalar(|counter| {
                    let mut buf = Vec::with_capacity(20);
                    buf.extend_from_slice(seed.as_bytes());
                    buf.extend_from_slice(&counter.to_be_bytes());
                    buf
                })?;
                let root_public = root.public_key(&SECP).serialize();

                // Account key 0 = root + H(rootPub ‖ 0 ‖ counter).
                let tweak_key = scan_scalar(|counter| {
                    let mut buf = Vec::with_capacity(41);
                    buf.extend_from_slice(&root_public);
                    buf.extend_from_slice(&0u32.to_be_bytes());
                    buf.extend_from_slice(&counter.to_be_bytes());
                    buf
                })?;
                let tweak = Scalar::from_be_bytes(tweak_key.secret_bytes())
                    .map_err(|_| CryptoError::DerivationFailed)?;
                let account = root
                    .add_tweak(&tweak)
                    .map_err(|_| CryptoError::DerivationFailed)?;
                let public = account.public_key(&SECP).serialize().to_vec();
                Ok(Self {
                    key_type,
                    secret: SecretMaterial::Secp256k1(account),
                    public: PublicKeyBytes(public),
                })
            }
        }
    }

    pub fn random(key_type: KeyType) -> Self {
        Keypair::from_seed(key_type, &Seed::random()).expect("random seed derivation")
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn public(&self) -> &PublicKeyBytes {
        &self.public
    }

    pub fn account_id(&self) -> AccountId {
        account_id_from_public(&self.public)
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(hash160(self.public.as_slice()).0)
    }

    /// Sign `message`. secp256k1 signs the SHA-512-half digest and emits a
    /// low-S DER signature; ed25519 signs the raw message.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.secret {
            SecretMaterial::Secp256k1(sk) => {
                let digest = Message::from_digest(*sha512_half(message).as_bytes());
                SECP.sign_ecdsa(&digest, sk).serialize_der().to_vec()
            }
            SecretMaterial::Ed25519(sk) => {
                use ed25519_dalek::Signer;
                sk.sign(message).to_bytes().to_vec()
            }
        }
    }
}

/// Scan counter values until the digest of `material(counter)` is a valid
/// curve scalar. Succeeds within a couple of iterations in practice.
fn scan_scalar(material: impl Fn(u32) -> Vec<u8>) -> Result<SecretKey, CryptoError> {
    for counter in 0u32..=0xFF {
        let digest = sha512_half(&material(counter));
        if let Ok(sk) = SecretKey::from_slice(digest.as_bytes()) {
            return Ok(sk);
        }
    }
    Err(CryptoError::DerivationFailed)
}

// ── Verification ─────────────────────────────────────────────────────────────

/// Verify `signature` over `message` by `public`. High-S secp256k1
/// signatures are rejected as non-canonical.
pub fn verify(public: &PublicKeyBytes, message: &[u8], signature: &[u8]) -> bool {
    if public.is_ed25519() {
        let Ok(key_bytes) = <&[u8; 32]>::try_from(&public.as_slice()[1..33]) else {
            return false;
        };
        let Ok(vk) = ed25519_dalek::VerifyingKey::from_bytes(key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <&[u8; 64]>::try_from(signature) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(sig_bytes);
        vk.verify_strict(message, &sig).is_ok()
    } else {
        let Ok(pk) = secp256k1::PublicKey::from_slice(public.as_slice()) else {
            return false;
        };
        let Ok(sig) = ecdsa::Signature::from_der(signature) else {
            return false;
        };
        let digest = Message::from_digest(*sha512_half(message).as_bytes());
        SECP.verify_ecdsa(&digest, &sig, &pk).is_ok()
    }
}

/// AccountId = RIPEMD-160(SHA-256(serialized public key)).
pub fn account_id_from_public(public: &PublicKeyBytes) -> AccountId {
    AccountId::from_bytes(hash160(public.as_slice()).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let seed = Seed::from_bytes([42u8; 16]);
        for kt in [KeyType::Secp256k1, KeyType::Ed25519] {
            let a = Keypair::from_seed(kt, &seed).unwrap();
            let b = Keypair::from_seed(kt, &seed).unwrap();
            assert_eq!(a.public(), b.public());
            assert_eq!(a.account_id(), b.account_id());
        }
    }

    #[test]
    fn ed25519_public_is_tagged() {
        let kp = Keypair::from_seed(KeyType::Ed25519, &Seed::from_bytes([1u8; 16])).unwrap();
        assert_eq!(kp.public().as_slice().len(), 33);
        assert_eq!(kp.public().as_slice()[0], 0xED);
        assert!(kp.public().is_ed25519());
    }

    #[test]
    fn secp256k1_public_is_compressed() {
        let kp = Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([1u8; 16])).unwrap();
        assert_eq!(kp.public().as_slice().len(), 33);
        assert!(matches!(kp.public().as_slice()[0], 0x02 | 0x03));
    }

    #[test]
    fn sign_verify_round_trip() {
        for kt in [KeyType::Secp256k1, KeyType::Ed25519] {
            let kp = Keypair::from_seed(kt, &Seed::from_bytes([7u8; 16])).unwrap();
            let sig = kp.sign(b"hello ledger");
            assert!(verify(kp.public(), b"hello ledger", &sig));
            assert!(!verify(kp.public(), b"hello ledgerX", &sig));
        }
    }

    #[test]
    fn cross_key_verification_fails() {
        let a = Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([1u8; 16])).unwrap();
        let b = Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([2u8; 16])).unwrap();
        let sig = a.sign(b"msg");
        assert!(!verify(b.public(), b"msg", &sig));
    }

    #[test]
    fn seed_base58_round_trip() {
        let seed = Seed::from_bytes([9u8; 16]);
        let s = seed.to_base58();
        assert!(s.starts_with('s'));
        let back = Seed::from_base58(&s).unwrap();
        assert_eq!(back.as_bytes(), seed.as_bytes());
    }
}
