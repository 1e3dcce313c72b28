pub mod hash;
pub mod keys;

pub use hash::{hash160, hash256, prefixed_hash256, sha256, sha512_half};
pub use keys::{account_id_from_public, KeyType, Keypair, Seed};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid seed")]
    BadSeed,

    #[error("invalid public key encoding")]
    BadPublicKey,

    #[error("invalid secret key")]
    BadSecretKey,

    #[error("invalid signature encoding")]
    BadSignature,

    #[error("seed exhausted the key derivation search")]
    DerivationFailed,
}
