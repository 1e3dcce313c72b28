use meridian_core::types::{Hash256, NetClock, NodeId, PublicKeyBytes};
use meridian_core::HashPrefix;
use meridian_crypto::hash::hash160;
use meridian_crypto::keys::{self, Keypair};
use meridian_protocol::Serializer;
use serde::{Deserialize, Serialize};

/// Sequence number that marks a peer as having bowed out of the round.
pub const PROPOSE_SEQ_BOWED_OUT: u32 = u32::MAX;

/// A peer's signed position for one consensus round: the transaction set it
/// wants in the next ledger and the close time it votes for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub prev_ledger: Hash256,
    pub tx_set_hash: Hash256,
    pub close_time: NetClock,
    pub propose_seq: u32,
    pub signing_time: NetClock,
    pub public_key: PublicKeyBytes,
    pub signature: Vec<u8>,
}

impl Proposal {
    fn signing_bytes(
        prev_ledger: &Hash256,
        tx_set_hash: &Hash256,
        close_time: NetClock,
        propose_seq: u32,
        signing_time: NetClock,
    ) -> Vec<u8> {
        let mut s = Serializer::new();
        s.write_bytes(&HashPrefix::Proposal.to_bytes());
        s.write_u32(propose_seq);
        s.write_u32(close_time);
        s.write_u32(signing_time);
        s.write_hash256(prev_ledger);
        s.write_hash256(tx_set_hash);
        s.into_bytes()
    }

    pub fn new_signed(
        keypair: &Keypair,
        prev_ledger: Hash256,
        tx_set_hash: Hash256,
        close_time: NetClock,
        propose_seq: u32,
        signing_time: NetClock,
    ) -> Proposal {
        let payload =
            Self::signing_bytes(&prev_ledger, &tx_set_hash, close_time, propose_seq, signing_time);
        Proposal {
            prev_ledger,
            tx_set_hash,
            close_time,
            propose_seq,
            signing_time,
            public_key: keypair.public().clone(),
            signature: keypair.sign(&payload),
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(hash160(self.public_key.as_slice()).0)
    }

    pub fn verify(&self) -> bool {
        let payload = Self::signing_bytes(
            &self.prev_ledger,
            &self.tx_set_hash,
            self.close_time,
            self.propose_seq,
            self.signing_time,
        );
        keys::verify(&self.public_key, &payload, &self.signature)
    }

    pub fn is_bowed_out(&self) -> bool {
        self.propose_seq == PROPOSE_SEQ_BOWED_OUT
    }

    /// Freshness window check against the receiver's clock.
    pub fn is_fresh(&self, now: NetClock, freshness_secs: u32) -> bool {
        let age = now.abs_diff(self.signing_time);
        age <= freshness_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_crypto::keys::{KeyType, Seed};

    fn keypair() -> Keypair {
        Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([3; 16])).unwrap()
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = keypair();
        let p = Proposal::new_signed(
            &kp,
            Hash256::from_bytes([1; 32]),
            Hash256::from_bytes([2; 32]),
            1000,
            0,
            1000,
        );
        assert!(p.verify());
        assert_eq!(p.node_id(), kp.node_id());
    }

    #[test]
    fn tampered_proposal_fails() {
        let kp = keypair();
        let mut p = Proposal::new_signed(
            &kp,
            Hash256::from_bytes([1; 32]),
            Hash256::from_bytes([2; 32]),
            1000,
            0,
            1000,
        );
        p.close_time += 1;
        assert!(!p.verify());
    }

    #[test]
    fn freshness_window() {
        let kp = keypair();
        let p = Proposal::new_signed(
            &kp,
            Hash256::ZERO,
            Hash256::ZERO,
            1000,
            0,
            1000,
        );
        assert!(p.is_fresh(1010, 20));
        assert!(!p.is_fresh(1030, 20));
    }
}
