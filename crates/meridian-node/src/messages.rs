use serde::{Deserialize, Serialize};
use thiserror::Error;

use meridian_consensus::{Proposal, Validation};
use meridian_core::types::{Hash256, LedgerIndex, NetClock};
use meridian_shamap::ShaMapNodeId;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short")]
    Truncated,

    #[error("frame length {0} exceeds the cap")]
    Oversize(u32),

    #[error("undecodable message: {0}")]
    Codec(String),
}

/// Largest accepted frame, bytes.
const MAX_FRAME: u32 = 64 * 1024 * 1024;

/// What a ledger-data request wants walked.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum LedgerInfoType {
    /// The ledger header.
    Base,
    /// Nodes of the transaction map.
    TxNode,
    /// Nodes of the account-state map.
    AsNode,
}

/// The typed peer messages of the protocol. The real transport frames them
/// length-prefixed; in-process they travel over channels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Version handshake. The session proof binds the hello to the
    /// transport's shared secret; timestamps have a bounded skew window.
    Hello {
        version: u32,
        chain_id: u32,
        node_public: Vec<u8>,
        session_proof: Vec<u8>,
        timestamp: NetClock,
    },
    /// A consensus position.
    ProposeSet(Proposal),
    /// A signed validation.
    Validation(Validation),
    /// A relayed candidate transaction (serialized form).
    Transaction(Vec<u8>),
    /// Merkle-sync request for part of a ledger.
    GetLedger {
        ledger_hash: Hash256,
        info_type: LedgerInfoType,
        node_ids: Vec<ShaMapNodeId>,
    },
    /// Fan-out of requested nodes: (node id, wire bytes).
    LedgerData {
        ledger_hash: Hash256,
        info_type: LedgerInfoType,
        nodes: Vec<(ShaMapNodeId, Vec<u8>)>,
    },
    /// Last closed ledger and the range we can serve.
    StatusChange {
        ledger_hash: Hash256,
        ledger_seq: LedgerIndex,
        first_seq: LedgerIndex,
        last_seq: LedgerIndex,
    },
    /// Advertisement that we hold a transaction set.
    HaveSet(Hash256),
}

impl PeerMessage {
    /// Length-prefixed wire form.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let body = bincode::serialize(self).map_err(|e| WireError::Codec(e.to_string()))?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one frame; returns the message and bytes consumed.
    pub fn from_frame(data: &[u8]) -> Result<(PeerMessage, usize), WireError> {
        if data.len() < 4 {
            return Err(WireError::Truncated);
        }
        let len = u32::from_be_bytes(data[..4].try_into().expect("checked"));
        if len > MAX_FRAME {
            return Err(WireError::Oversize(len));
        }
        let end = 4 + len as usize;
        if data.len() < end {
            return Err(WireError::Truncated);
        }
        let message =
            bincode::deserialize(&data[4..end]).map_err(|e| WireError::Codec(e.to_string()))?;
        Ok((message, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let msg = PeerMessage::HaveSet(Hash256::from_bytes([9; 32]));
        let frame = msg.to_frame().unwrap();
        let (back, used) = PeerMessage::from_frame(&frame).unwrap();
        assert_eq!(used, frame.len());
        assert!(matches!(back, PeerMessage::HaveSet(h) if h == Hash256::from_bytes([9; 32])));
    }

    #[test]
    fn status_change_round_trip() {
        let msg = PeerMessage::StatusChange {
            ledger_hash: Hash256::from_bytes([1; 32]),
            ledger_seq: 42,
            first_seq: 1,
            last_seq: 42,
        };
        let frame = msg.to_frame().unwrap();
        let (back, _) = PeerMessage::from_frame(&frame).unwrap();
        match back {
            PeerMessage::StatusChange {
                ledger_seq,
                last_seq,
                ..
            } => {
                assert_eq!(ledger_seq, 42);
                assert_eq!(last_seq, 42);
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let msg = PeerMessage::HaveSet(Hash256::ZERO);
        let frame = msg.to_frame().unwrap();
        assert!(matches!(
            PeerMessage::from_frame(&frame[..frame.len() - 1]),
            Err(WireError::Truncated)
        ));
        assert!(matches!(
            PeerMessage::from_frame(&[0xFF, 0xFF, 0xFF, 0xFF, 0]),
            Err(WireError::Oversize(_))
        ));
    }
}
