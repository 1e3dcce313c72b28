use std::collections::HashMap;

use meridian_core::types::{Hash256, NodeId};
use tracing::trace;

/// A transaction the peers disagree about: per-peer votes plus our own,
/// re-evaluated each avalanche tick against the tightening threshold.
#[derive(Clone, Debug)]
pub struct DisputedTx {
    pub tx_id: Hash256,
    pub our_vote: bool,
    votes: HashMap<NodeId, bool>,
}

impl DisputedTx {
    pub fn new(tx_id: Hash256, our_vote: bool) -> Self {
        Self {
            tx_id,
            our_vote,
            votes: HashMap::new(),
        }
    }

    /// Record `peer`'s inclusion vote. Returns true if it changed.
    pub fn set_vote(&mut self, peer: NodeId, vote: bool) -> bool {
        self.votes.insert(peer, vote) != Some(vote)
    }

    pub fn unvote(&mut self, peer: &NodeId) {
        self.votes.remove(peer);
    }

    pub fn yes_votes(&self) -> usize {
        self.votes.values().filter(|v| **v).count()
    }

    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    /// Re-evaluate our vote against the avalanche threshold. Our own
    /// current vote participates in the weight, mirroring what every peer
    /// computes about the set. Returns true when our vote flipped.
    pub fn update_vote(&mut self, threshold_pct: usize) -> bool {
        let yes = self.yes_votes() + usize::from(self.our_vote);
        let total = self.total_votes() + 1;
        let weight = yes * 100 / total;
        let new_vote = weight > threshold_pct;
        let changed = new_vote != self.our_vote;
        if changed {
            trace!(tx = %self.tx_id, weight, threshold_pct, new_vote, "dispute vote flipped");
            self.our_vote = new_vote;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: u8) -> NodeId {
        NodeId::from_bytes([tag; 20])
    }

    #[test]
    fn minority_tx_is_dropped_as_threshold_rises() {
        // We vote yes; four peers vote no.
        let mut dispute = DisputedTx::new(Hash256::from_bytes([7; 32]), true);
        for i in 0..4 {
            dispute.set_vote(node(i), false);
        }
        // Weight = 1/5 = 20%: below even the initial 50% bar.
        assert!(dispute.update_vote(50));
        assert!(!dispute.our_vote);
    }

    #[test]
    fn majority_tx_is_kept() {
        let mut dispute = DisputedTx::new(Hash256::from_bytes([7; 32]), false);
        for i in 0..4 {
            dispute.set_vote(node(i), true);
        }
        // Weight = 4/5 = 80% > 50: we adopt it.
        assert!(dispute.update_vote(50));
        assert!(dispute.our_vote);
        // Unanimous now (5/5): stable even at the stuck threshold.
        assert!(!dispute.update_vote(95));
        assert!(dispute.our_vote);
    }

    #[test]
    fn revote_replaces() {
        let mut dispute = DisputedTx::new(Hash256::ZERO, true);
        assert!(dispute.set_vote(node(1), true));
        assert!(!dispute.set_vote(node(1), true));
        assert!(dispute.set_vote(node(1), false));
        assert_eq!(dispute.total_votes(), 1);
    }
}
