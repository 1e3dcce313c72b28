use std::collections::{BTreeSet, HashMap};

use meridian_core::types::{Hash256, NetClock, NodeId};
use meridian_crypto::hash::prefixed_hash256;
use meridian_core::HashPrefix;
use meridian_crypto::keys::Keypair;
use meridian_ledger::timing::round_close_time;
use meridian_protocol::Serializer;
use tracing::{debug, info};

use crate::dispute::DisputedTx;
use crate::parms::ConsensusParms;
use crate::proposal::Proposal;

/// Phases of one consensus round.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoundPhase {
    /// Collecting candidate transactions into the open set.
    Open,
    /// Exchanging positions and converging on one set.
    Establish,
    /// A supermajority held the same position long enough.
    Accepted,
    /// The round overran its deadline and was abandoned.
    Expired,
}

/// The agreed output of an accepted round.
#[derive(Clone, Debug)]
pub struct RoundResult {
    pub tx_set: Vec<Hash256>,
    pub tx_set_hash: Hash256,
    pub close_time: NetClock,
    pub close_time_agree: bool,
}

/// Digest identifying a candidate transaction set: the sorted transaction
/// ids run through the ledger-master domain.
pub fn tx_set_hash(ids: &BTreeSet<Hash256>) -> Hash256 {
    let mut s = Serializer::new();
    for id in ids {
        s.write_hash256(id);
    }
    prefixed_hash256(HashPrefix::TxNode, s.as_slice())
}

/// One node's consensus round. Callers feed it peer proposals and heartbeat
/// ticks (millisecond timestamps from the round's start) and read out phase
/// transitions.
pub struct ConsensusRound {
    parms: ConsensusParms,
    keypair: Keypair,
    prev_ledger: Hash256,
    prev_close_time: NetClock,
    close_resolution: u32,

    phase: RoundPhase,
    round_start_ms: u64,
    establish_start_ms: Option<u64>,
    /// Expected round duration, seeded from the previous round.
    expected_round_ms: u64,

    our_set: BTreeSet<Hash256>,
    our_close_time: NetClock,
    propose_seq: u32,
    last_position_change_ms: u64,

    peer_proposals: HashMap<NodeId, Proposal>,
    /// Known transaction-set contents by hash, ours included.
    tx_sets: HashMap<Hash256, BTreeSet<Hash256>>,
    disputes: HashMap<Hash256, DisputedTx>,

    result: Option<RoundResult>,
}

impl ConsensusRound {
    pub fn new(
        parms: ConsensusParms,
        keypair: Keypair,
        prev_ledger: Hash256,
        prev_close_time: NetClock,
        close_resolution: u32,
        prev_round_ms: Option<u64>,
        now_ms: u64,
    ) -> Self {
        let expected = prev_round_ms
            .unwrap_or(parms.ledger_idle_interval_ms)
            .max(parms.ledger_min_consensus_ms);
        Self {
            parms,
            keypair,
            prev_ledger,
            prev_close_time,
            close_resolution,
            phase: RoundPhase::Open,
            round_start_ms: now_ms,
            establish_start_ms: None,
            expected_round_ms: expected,
            our_set: BTreeSet::new(),
            our_close_time: 0,
            propose_seq: 0,
            last_position_change_ms: now_ms,
            peer_proposals: HashMap::new(),
            tx_sets: HashMap::new(),
            disputes: HashMap::new(),
            result: None,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn prev_ledger(&self) -> Hash256 {
        self.prev_ledger
    }

    pub fn result(&self) -> Option<&RoundResult> {
        self.result.as_ref()
    }

    pub fn our_position_hash(&self) -> Hash256 {
        tx_set_hash(&self.our_set)
    }

    /// Add a candidate transaction while the ledger is open.
    pub fn add_candidate(&mut self, tx_id: Hash256) {
        if self.phase == RoundPhase::Open {
            self.our_set.insert(tx_id);
        }
    }

    /// Register the contents of a transaction set (ours or a peer's).
    pub fn learn_tx_set(&mut self, ids: BTreeSet<Hash256>) {
        let hash = tx_set_hash(&ids);
        self.tx_sets.insert(hash, ids);
        self.refresh_disputes();
    }

    /// Take in a peer's signed proposal. Stale, unverifiable or wrong-parent
    /// proposals are ignored.
    pub fn on_proposal(&mut self, proposal: Proposal, now_net: NetClock) -> bool {
        if proposal.prev_ledger != self.prev_ledger {
            return false;
        }
        if !proposal.verify() {
            return false;
        }
        if !proposal.is_fresh(now_net, (self.parms.propose_freshness_ms / 1000) as u32) {
            return false;
        }
        let node = proposal.node_id();
        if let Some(existing) = self.peer_proposals.get(&node) {
            if existing.propose_seq >= proposal.propose_seq {
                return false;
            }
        }
        debug!(peer = %node, seq = proposal.propose_seq, set = %proposal.tx_set_hash, "peer proposal");
        self.peer_proposals.insert(node, proposal);
        self.refresh_disputes();
        true
    }

    /// Heartbeat. Returns our new signed proposal when our position forms
    /// or changes.
    pub fn on_timer(&mut self, now_ms: u64, now_net: NetClock) -> Option<Proposal> {
        match self.phase {
            RoundPhase::Open => self.tick_open(now_ms, now_net),
            RoundPhase::Establish => self.tick_establish(now_ms, now_net),
            RoundPhase::Accepted | RoundPhase::Expired => None,
        }
    }

    fn tick_open(&mut self, now_ms: u64, now_net: NetClock) -> Option<Proposal> {
        let elapsed = now_ms - self.round_start_ms;
        let activity = !self.peer_proposals.is_empty() || !self.our_set.is_empty();
        let should_close = if activity {
            elapsed >= self.parms.ledger_min_close_ms
        } else {
            // Nothing happening: idle until the interval expires.
            elapsed >= self.parms.ledger_idle_interval_ms
        };
        if !should_close {
            return None;
        }
        self.phase = RoundPhase::Establish;
        self.establish_start_ms = Some(now_ms);
        self.last_position_change_ms = now_ms;
        self.our_close_time = round_close_time(now_net, self.close_resolution);
        let ids = self.our_set.clone();
        self.learn_tx_set(ids);
        info!(set = %self.our_position_hash(), close = self.our_close_time, "ledger closed; proposing");
        Some(self.make_proposal(now_net))
    }

    fn tick_establish(&mut self, now_ms: u64, now_net: NetClock) -> Option<Proposal> {
        let establish_start = self.establish_start_ms.expect("set on phase entry");
        let elapsed_total = now_ms - self.round_start_ms;
        let elapsed_establish = now_ms - establish_start;

        if elapsed_total >= self.parms.ledger_max_consensus_ms {
            info!("consensus round expired");
            self.phase = RoundPhase::Expired;
            return None;
        }

        // Avalanche: re-vote each dispute at the current threshold.
        let converge_pct = (elapsed_establish as usize * 100)
            / (self.expected_round_ms as usize).max(1);
        let threshold = self.parms.avalanche_threshold(converge_pct);
        let mut changed = false;
        for dispute in self.disputes.values_mut() {
            if dispute.update_vote(threshold) {
                let tx = dispute.tx_id;
                if dispute.our_vote {
                    self.our_set.insert(tx);
                } else {
                    self.our_set.remove(&tx);
                }
                changed = true;
            }
        }
        let proposal = if changed {
            self.propose_seq += 1;
            self.last_position_change_ms = now_ms;
            let ids = self.our_set.clone();
            self.learn_tx_set(ids);
            Some(self.make_proposal(now_net))
        } else {
            None
        };

        // Agreement: enough trusted peers share our exact set, and the
        // position has been stable long enough.
        if self.have_consensus(now_ms) && elapsed_establish >= self.parms.ledger_min_consensus_ms {
            let (close_time, agree) = self.close_time_vote();
            info!(set = %self.our_position_hash(), close_time, agree, "consensus reached");
            self.result = Some(RoundResult {
                tx_set: self.our_set.iter().copied().collect(),
                tx_set_hash: self.our_position_hash(),
                close_time,
                close_time_agree: agree,
            });
            self.phase = RoundPhase::Accepted;
        }
        proposal
    }

    fn have_consensus(&self, now_ms: u64) -> bool {
        let ours = self.our_position_hash();
        let mut agreeing = 1; // ourselves
        let mut total = 1;
        for proposal in self.peer_proposals.values() {
            if proposal.is_bowed_out() {
                continue;
            }
            total += 1;
            if proposal.tx_set_hash == ours {
                agreeing += 1;
            }
        }
        if agreeing * 100 < total * self.parms.min_consensus_pct {
            return false;
        }
        // Stability: our position must have held for the minimum window.
        now_ms.saturating_sub(self.last_position_change_ms) >= self.parms.av_min_consensus_time_ms
    }

    /// Tally effective close times; the most supported wins. Agreement
    /// requires a 75% supermajority, else the flag drops.
    fn close_time_vote(&self) -> (NetClock, bool) {
        let mut votes: HashMap<NetClock, usize> = HashMap::new();
        *votes.entry(self.our_close_time).or_default() += 1;
        let mut total = 1;
        for proposal in self.peer_proposals.values() {
            if proposal.is_bowed_out() {
                continue;
            }
            let effective = round_close_time(proposal.close_time, self.close_resolution);
            *votes.entry(effective).or_default() += 1;
            total += 1;
        }
        let (winner, count) = votes
            .into_iter()
            .max_by_key(|(time, count)| (*count, *time))
            .expect("at least our own vote");
        let agree = count * 100 >= total * self.parms.av_ct_consensus_pct;
        if agree {
            (winner, true)
        } else {
            // No agreement: the ledger closes with whatever we had, flagged.
            (self.our_close_time.max(self.prev_close_time + 1), false)
        }
    }

    fn make_proposal(&self, now_net: NetClock) -> Proposal {
        Proposal::new_signed(
            &self.keypair,
            self.prev_ledger,
            self.our_position_hash(),
            self.our_close_time,
            self.propose_seq,
            now_net,
        )
    }

    /// Rebuild the dispute table: any transaction on which some known set
    /// differs from ours becomes (or stays) disputed, with fresh votes.
    fn refresh_disputes(&mut self) {
        if self.phase == RoundPhase::Open {
            return;
        }
        let ours = self.our_position_hash();
        let our_set = self.our_set.clone();

        let mut candidates: BTreeSet<Hash256> = our_set.iter().copied().collect();
        for proposal in self.peer_proposals.values() {
            if let Some(set) = self.tx_sets.get(&proposal.tx_set_hash) {
                if proposal.tx_set_hash != ours {
                    candidates.extend(set.iter().copied());
                }
            }
        }
        for tx in candidates {
            let ours_vote = our_set.contains(&tx);
            let dispute = self
                .disputes
                .entry(tx)
                .or_insert_with(|| DisputedTx::new(tx, ours_vote));
            for proposal in self.peer_proposals.values() {
                if let Some(set) = self.tx_sets.get(&proposal.tx_set_hash) {
                    dispute.set_vote(proposal.node_id(), set.contains(&tx));
                }
            }
        }
    }
}
