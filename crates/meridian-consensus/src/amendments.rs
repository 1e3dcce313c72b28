use std::collections::{HashMap, HashSet};

use meridian_core::constants::{
    AMENDMENT_MAJORITY_PCT, AMENDMENT_MAJORITY_TIME, FLAG_LEDGER_INTERVAL,
};
use meridian_core::types::{AccountId, Hash256, LedgerIndex, NetClock};
use meridian_protocol::field;
use meridian_protocol::tx::{Transaction, TxType};
use tracing::info;

use crate::validations::Validation;

/// True at the ledgers where amendment and fee transitions may occur.
pub fn is_flag_ledger(seq: LedgerIndex) -> bool {
    seq % FLAG_LEDGER_INTERVAL == 0
}

/// Tracks per-amendment voting across flag-ledger windows. An amendment
/// that holds a supermajority continuously for the hold period activates
/// through an injected pseudo-transaction at the next flag ledger.
pub struct AmendmentTable {
    /// When each amendment first reached (and kept) majority.
    majority_since: HashMap<Hash256, NetClock>,
    /// Hold period before activation, seconds.
    majority_time: u32,
    /// Amendments this node's configuration refuses to follow.
    vetoed: HashSet<Hash256>,
}

impl Default for AmendmentTable {
    fn default() -> Self {
        Self::new(AMENDMENT_MAJORITY_TIME)
    }
}

impl AmendmentTable {
    pub fn new(majority_time: u32) -> Self {
        Self {
            majority_since: HashMap::new(),
            majority_time,
            vetoed: HashSet::new(),
        }
    }

    pub fn veto(&mut self, amendment: Hash256) {
        self.vetoed.insert(amendment);
    }

    /// Process the trusted validations observed at a flag ledger and emit
    /// the Amendment pseudo-transactions to inject into the next ledger.
    pub fn flag_ledger_actions(
        &mut self,
        validations: &[&Validation],
        trusted_count: usize,
        already_active: &dyn Fn(&Hash256) -> bool,
        close_time: NetClock,
    ) -> Vec<Transaction> {
        let mut votes: HashMap<Hash256, usize> = HashMap::new();
        for validation in validations {
            for amendment in &validation.amendment_votes {
                *votes.entry(*amendment).or_default() += 1;
            }
        }

        // Majority bookkeeping: gained, kept or lost.
        let threshold = trusted_count * AMENDMENT_MAJORITY_PCT as usize;
        let with_majority: HashSet<Hash256> = votes
            .iter()
            .filter(|(_, count)| **count * 100 >= threshold)
            .map(|(amendment, _)| *amendment)
            .collect();
        self.majority_since
            .retain(|amendment, _| with_majority.contains(amendment));
        for amendment in &with_majority {
            self.majority_since.entry(*amendment).or_insert(close_time);
        }

        let mut actions = Vec::new();
        for (amendment, since) in &self.majority_since {
            if already_active(amendment) || self.vetoed.contains(amendment) {
                continue;
            }
            if close_time.saturating_sub(*since) >= self.majority_time {
                info!(%amendment, "amendment majority held; activating");
                let mut tx = Transaction::build(TxType::Amendment, AccountId::ZERO);
                tx.obj_mut().set_h256(&field::SF_AMENDMENT, *amendment);
                actions.push(tx);
            }
        }
        actions
    }
}

/// Median-based fee voting: each validator's wish rides in its validations;
/// at a flag ledger the median of trusted wishes becomes a SetFee
/// pseudo-transaction when it differs from the current schedule.
pub struct FeeVote {
    /// This node's own wish for the reference fee, drops.
    pub target_base_fee: u64,
}

impl FeeVote {
    pub fn new(target_base_fee: u64) -> Self {
        Self { target_base_fee }
    }

    /// The fee vote to attach to our own validations.
    pub fn our_vote(&self, current_base_fee: u64) -> Option<u64> {
        (self.target_base_fee != current_base_fee).then_some(self.target_base_fee)
    }

    /// Tally validator wishes at a flag ledger.
    pub fn flag_ledger_action(
        &self,
        validations: &[&Validation],
        current_base_fee: u64,
    ) -> Option<Transaction> {
        let mut wishes: Vec<u64> = validations
            .iter()
            .map(|v| v.base_fee_vote.unwrap_or(current_base_fee))
            .collect();
        if wishes.is_empty() {
            return None;
        }
        wishes.sort_unstable();
        let median = wishes[wishes.len() / 2];
        if median == current_base_fee {
            return None;
        }
        info!(median, current_base_fee, "fee vote carried");
        let mut tx = Transaction::build(TxType::SetFee, AccountId::ZERO);
        tx.obj_mut().set_u64(&field::SF_BASE_FEE, median);
        Some(tx)
    }
}
