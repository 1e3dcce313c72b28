use std::collections::{HashMap, HashSet};

use meridian_core::types::{Hash256, LedgerIndex, NetClock, NodeId, PublicKeyBytes};
use meridian_core::HashPrefix;
use meridian_crypto::hash::hash160;
use meridian_crypto::keys::{self, Keypair};
use meridian_protocol::Serializer;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Flag bit: the validator considers this a full (not partial) validation.
pub const VALIDATION_FLAG_FULL: u32 = 0x0000_0001;

/// A signed statement that a validator accepted `ledger_hash` at `seq`,
/// optionally carrying fee-change votes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub ledger_hash: Hash256,
    pub seq: LedgerIndex,
    pub signing_time: NetClock,
    pub flags: u32,
    pub public_key: PublicKeyBytes,
    pub signature: Vec<u8>,
    /// Fee-vote payload: proposed reference fee, drops.
    pub base_fee_vote: Option<u64>,
    /// Amendments this validator is voting for.
    pub amendment_votes: Vec<Hash256>,
}

impl Validation {
    fn signing_bytes(
        ledger_hash: &Hash256,
        seq: LedgerIndex,
        signing_time: NetClock,
        flags: u32,
        base_fee_vote: Option<u64>,
        amendment_votes: &[Hash256],
    ) -> Vec<u8> {
        let mut s = Serializer::new();
        s.write_bytes(&HashPrefix::Validation.to_bytes());
        s.write_hash256(ledger_hash);
        s.write_u32(seq);
        s.write_u32(signing_time);
        s.write_u32(flags);
        s.write_u64(base_fee_vote.unwrap_or(0));
        for amendment in amendment_votes {
            s.write_hash256(amendment);
        }
        s.into_bytes()
    }

    pub fn new_signed(
        keypair: &Keypair,
        ledger_hash: Hash256,
        seq: LedgerIndex,
        signing_time: NetClock,
        base_fee_vote: Option<u64>,
        amendment_votes: Vec<Hash256>,
    ) -> Validation {
        let flags = VALIDATION_FLAG_FULL;
        let payload = Self::signing_bytes(
            &ledger_hash,
            seq,
            signing_time,
            flags,
            base_fee_vote,
            &amendment_votes,
        );
        Validation {
            ledger_hash,
            seq,
            signing_time,
            flags,
            public_key: keypair.public().clone(),
            signature: keypair.sign(&payload),
            base_fee_vote,
            amendment_votes,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(hash160(self.public_key.as_slice()).0)
    }

    pub fn verify(&self) -> bool {
        let payload = Self::signing_bytes(
            &self.ledger_hash,
            self.seq,
            self.signing_time,
            self.flags,
            self.base_fee_vote,
            &self.amendment_votes,
        );
        keys::verify(&self.public_key, &payload, &self.signature)
    }

    pub fn is_full(&self) -> bool {
        self.flags & VALIDATION_FLAG_FULL != 0
    }
}

/// Why a validation was not stored.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValidationOutcome {
    Current,
    BadSignature,
    Stale,
    Replaced,
}

/// The trusted validator set (UNL) and its quorum.
#[derive(Clone, Debug, Default)]
pub struct UnlConfig {
    trusted: HashSet<NodeId>,
}

impl UnlConfig {
    pub fn new(trusted: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }

    pub fn is_trusted(&self, node: &NodeId) -> bool {
        self.trusted.contains(node)
    }

    pub fn len(&self) -> usize {
        self.trusted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty()
    }

    /// 80% of the trusted set, rounded up.
    pub fn quorum(&self) -> usize {
        (self.trusted.len() * 80).div_ceil(100)
    }
}

/// Collects validations keyed by signer, keeping only each signer's most
/// recent statement, and answers preferred-ledger queries over the trusted
/// subset.
pub struct Validations {
    unl: UnlConfig,
    /// Freshness window, seconds of network time.
    freshness_secs: u32,
    by_node: HashMap<NodeId, Validation>,
}

impl Validations {
    pub fn new(unl: UnlConfig, freshness_secs: u32) -> Self {
        Self {
            unl,
            freshness_secs,
            by_node: HashMap::new(),
        }
    }

    pub fn unl(&self) -> &UnlConfig {
        &self.unl
    }

    /// Store a received validation, newest-wins per signer.
    pub fn add(&mut self, validation: Validation, now: NetClock) -> ValidationOutcome {
        if !validation.verify() {
            return ValidationOutcome::BadSignature;
        }
        if validation.signing_time.abs_diff(now) > self.freshness_secs {
            return ValidationOutcome::Stale;
        }
        let node = validation.node_id();
        if let Some(existing) = self.by_node.get(&node) {
            if existing.signing_time >= validation.signing_time {
                return ValidationOutcome::Replaced;
            }
        }
        debug!(node = %node, seq = validation.seq, hash = %validation.ledger_hash, "validation stored");
        self.by_node.insert(node, validation);
        ValidationOutcome::Current
    }

    /// Snapshot of the current trusted validations (amendment and fee
    /// votes ride on these).
    pub fn current_trusted(&self) -> Vec<Validation> {
        self.by_node
            .values()
            .filter(|v| self.unl.is_trusted(&v.node_id()))
            .cloned()
            .collect()
    }

    /// Trusted validations currently naming `ledger`.
    pub fn support_for(&self, ledger: &Hash256) -> usize {
        self.by_node
            .values()
            .filter(|v| v.ledger_hash == *ledger && self.unl.is_trusted(&v.node_id()))
            .count()
    }

    /// The ledger with the highest trusted support; ties break to the
    /// higher sequence, then the lexicographically greater hash.
    pub fn preferred_ledger(&self) -> Option<(Hash256, LedgerIndex, usize)> {
        let mut tally: HashMap<Hash256, (LedgerIndex, usize)> = HashMap::new();
        for validation in self.by_node.values() {
            if !self.unl.is_trusted(&validation.node_id()) {
                continue;
            }
            let entry = tally
                .entry(validation.ledger_hash)
                .or_insert((validation.seq, 0));
            entry.1 += 1;
        }
        tally
            .into_iter()
            .max_by_key(|(hash, (seq, count))| (*count, *seq, *hash))
            .map(|(hash, (seq, count))| (hash, seq, count))
    }

    /// Full validation: quorum reached and no equally-supported competitor
    /// at the same sequence.
    pub fn is_fully_validated(&self, ledger: &Hash256, seq: LedgerIndex) -> bool {
        let support = self.support_for(ledger);
        if support < self.unl.quorum() {
            return false;
        }
        // A fork with equal or better support blocks full validation.
        let mut tally: HashMap<Hash256, usize> = HashMap::new();
        for validation in self.by_node.values() {
            if validation.seq == seq && self.unl.is_trusted(&validation.node_id()) {
                *tally.entry(validation.ledger_hash).or_default() += 1;
            }
        }
        !tally
            .iter()
            .any(|(hash, count)| hash != ledger && *count >= support)
    }
}

/// Walk two ledger histories back to their highest common ancestor using a
/// parent resolver; returns `None` when the histories never meet (distinct
/// chains, a hard fork signal).
pub fn common_ancestor(
    mut a: (Hash256, LedgerIndex),
    mut b: (Hash256, LedgerIndex),
    resolve_parent: impl Fn(&Hash256) -> Option<(Hash256, LedgerIndex)>,
) -> Option<Hash256> {
    loop {
        if a.0 == b.0 {
            return Some(a.0);
        }
        if a.1 == 0 || b.1 == 0 {
            return None;
        }
        // Step the deeper chain up; on ties step both.
        if a.1 >= b.1 {
            a = resolve_parent(&a.0)?;
        } else {
            b = resolve_parent(&b.0)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_crypto::keys::{KeyType, Seed};

    fn keypair(tag: u8) -> Keypair {
        Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([tag; 16])).unwrap()
    }

    fn ledger(tag: u8) -> Hash256 {
        Hash256::from_bytes([tag; 32])
    }

    fn collector(validators: &[Keypair]) -> Validations {
        let unl = UnlConfig::new(validators.iter().map(|kp| kp.node_id()));
        Validations::new(unl, 300)
    }

    #[test]
    fn quorum_is_eighty_percent_rounded_up() {
        let unl = UnlConfig::new((0..5u8).map(|i| NodeId::from_bytes([i; 20])));
        assert_eq!(unl.quorum(), 4);
        let unl = UnlConfig::new((0..6u8).map(|i| NodeId::from_bytes([i; 20])));
        assert_eq!(unl.quorum(), 5);
    }

    #[test]
    fn newest_validation_per_signer_wins() {
        let kps: Vec<Keypair> = (1..=3).map(keypair).collect();
        let mut vals = collector(&kps);
        let old = Validation::new_signed(&kps[0], ledger(1), 5, 100, None, vec![]);
        let newer = Validation::new_signed(&kps[0], ledger(2), 6, 200, None, vec![]);
        assert_eq!(vals.add(old.clone(), 150), ValidationOutcome::Current);
        assert_eq!(vals.add(newer, 250), ValidationOutcome::Current);
        // Replaying the older one is refused.
        assert_eq!(vals.add(old, 250), ValidationOutcome::Replaced);
        assert_eq!(vals.support_for(&ledger(2)), 1);
        assert_eq!(vals.support_for(&ledger(1)), 0);
    }

    #[test]
    fn preferred_and_fully_validated() {
        let kps: Vec<Keypair> = (1..=5).map(keypair).collect();
        let mut vals = collector(&kps);
        for kp in &kps[..4] {
            let v = Validation::new_signed(kp, ledger(7), 10, 100, None, vec![]);
            assert_eq!(vals.add(v, 100), ValidationOutcome::Current);
        }
        let dissent = Validation::new_signed(&kps[4], ledger(8), 10, 100, None, vec![]);
        vals.add(dissent, 100);

        let (hash, seq, count) = vals.preferred_ledger().unwrap();
        assert_eq!(hash, ledger(7));
        assert_eq!(seq, 10);
        assert_eq!(count, 4);
        assert!(vals.is_fully_validated(&ledger(7), 10));
        assert!(!vals.is_fully_validated(&ledger(8), 10));
    }

    #[test]
    fn equal_support_fork_blocks_full_validation() {
        let kps: Vec<Keypair> = (1..=4).map(keypair).collect();
        let unl = UnlConfig::new(kps.iter().map(|kp| kp.node_id()));
        // Quorum of 4 * 80% = 4; engineer 2/2 split — no quorum, no full
        // validation either way.
        let mut vals = Validations::new(unl, 300);
        for kp in &kps[..2] {
            vals.add(
                Validation::new_signed(kp, ledger(1), 9, 100, None, vec![]),
                100,
            );
        }
        for kp in &kps[2..] {
            vals.add(
                Validation::new_signed(kp, ledger(2), 9, 100, None, vec![]),
                100,
            );
        }
        assert!(!vals.is_fully_validated(&ledger(1), 9));
        assert!(!vals.is_fully_validated(&ledger(2), 9));
    }

    #[test]
    fn untrusted_signers_do_not_count() {
        let trusted: Vec<Keypair> = (1..=3).map(keypair).collect();
        let outsider = keypair(9);
        let mut vals = collector(&trusted);
        vals.add(
            Validation::new_signed(&outsider, ledger(1), 4, 100, None, vec![]),
            100,
        );
        assert_eq!(vals.support_for(&ledger(1)), 0);
    }

    #[test]
    fn ancestor_search_finds_divergence_point() {
        // Chain: g(1) -> a(2) -> b(3); fork: g(1) -> a(2) -> c(3) -> d(4).
        let chain: HashMap<Hash256, (Hash256, LedgerIndex)> = [
            (ledger(2), (ledger(1), 1)),
            (ledger(3), (ledger(2), 2)),
            (ledger(4), (ledger(2), 2)),
            (ledger(5), (ledger(4), 3)),
        ]
        .into_iter()
        .collect();
        let resolve = |h: &Hash256| chain.get(h).copied();

        let ancestor = common_ancestor((ledger(3), 3), (ledger(5), 4), resolve).unwrap();
        assert_eq!(ancestor, ledger(2));
        // Same ledger trivially.
        assert_eq!(
            common_ancestor((ledger(3), 3), (ledger(3), 3), resolve),
            Some(ledger(3))
        );
    }
}
