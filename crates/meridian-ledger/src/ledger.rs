use std::collections::HashSet;

use meridian_core::constants::GENESIS_DROPS;
use meridian_core::types::{Hash256, LedgerIndex, NetClock};
use meridian_core::HashPrefix;
use meridian_crypto::hash::prefixed_hash256;
use meridian_protocol::field;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::Sle;
use meridian_protocol::stobject::StValue;
use meridian_protocol::{BinaryReader, Serializer};
use meridian_shamap::{MapType, ShaMap, ShaMapItem};

use crate::fees::FeeSchedule;
use crate::rules::Rules;
use crate::LedgerError;

/// Close-flags bit: the network agreed on the close time.
pub const CLOSE_FLAG_AGREE: u8 = 0x01;

/// One link in the ledger chain: an immutable snapshot of state at a
/// sequence, plus the transaction set that produced it.
///
/// A ledger starts as a mutable draft cloned from its parent, is populated
/// by applying a transaction set, and is then sealed. Sealing fixes the map
/// hashes and the header hash; all further access is read-only.
pub struct Ledger {
    seq: LedgerIndex,
    parent_hash: Hash256,
    total_drops: u64,
    close_time: NetClock,
    parent_close_time: NetClock,
    close_resolution: u32,
    close_flags: u8,
    state_map: ShaMap,
    tx_map: ShaMap,
    fees: FeeSchedule,
    rules: Rules,
    hash: Option<Hash256>,
}

impl Ledger {
    /// The genesis ledger: seq 1, zero parent, the whole supply in one
    /// account, fee settings and the configured amendment set in state.
    pub(crate) fn genesis_with(
        state_map: ShaMap,
        fees: FeeSchedule,
        rules: Rules,
        close_time: NetClock,
    ) -> Ledger {
        let mut ledger = Ledger {
            seq: 1,
            parent_hash: Hash256::ZERO,
            total_drops: GENESIS_DROPS,
            close_time,
            parent_close_time: 0,
            close_resolution: meridian_core::constants::INITIAL_CLOSE_RESOLUTION,
            close_flags: CLOSE_FLAG_AGREE,
            state_map,
            tx_map: ShaMap::new(MapType::Transaction),
            fees,
            rules,
            hash: None,
        };
        ledger.seal_in_place();
        ledger
    }

    /// A mutable draft continuing `parent`. State is an O(1) copy-on-write
    /// snapshot; the transaction set starts empty.
    pub fn next(parent: &mut Ledger) -> Ledger {
        let parent_hash = parent.hash();
        Ledger {
            seq: parent.seq + 1,
            parent_hash,
            total_drops: parent.total_drops,
            close_time: 0,
            parent_close_time: parent.close_time,
            close_resolution: parent.close_resolution,
            close_flags: 0,
            state_map: parent.state_map.snapshot(true),
            tx_map: ShaMap::new(MapType::Transaction),
            fees: parent.fees,
            rules: parent.rules.clone(),
            hash: None,
        }
    }

    // ── Header accessors ────────────────────────────────────────────────────

    pub fn seq(&self) -> LedgerIndex {
        self.seq
    }

    pub fn parent_hash(&self) -> Hash256 {
        self.parent_hash
    }

    pub fn total_drops(&self) -> u64 {
        self.total_drops
    }

    pub fn close_time(&self) -> NetClock {
        self.close_time
    }

    pub fn parent_close_time(&self) -> NetClock {
        self.parent_close_time
    }

    pub fn close_resolution(&self) -> u32 {
        self.close_resolution
    }

    pub fn close_agree(&self) -> bool {
        self.close_flags & CLOSE_FLAG_AGREE != 0
    }

    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    pub fn rules(&self) -> Rules {
        self.rules.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }

    pub fn state_map(&self) -> &ShaMap {
        &self.state_map
    }

    pub fn tx_map(&self) -> &ShaMap {
        &self.tx_map
    }

    // ── State access ────────────────────────────────────────────────────────

    pub fn read(&self, key: &Hash256) -> Option<Sle> {
        let item = self.state_map.get(key).ok().flatten()?;
        Sle::from_bytes(*key, item.data()).ok()
    }

    pub fn exists(&self, key: &Hash256) -> bool {
        self.state_map.has(key).unwrap_or(false)
    }

    /// Smallest state key in [`from`, `before`).
    pub fn succ(&self, from: &Hash256, before: &Hash256) -> Option<Hash256> {
        let found = self.state_map.succ(from).ok().flatten()?;
        (found < *before).then_some(found)
    }

    // ── Raw mutation (unsealed drafts only) ─────────────────────────────────

    fn assert_mutable(&self) -> Result<(), LedgerError> {
        if self.hash.is_some() {
            return Err(LedgerError::Immutable);
        }
        Ok(())
    }

    pub fn raw_insert(&mut self, sle: &Sle) -> Result<(), LedgerError> {
        self.assert_mutable()?;
        self.state_map
            .add(ShaMapItem::new(sle.key(), sle.to_bytes()))?;
        Ok(())
    }

    pub fn raw_replace(&mut self, sle: &Sle) -> Result<(), LedgerError> {
        self.assert_mutable()?;
        self.state_map
            .update(ShaMapItem::new(sle.key(), sle.to_bytes()))?;
        Ok(())
    }

    pub fn raw_erase(&mut self, key: &Hash256) -> Result<(), LedgerError> {
        self.assert_mutable()?;
        self.state_map.delete(key)?;
        Ok(())
    }

    /// Burn `drops` from the circulating supply (transaction fees).
    pub fn destroy_drops(&mut self, drops: u64) -> Result<(), LedgerError> {
        self.assert_mutable()?;
        self.total_drops = self
            .total_drops
            .checked_sub(drops)
            .ok_or(LedgerError::DropsOverflow)?;
        Ok(())
    }

    /// Record an applied transaction and its metadata at the same key.
    pub fn add_transaction(
        &mut self,
        tx_id: Hash256,
        tx_bytes: &[u8],
        meta_bytes: &[u8],
    ) -> Result<(), LedgerError> {
        self.assert_mutable()?;
        self.tx_map
            .add(ShaMapItem::new(tx_id, encode_tx_leaf(tx_bytes, meta_bytes)))?;
        Ok(())
    }

    pub fn tx_count(&self) -> usize {
        self.tx_map.leaf_count().unwrap_or(0)
    }

    /// Refresh the fee schedule and amendment set from state. Called after
    /// applying pseudo-transactions that rewrite them.
    pub fn refresh_from_state(&mut self) {
        if let Some(sle) = self.read(&Keylet::fees().key()) {
            let mut fees = FeeSchedule::default();
            if let Some(v) = sle.obj().get_u64(&field::SF_BASE_FEE) {
                fees.base_fee = v;
            }
            if let Some(v) = sle.obj().get_u32(&field::SF_RESERVE_BASE) {
                fees.reserve_base = v as u64;
            }
            if let Some(v) = sle.obj().get_u32(&field::SF_RESERVE_INCREMENT) {
                fees.reserve_increment = v as u64;
            }
            self.fees = fees;
        }
        if let Some(sle) = self.read(&Keylet::amendments().key()) {
            if let Some(list) = sle.obj().get_v256(&field::SF_AMENDMENTS) {
                let set: HashSet<Hash256> = list.iter().copied().collect();
                self.rules = Rules::new(set);
            }
        }
    }

    // ── Sealing ─────────────────────────────────────────────────────────────

    /// Record close-time consensus results and seal.
    pub fn seal(&mut self, close_time: NetClock, close_resolution: u32, agree: bool) {
        self.close_time = close_time;
        self.close_resolution = close_resolution;
        self.close_flags = if agree { CLOSE_FLAG_AGREE } else { 0 };
        self.seal_in_place();
    }

    fn seal_in_place(&mut self) {
        self.state_map.seal();
        self.tx_map.seal();
        let header = self.header_bytes();
        self.hash = Some(prefixed_hash256(HashPrefix::LedgerMaster, &header));
    }

    /// The ledger hash. Seals the ledger if it is still a draft.
    pub fn hash(&mut self) -> Hash256 {
        if self.hash.is_none() {
            self.seal_in_place();
        }
        self.hash.expect("sealed above")
    }

    /// Hash of an already-sealed ledger.
    pub fn sealed_hash(&self) -> Hash256 {
        self.hash.expect("ledger is sealed")
    }

    pub fn state_hash(&self) -> Hash256 {
        self.state_map.hash()
    }

    pub fn tx_hash(&self) -> Hash256 {
        self.tx_map.hash()
    }

    /// The fixed-order header serialization the ledger hash covers.
    fn header_bytes(&self) -> Vec<u8> {
        let mut s = Serializer::new();
        s.write_hash256(&self.parent_hash);
        s.write_u64(self.total_drops);
        s.write_hash256(&self.tx_map.hash());
        s.write_hash256(&self.state_map.hash());
        s.write_u32(self.parent_close_time);
        s.write_u32(self.close_time);
        s.write_u8(self.close_resolution as u8);
        s.write_u8(self.close_flags);
        s.write_u32(self.seq);
        s.into_bytes()
    }
}

/// Transaction-map leaf payload: length-prefixed transaction then metadata.
pub fn encode_tx_leaf(tx_bytes: &[u8], meta_bytes: &[u8]) -> Vec<u8> {
    let mut s = Serializer::new();
    s.write_vl(tx_bytes);
    s.write_vl(meta_bytes);
    s.into_bytes()
}

pub fn decode_tx_leaf(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut r = BinaryReader::new(data);
    let tx = r.read_vl().ok()?.to_vec();
    let meta = r.read_vl().ok()?.to_vec();
    r.is_done().then_some((tx, meta))
}

/// Transaction metadata recorded beside each applied transaction.
pub fn make_meta(result_code: u8, index: u32, delivered: Option<meridian_core::Amount>) -> Vec<u8> {
    let mut obj = meridian_protocol::StObject::new();
    obj.set_u8(&field::SF_TRANSACTION_RESULT, result_code);
    obj.set_u32(&field::SF_SEQUENCE, index);
    if let Some(amount) = delivered {
        obj.set(&field::SF_DELIVERED_AMOUNT, StValue::Amount(amount));
    }
    obj.serialize(meridian_protocol::stobject::SerializeMode::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisConfig;
    use meridian_core::types::AccountId;

    fn master() -> AccountId {
        AccountId::from_bytes([0xAA; 20])
    }

    fn genesis() -> Ledger {
        GenesisConfig::new(master()).build()
    }

    #[test]
    fn genesis_holds_whole_supply() {
        let g = genesis();
        assert_eq!(g.seq(), 1);
        assert_eq!(g.total_drops(), GENESIS_DROPS);
        let root = g.read(&Keylet::account(&master()).key()).unwrap();
        assert_eq!(
            root.balance().unwrap(),
            meridian_core::Amount::Native(GENESIS_DROPS as i64)
        );
    }

    #[test]
    fn child_links_to_parent() {
        let mut g = genesis();
        let parent_hash = g.hash();
        let mut child = Ledger::next(&mut g);
        assert_eq!(child.seq(), 2);
        assert_eq!(child.parent_hash(), parent_hash);
        assert_eq!(child.parent_close_time(), g.close_time());
        child.seal(g.close_time() + 10, 10, true);
        assert_ne!(child.hash(), parent_hash);
    }

    #[test]
    fn sealed_ledger_refuses_mutation() {
        let mut g = genesis();
        let sle = Sle::new_account_root(AccountId::from_bytes([1; 20]), 5, 1);
        assert!(matches!(g.raw_insert(&sle), Err(LedgerError::Immutable)));
    }

    #[test]
    fn header_hash_covers_maps() {
        let mut g = genesis();
        let mut a = Ledger::next(&mut g);
        let mut b = Ledger::next(&mut g);
        let sle = Sle::new_account_root(AccountId::from_bytes([1; 20]), 5, 1);
        b.raw_insert(&sle).unwrap();
        a.seal(g.close_time() + 10, 10, true);
        b.seal(g.close_time() + 10, 10, true);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn closing_is_deterministic() {
        let build = || {
            let mut g = genesis();
            let mut l = Ledger::next(&mut g);
            let sle = Sle::new_account_root(AccountId::from_bytes([2; 20]), 77, 1);
            l.raw_insert(&sle).unwrap();
            l.add_transaction(Hash256::from_bytes([3; 32]), b"tx", b"meta")
                .unwrap();
            l.destroy_drops(10).unwrap();
            l.seal(g.close_time() + 20, 10, true);
            l.hash()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn tx_leaf_round_trip() {
        let leaf = encode_tx_leaf(b"transaction", b"metadata");
        let (tx, meta) = decode_tx_leaf(&leaf).unwrap();
        assert_eq!(tx, b"transaction");
        assert_eq!(meta, b"metadata");
    }
}
