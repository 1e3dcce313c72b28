use std::collections::BTreeMap;

use meridian_core::types::{Hash256, LedgerIndex, NetClock};
use meridian_protocol::sle::Sle;

use crate::fees::FeeSchedule;
use crate::ledger::Ledger;
use crate::rules::Rules;
use crate::LedgerError;

/// Read-only access to ledger state, satisfied by a sealed ledger or by any
/// overlay stacked on one.
pub trait ReadView {
    fn ledger_seq(&self) -> LedgerIndex;
    fn parent_close_time(&self) -> NetClock;
    fn fees(&self) -> FeeSchedule;
    fn rules(&self) -> Rules;
    fn read(&self, key: &Hash256) -> Option<Sle>;
    fn exists(&self, key: &Hash256) -> bool {
        self.read(key).is_some()
    }
    /// Smallest key in [`from`, `before`).
    fn succ(&self, from: &Hash256, before: &Hash256) -> Option<Hash256>;
}

impl ReadView for Ledger {
    fn ledger_seq(&self) -> LedgerIndex {
        self.seq()
    }

    fn parent_close_time(&self) -> NetClock {
        Ledger::parent_close_time(self)
    }

    fn fees(&self) -> FeeSchedule {
        Ledger::fees(self)
    }

    fn rules(&self) -> Rules {
        Ledger::rules(self)
    }

    fn read(&self, key: &Hash256) -> Option<Sle> {
        Ledger::read(self, key)
    }

    fn exists(&self, key: &Hash256) -> bool {
        Ledger::exists(self, key)
    }

    fn succ(&self, from: &Hash256, before: &Hash256) -> Option<Hash256> {
        Ledger::succ(self, from, before)
    }
}

/// One pending change to a keyed entry.
#[derive(Clone, Debug)]
enum Action {
    Insert(Sle),
    Replace(Sle),
    Erase,
}

/// The accumulated effect of an apply pass: ordered entry actions plus the
/// drops destroyed (fees burned).
#[derive(Default)]
pub struct Delta {
    items: BTreeMap<Hash256, Action>,
    destroyed: u64,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.destroyed == 0
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    /// Inspect the pending changes, in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&Hash256, DeltaEntry<'_>)> {
        self.items.iter().map(|(key, action)| {
            let entry = match action {
                Action::Insert(sle) => DeltaEntry::Inserted(sle),
                Action::Replace(sle) => DeltaEntry::Replaced(sle),
                Action::Erase => DeltaEntry::Erased,
            };
            (key, entry)
        })
    }
}

/// A single pending change as exposed by [`Delta::entries`].
pub enum DeltaEntry<'a> {
    Inserted(&'a Sle),
    Replaced(&'a Sle),
    Erased,
}

/// A mutable overlay accumulating entry creates, updates and deletes over a
/// read view. Children stack: a sandbox over an apply view captures
/// tentative changes that are either absorbed upward or dropped.
pub struct ApplyView<'a> {
    base: &'a dyn ReadView,
    items: BTreeMap<Hash256, Action>,
    destroyed: u64,
}

impl<'a> ApplyView<'a> {
    pub fn new(base: &'a dyn ReadView) -> Self {
        Self {
            base,
            items: BTreeMap::new(),
            destroyed: 0,
        }
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    pub fn insert(&mut self, sle: Sle) -> Result<(), LedgerError> {
        let key = sle.key();
        if self.exists(&key) {
            return Err(LedgerError::AlreadyExists(key));
        }
        // An erase followed by an insert in the same pass is a replace.
        let action = if self.base.exists(&key) {
            Action::Replace(sle)
        } else {
            Action::Insert(sle)
        };
        self.items.insert(key, action);
        Ok(())
    }

    pub fn update(&mut self, sle: Sle) -> Result<(), LedgerError> {
        let key = sle.key();
        if !self.exists(&key) {
            return Err(LedgerError::NotFound(key));
        }
        let action = if self.base.exists(&key) {
            Action::Replace(sle)
        } else {
            Action::Insert(sle)
        };
        self.items.insert(key, action);
        Ok(())
    }

    /// Insert or update, whichever applies.
    pub fn upsert(&mut self, sle: Sle) -> Result<(), LedgerError> {
        if self.exists(&sle.key()) {
            self.update(sle)
        } else {
            self.insert(sle)
        }
    }

    pub fn erase(&mut self, key: &Hash256) -> Result<(), LedgerError> {
        if !self.exists(key) {
            return Err(LedgerError::NotFound(*key));
        }
        if self.base.exists(key) {
            self.items.insert(*key, Action::Erase);
        } else {
            // Entry only ever existed in this overlay.
            self.items.remove(key);
        }
        Ok(())
    }

    /// Record fee burn.
    pub fn destroy_drops(&mut self, drops: u64) {
        self.destroyed += drops;
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    // ── Commit paths ────────────────────────────────────────────────────────

    /// Detach the accumulated changes, releasing the borrow on the base.
    pub fn into_delta(self) -> Delta {
        Delta {
            items: self.items,
            destroyed: self.destroyed,
        }
    }

    /// Absorb a child sandbox's delta into this view.
    pub fn absorb(&mut self, delta: Delta) {
        for (key, action) in delta.items {
            match action {
                Action::Erase => {
                    if self.base.exists(&key) {
                        self.items.insert(key, Action::Erase);
                    } else {
                        self.items.remove(&key);
                    }
                }
                Action::Insert(sle) | Action::Replace(sle) => {
                    let action = if self.base.exists(&key) {
                        Action::Replace(sle)
                    } else {
                        Action::Insert(sle)
                    };
                    self.items.insert(key, action);
                }
            }
        }
        self.destroyed += delta.destroyed;
    }
}

impl ReadView for ApplyView<'_> {
    fn ledger_seq(&self) -> LedgerIndex {
        self.base.ledger_seq()
    }

    fn parent_close_time(&self) -> NetClock {
        self.base.parent_close_time()
    }

    fn fees(&self) -> FeeSchedule {
        self.base.fees()
    }

    fn rules(&self) -> Rules {
        self.base.rules()
    }

    fn read(&self, key: &Hash256) -> Option<Sle> {
        match self.items.get(key) {
            Some(Action::Insert(sle)) | Some(Action::Replace(sle)) => Some(sle.clone()),
            Some(Action::Erase) => None,
            None => self.base.read(key),
        }
    }

    fn exists(&self, key: &Hash256) -> bool {
        match self.items.get(key) {
            Some(Action::Erase) => false,
            Some(_) => true,
            None => self.base.exists(key),
        }
    }

    fn succ(&self, from: &Hash256, before: &Hash256) -> Option<Hash256> {
        // Merge the base iteration (skipping overlay-erased keys) with
        // overlay inserts.
        let mut base_next = {
            let mut cursor = *from;
            loop {
                match self.base.succ(&cursor, before) {
                    Some(key) if matches!(self.items.get(&key), Some(Action::Erase)) => {
                        match increment(&key) {
                            Some(next) => cursor = next,
                            None => break None,
                        }
                    }
                    other => break other,
                }
            }
        };
        let overlay_next = self
            .items
            .range(*from..*before)
            .find(|(_, action)| !matches!(action, Action::Erase))
            .map(|(k, _)| *k);
        match (base_next.take(), overlay_next) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Apply a detached delta to a mutable ledger draft.
pub fn commit(ledger: &mut Ledger, delta: Delta) -> Result<(), LedgerError> {
    for (key, action) in &delta.items {
        match action {
            Action::Insert(sle) => ledger.raw_insert(sle)?,
            Action::Replace(sle) => ledger.raw_replace(sle)?,
            Action::Erase => ledger.raw_erase(key)?,
        }
    }
    if delta.destroyed > 0 {
        ledger.destroy_drops(delta.destroyed)?;
    }
    Ok(())
}

/// Next key upward, if any.
fn increment(key: &Hash256) -> Option<Hash256> {
    let mut bytes = *key.as_bytes();
    for i in (0..32).rev() {
        if bytes[i] != 0xFF {
            bytes[i] += 1;
            for b in bytes.iter_mut().skip(i + 1) {
                *b = 0;
            }
            return Some(Hash256::from_bytes(bytes));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisConfig;
    use meridian_core::types::AccountId;
    use meridian_protocol::keylet::Keylet;

    fn genesis() -> Ledger {
        GenesisConfig::new(AccountId::from_bytes([0xAA; 20])).build()
    }

    fn account_sle(tag: u8) -> Sle {
        Sle::new_account_root(AccountId::from_bytes([tag; 20]), 100, 1)
    }

    #[test]
    fn overlay_reads_through_to_base() {
        let ledger = genesis();
        let view = ApplyView::new(&ledger);
        let master = Keylet::account(&AccountId::from_bytes([0xAA; 20])).key();
        assert!(view.exists(&master));
        assert_eq!(view.ledger_seq(), 1);
    }

    #[test]
    fn overlay_masks_erased_entries() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let master = Keylet::account(&AccountId::from_bytes([0xAA; 20])).key();
        view.erase(&master).unwrap();
        assert!(!view.exists(&master));
        assert!(ledger.exists(&master));
    }

    #[test]
    fn sandbox_discard_leaves_parent_untouched() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let sle = account_sle(1);
        let key = sle.key();
        {
            let mut sandbox = ApplyView::new(&view);
            sandbox.insert(account_sle(1)).unwrap();
            assert!(sandbox.exists(&key));
            // Dropped without absorb.
        }
        assert!(!view.exists(&key));
        view.destroy_drops(0);
    }

    #[test]
    fn sandbox_absorb_propagates() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let sle = account_sle(2);
        let key = sle.key();
        let delta = {
            let mut sandbox = ApplyView::new(&view);
            sandbox.insert(sle).unwrap();
            sandbox.destroy_drops(10);
            sandbox.into_delta()
        };
        view.absorb(delta);
        assert!(view.exists(&key));
        assert_eq!(view.destroyed(), 10);
    }

    #[test]
    fn commit_applies_to_ledger() {
        let mut g = genesis();
        let total_before = g.total_drops();
        let mut child = Ledger::next(&mut g);
        let delta = {
            let mut view = ApplyView::new(&child);
            view.insert(account_sle(3)).unwrap();
            view.destroy_drops(25);
            view.into_delta()
        };
        commit(&mut child, delta).unwrap();
        assert!(child.exists(&account_sle(3).key()));
        assert_eq!(child.total_drops(), total_before - 25);
    }

    #[test]
    fn insert_then_erase_in_overlay_is_a_no_op() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let sle = account_sle(4);
        let key = sle.key();
        view.insert(sle).unwrap();
        view.erase(&key).unwrap();
        let delta = view.into_delta();
        assert_eq!(delta.len(), 0);
    }

    #[test]
    fn succ_sees_overlay_inserts_and_erases() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let master_key = Keylet::account(&AccountId::from_bytes([0xAA; 20])).key();

        // Base succ finds the master account root.
        let found = view.succ(&master_key, &Hash256::from_bytes([0xFF; 32]));
        assert_eq!(found, Some(master_key));

        // Erase it in the overlay: succ skips to the next base key or an
        // overlay insert.
        view.erase(&master_key).unwrap();
        let next = view.succ(&master_key, &Hash256::from_bytes([0xFF; 32]));
        assert_ne!(next, Some(master_key));
    }
}
