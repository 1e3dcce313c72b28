use meridian_core::constants::DIR_NODE_MAX;
use meridian_core::types::Hash256;
use meridian_protocol::field;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};

use crate::view::ApplyView;
use crate::{LedgerError, ReadView};

/// Insert `index` into the directory rooted at `root`, creating pages as
/// needed. Returns the page number holding the entry.
///
/// Pages form a doubly-linked ring through IndexNext/IndexPrevious; the root
/// page's IndexPrevious points at the tail for O(1) append.
pub fn dir_insert(
    view: &mut ApplyView<'_>,
    root: &Keylet,
    index: Hash256,
) -> Result<u64, LedgerError> {
    let root_key = root.key();
    let Some(mut root_page) = view.read(&root_key) else {
        // First entry: the root page is born.
        let mut page = Sle::new_directory(*root, root_key);
        page.set_indexes(vec![index]);
        view.insert(page)?;
        return Ok(0);
    };

    let tail_page_no = root_page.obj().get_u64(&field::SF_INDEX_PREVIOUS).unwrap_or(0);
    let tail_key = Keylet::dir_page(&root_key, tail_page_no);
    let mut tail = if tail_page_no == 0 {
        root_page.clone()
    } else {
        view.read(&tail_key.key())
            .ok_or(LedgerError::NotFound(tail_key.key()))?
    };

    if tail.indexes().len() < DIR_NODE_MAX {
        let mut indexes = tail.indexes().to_vec();
        indexes.push(index);
        tail.set_indexes(indexes);
        view.update(tail)?;
        return Ok(tail_page_no);
    }

    // Tail is full: open a new page and re-link the ring.
    let new_page_no = tail_page_no + 1;
    let new_key = Keylet::dir_page(&root_key, new_page_no);
    let mut page = Sle::new_directory(new_key, root_key);
    page.set_indexes(vec![index]);
    page.obj_mut().set_u64(&field::SF_INDEX_PREVIOUS, tail_page_no);
    view.insert(page)?;

    tail.obj_mut().set_u64(&field::SF_INDEX_NEXT, new_page_no);
    if tail_page_no == 0 {
        root_page = tail;
    } else {
        view.update(tail)?;
    }
    root_page
        .obj_mut()
        .set_u64(&field::SF_INDEX_PREVIOUS, new_page_no);
    view.update(root_page)?;
    Ok(new_page_no)
}

/// Remove `index` from the directory rooted at `root`. `page_hint` names the
/// page the entry was recorded on. The directory disappears entirely when
/// its last entry goes.
pub fn dir_remove(
    view: &mut ApplyView<'_>,
    root: &Keylet,
    page_hint: u64,
    index: &Hash256,
) -> Result<(), LedgerError> {
    let root_key = root.key();
    let page_key = Keylet::dir_page(&root_key, page_hint);
    let mut page = view
        .read(&page_key.key())
        .ok_or(LedgerError::NotFound(page_key.key()))?;

    let mut indexes = page.indexes().to_vec();
    let before = indexes.len();
    indexes.retain(|i| i != index);
    if indexes.len() == before {
        return Err(LedgerError::NotFound(*index));
    }

    if !indexes.is_empty() {
        page.set_indexes(indexes);
        view.update(page)?;
        return Ok(());
    }

    // Page emptied.
    let prev = page.obj().get_u64(&field::SF_INDEX_PREVIOUS).unwrap_or(0);
    let next = page.obj().get_u64(&field::SF_INDEX_NEXT).unwrap_or(0);
    if page_hint == 0 {
        if next == 0 {
            // Root was the only page: the directory is gone.
            view.erase(&root_key)?;
        } else {
            page.set_indexes(Vec::new());
            view.update(page)?;
        }
        return Ok(());
    }

    view.erase(&page_key.key())?;
    // Re-link neighbors around the removed page.
    let prev_key = Keylet::dir_page(&root_key, prev);
    let mut prev_page = view
        .read(&prev_key.key())
        .ok_or(LedgerError::NotFound(prev_key.key()))?;
    prev_page.obj_mut().set_u64(&field::SF_INDEX_NEXT, next);
    view.update(prev_page)?;

    let next_key = Keylet::dir_page(&root_key, next);
    let mut next_page = view
        .read(&next_key.key())
        .ok_or(LedgerError::NotFound(next_key.key()))?;
    next_page.obj_mut().set_u64(&field::SF_INDEX_PREVIOUS, prev);
    view.update(next_page)?;
    Ok(())
}

/// Every entry of the directory, across pages, in insertion order.
pub fn dir_entries(view: &dyn ReadView, root: &Keylet) -> Vec<Hash256> {
    let root_key = root.key();
    let mut out = Vec::new();
    let mut page_no = 0u64;
    loop {
        let key = Keylet::dir_page(&root_key, page_no);
        let Some(page) = view.read(&key.key()) else {
            break;
        };
        out.extend_from_slice(page.indexes());
        match page.obj().get_u64(&field::SF_INDEX_NEXT) {
            Some(next) if next != 0 => page_no = next,
            _ => break,
        }
    }
    out
}

pub fn dir_is_empty(view: &dyn ReadView, root: &Keylet) -> bool {
    match view.read(&root.key()) {
        None => true,
        Some(page) => page.indexes().is_empty() && page.obj().get_u64(&field::SF_INDEX_NEXT).unwrap_or(0) == 0,
    }
}

/// No entry may appear twice on one page; checked by the invariant suite.
pub fn page_has_duplicates(page: &Sle) -> bool {
    if page.entry_type() != LedgerEntryType::DirectoryNode {
        return false;
    }
    let indexes = page.indexes();
    let mut seen = std::collections::HashSet::with_capacity(indexes.len());
    indexes.iter().any(|i| !seen.insert(*i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisConfig;
    use crate::ledger::Ledger;
    use crate::view::commit;
    use meridian_core::types::AccountId;

    fn genesis() -> Ledger {
        GenesisConfig::new(AccountId::from_bytes([0xAA; 20])).build()
    }

    fn entry(i: u16) -> Hash256 {
        let mut b = [0u8; 32];
        b[0] = (i >> 8) as u8;
        b[1] = (i & 0xFF) as u8;
        b[2] = 0x33;
        Hash256::from_bytes(b)
    }

    #[test]
    fn insert_and_enumerate() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let root = Keylet::owner_dir(&AccountId::from_bytes([1; 20]));
        for i in 0..10 {
            dir_insert(&mut view, &root, entry(i)).unwrap();
        }
        let entries = dir_entries(&view, &root);
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0], entry(0));
        assert_eq!(entries[9], entry(9));
    }

    #[test]
    fn overflow_spills_to_new_page() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let root = Keylet::owner_dir(&AccountId::from_bytes([2; 20]));
        let count = DIR_NODE_MAX as u16 + 5;
        let mut last_page = 0;
        for i in 0..count {
            last_page = dir_insert(&mut view, &root, entry(i)).unwrap();
        }
        assert_eq!(last_page, 1);
        assert_eq!(dir_entries(&view, &root).len(), count as usize);
    }

    #[test]
    fn remove_last_entry_deletes_directory() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let root = Keylet::owner_dir(&AccountId::from_bytes([3; 20]));
        dir_insert(&mut view, &root, entry(1)).unwrap();
        assert!(!dir_is_empty(&view, &root));
        dir_remove(&mut view, &root, 0, &entry(1)).unwrap();
        assert!(dir_is_empty(&view, &root));
        assert!(!view.exists(&root.key()));
    }

    #[test]
    fn survives_commit_to_ledger() {
        let mut g = genesis();
        let mut child = Ledger::next(&mut g);
        let root = Keylet::owner_dir(&AccountId::from_bytes([4; 20]));
        let delta = {
            let mut view = ApplyView::new(&child);
            for i in 0..40 {
                dir_insert(&mut view, &root, entry(i)).unwrap();
            }
            view.into_delta()
        };
        commit(&mut child, delta).unwrap();
        assert_eq!(dir_entries(&child, &root).len(), 40);
    }

    #[test]
    fn duplicate_detection() {
        let root = Keylet::owner_dir(&AccountId::from_bytes([5; 20]));
        let mut page = Sle::new_directory(root, root.key());
        page.set_indexes(vec![entry(1), entry(2), entry(1)]);
        assert!(page_has_duplicates(&page));
        page.set_indexes(vec![entry(1), entry(2)]);
        assert!(!page_has_duplicates(&page));
    }
}
