use meridian_core::amount::Amount;
use meridian_core::issue::Book;
use meridian_core::types::{AccountId, Hash256};
use meridian_ledger::dirs::{dir_insert, dir_remove};
use meridian_ledger::view::ApplyView;
use meridian_ledger::{LedgerError, ReadView};
use meridian_protocol::field;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};

use crate::quality::Quality;

/// Build the offer entry for `owner` and place it in its book directory and
/// the owner directory. Returns the offer key.
pub fn insert_offer(
    view: &mut ApplyView<'_>,
    owner: &AccountId,
    sequence: u32,
    taker_pays: Amount,
    taker_gets: Amount,
    flags: u32,
    expiration: Option<u32>,
) -> Result<Hash256, LedgerError> {
    let quality =
        Quality::from_amounts(&taker_pays, &taker_gets).expect("validated by the transactor");
    let book = Book::new(taker_pays.issue(), taker_gets.issue());
    let base = Keylet::book_base(&book);
    let dir = Keylet::book_quality(&base, quality.to_key());

    let offer_keylet = Keylet::offer(owner, sequence);
    let mut sle = Sle::new(LedgerEntryType::Offer, offer_keylet);
    sle.obj_mut().set_account(&field::SF_ACCOUNT, *owner);
    sle.obj_mut().set_u32(&field::SF_SEQUENCE, sequence);
    sle.obj_mut().set_amount(&field::SF_TAKER_PAYS, taker_pays);
    sle.obj_mut().set_amount(&field::SF_TAKER_GETS, taker_gets);
    sle.obj_mut().set_h256(&field::SF_BOOK_DIRECTORY, dir.key());
    if flags != 0 {
        sle.set_flags(flags);
    }
    if let Some(exp) = expiration {
        sle.obj_mut().set_u32(&field::SF_EXPIRATION, exp);
    }

    let book_page = dir_insert(view, &dir, offer_keylet.key())?;
    sle.obj_mut().set_u64(&field::SF_BOOK_NODE, book_page);
    let owner_page = dir_insert(view, &Keylet::owner_dir(owner), offer_keylet.key())?;
    sle.obj_mut().set_u64(&field::SF_OWNER_NODE, owner_page);

    view.insert(sle)?;
    bump_owner_count(view, owner, 1)?;
    Ok(offer_keylet.key())
}

fn bump_owner_count(
    view: &mut ApplyView<'_>,
    owner: &AccountId,
    delta: i32,
) -> Result<(), LedgerError> {
    let key = Keylet::account(owner).key();
    let mut root = view.read(&key).ok_or(LedgerError::NotFound(key))?;
    let count = (root.owner_count() as i64 + delta as i64).max(0) as u32;
    root.set_owner_count(count);
    view.update(root)
}

/// Unwind an offer from both directories and erase it.
pub fn remove_offer(view: &mut ApplyView<'_>, offer_key: &Hash256) -> Result<(), LedgerError> {
    let Some(sle) = view.read(offer_key) else {
        return Err(LedgerError::NotFound(*offer_key));
    };
    let owner = sle.account().ok_or(LedgerError::NotFound(*offer_key))?;
    let dir_key = sle
        .obj()
        .get_h256(&field::SF_BOOK_DIRECTORY)
        .ok_or(LedgerError::NotFound(*offer_key))?;
    let book_page = sle.obj().get_u64(&field::SF_BOOK_NODE).unwrap_or(0);
    let owner_page = sle.obj().get_u64(&field::SF_OWNER_NODE).unwrap_or(0);

    dir_remove(view, &Keylet(dir_key), book_page, offer_key)?;
    dir_remove(view, &Keylet::owner_dir(&owner), owner_page, offer_key)?;
    view.erase(offer_key)?;
    bump_owner_count(view, &owner, -1)?;
    Ok(())
}

/// Offers of `book`, best quality first. Walks quality directories through
/// `succ` over the 64-bit quality suffix of the directory key space.
pub fn book_offers(view: &dyn ReadView, book: &Book, limit: usize) -> Vec<Sle> {
    let base = Keylet::book_base(book);
    let mut cursor = base.key();
    let end = {
        // One past the largest key sharing the 192-bit book prefix.
        let mut bytes = *base.key().as_bytes();
        bytes[24..32].copy_from_slice(&u64::MAX.to_be_bytes());
        increment_bytes(&mut bytes);
        Hash256::from_bytes(bytes)
    };
    let mut out = Vec::new();
    while out.len() < limit {
        let Some(dir_key) = view.succ(&cursor, &end) else {
            break;
        };
        if let Some(page) = view.read(&dir_key) {
            if page.entry_type() == LedgerEntryType::DirectoryNode {
                for offer_key in meridian_ledger::dirs::dir_entries(view, &Keylet(dir_key)) {
                    if let Some(offer) = view.read(&offer_key) {
                        if offer.entry_type() == LedgerEntryType::Offer {
                            out.push(offer);
                            if out.len() >= limit {
                                break;
                            }
                        }
                    }
                }
            }
        }
        let mut bytes = *dir_key.as_bytes();
        if !increment_bytes(&mut bytes) {
            break;
        }
        cursor = Hash256::from_bytes(bytes);
    }
    out
}

fn increment_bytes(bytes: &mut [u8; 32]) -> bool {
    for i in (0..32).rev() {
        if bytes[i] != 0xFF {
            bytes[i] += 1;
            for b in bytes.iter_mut().skip(i + 1) {
                *b = 0;
            }
            return true;
        }
        bytes[i] = 0;
    }
    false
}

/// The quality an offer was booked at.
pub fn offer_quality(offer: &Sle) -> Option<Quality> {
    let dir = offer.obj().get_h256(&field::SF_BOOK_DIRECTORY)?;
    let key = u64::from_be_bytes(dir.as_bytes()[24..32].try_into().ok()?);
    Quality::from_key(key)
}
