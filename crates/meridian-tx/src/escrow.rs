use meridian_core::amount::Amount;
use meridian_core::Ter;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::flags::TF_UNIVERSAL_MASK;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::tx::Transaction;

use crate::transactor::{
    account_root, read_typed, remove_owned, reserve_ok, view_now,
};

pub fn preflight_create(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_UNIVERSAL_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    let Some(amount) = tx.obj().get_amount(&field::SF_AMOUNT) else {
        return Ter::TemBadAmount;
    };
    // Escrow sequesters the native asset only.
    if !amount.is_native() || !amount.is_positive() {
        return Ter::TemBadAmount;
    }
    if tx.obj().get_account(&field::SF_DESTINATION).is_none() {
        return Ter::TemDstNeeded;
    }
    let finish = tx.obj().get_u32(&field::SF_FINISH_AFTER);
    let cancel = tx.obj().get_u32(&field::SF_CANCEL_AFTER);
    match (finish, cancel) {
        (None, None) => Ter::TemBadExpiration,
        (Some(f), Some(c)) if c <= f => Ter::TemBadExpiration,
        _ => Ter::TesSuccess,
    }
}

pub fn preflight_finish_or_cancel(tx: &Transaction) -> Ter {
    if tx.obj().get_account(&field::SF_OWNER).is_none() {
        return Ter::TemMalformed;
    }
    if tx.obj().get_u32(&field::SF_OFFER_SEQUENCE).is_none() {
        return Ter::TemMalformed;
    }
    Ter::TesSuccess
}

pub fn apply_create(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let amount = tx
        .obj()
        .get_amount(&field::SF_AMOUNT)
        .expect("preflight checked");
    let drops = amount.native_drops().expect("preflight checked");
    let destination = tx
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("preflight checked");

    if let Some(cancel) = tx.obj().get_u32(&field::SF_CANCEL_AFTER) {
        if cancel <= view_now(view) {
            return Ter::TecExpired;
        }
    }
    if !view.exists(&Keylet::account(&destination).key()) {
        return Ter::TecNoDst;
    }

    let mut root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };
    let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
    let reserve = view.fees().account_reserve(root.owner_count() + 1) as i64;
    if balance - drops < reserve {
        return Ter::TecInsufficientReserve;
    }
    root.set_balance(Amount::Native(balance - drops));
    if view.update(root).is_err() {
        return Ter::TefInternal;
    }

    let keylet = Keylet::escrow(&account, tx.sequence());
    let mut sle = Sle::new(LedgerEntryType::Escrow, keylet);
    sle.obj_mut().set_account(&field::SF_ACCOUNT, account);
    sle.obj_mut().set_account(&field::SF_DESTINATION, destination);
    sle.obj_mut().set_amount(&field::SF_AMOUNT, amount);
    if let Some(finish) = tx.obj().get_u32(&field::SF_FINISH_AFTER) {
        sle.obj_mut().set_u32(&field::SF_FINISH_AFTER, finish);
    }
    if let Some(cancel) = tx.obj().get_u32(&field::SF_CANCEL_AFTER) {
        sle.obj_mut().set_u32(&field::SF_CANCEL_AFTER, cancel);
    }
    if let Some(tag) = tx.obj().get_u32(&field::SF_DESTINATION_TAG) {
        sle.obj_mut().set_u32(&field::SF_DESTINATION_TAG, tag);
    }
    match crate::transactor::insert_owned(view, &account, sle) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}

fn load_escrow(view: &dyn ReadView, tx: &Transaction) -> Result<Sle, Ter> {
    let owner = tx
        .obj()
        .get_account(&field::SF_OWNER)
        .expect("preflight checked");
    let seq = tx
        .obj()
        .get_u32(&field::SF_OFFER_SEQUENCE)
        .expect("preflight checked");
    read_typed(view, &Keylet::escrow(&owner, seq), LedgerEntryType::Escrow)
        .ok_or(Ter::TecNoTarget)
}

pub fn apply_finish(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let escrow = match load_escrow(view, tx) {
        Ok(sle) => sle,
        Err(ter) => return ter,
    };
    let now = view_now(view);
    if let Some(finish_after) = escrow.obj().get_u32(&field::SF_FINISH_AFTER) {
        if now < finish_after {
            return Ter::TecNoPermission;
        }
    }
    if let Some(cancel_after) = escrow.obj().get_u32(&field::SF_CANCEL_AFTER) {
        if now >= cancel_after {
            // Too late: only cancellation remains.
            return Ter::TecNoPermission;
        }
    }
    let destination = escrow
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("created with a destination");
    let drops = escrow
        .obj()
        .get_amount(&field::SF_AMOUNT)
        .and_then(|a| a.native_drops().ok())
        .unwrap_or(0);
    let owner = escrow.account().expect("created with an account");

    let dst_key = Keylet::account(&destination).key();
    let Some(mut dst_root) = view.read(&dst_key) else {
        return Ter::TecNoDst;
    };
    let dst_balance = dst_root
        .balance()
        .and_then(|b| b.native_drops().ok())
        .unwrap_or(0);
    dst_root.set_balance(Amount::Native(dst_balance + drops));
    if view.update(dst_root).is_err() {
        return Ter::TefInternal;
    }
    match remove_owned(view, &owner, &escrow) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}

pub fn apply_cancel(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let escrow = match load_escrow(view, tx) {
        Ok(sle) => sle,
        Err(ter) => return ter,
    };
    let Some(cancel_after) = escrow.obj().get_u32(&field::SF_CANCEL_AFTER) else {
        return Ter::TecNoPermission;
    };
    if view_now(view) < cancel_after {
        return Ter::TecNoPermission;
    }
    let owner = escrow.account().expect("created with an account");
    let drops = escrow
        .obj()
        .get_amount(&field::SF_AMOUNT)
        .and_then(|a| a.native_drops().ok())
        .unwrap_or(0);

    let owner_key = Keylet::account(&owner).key();
    let Some(mut owner_root) = view.read(&owner_key) else {
        return Ter::TefInternal;
    };
    let balance = owner_root
        .balance()
        .and_then(|b| b.native_drops().ok())
        .unwrap_or(0);
    owner_root.set_balance(Amount::Native(balance + drops));
    if view.update(owner_root).is_err() {
        return Ter::TefInternal;
    }
    match remove_owned(view, &owner, &escrow) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}
