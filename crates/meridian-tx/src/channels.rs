use meridian_core::amount::Amount;
use meridian_core::types::{Hash256, PublicKeyBytes};
use meridian_core::{HashPrefix, Ter};
use meridian_crypto::keys;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::flags::{TF_PAYCHAN_CLAIM_MASK, TF_PAYCHAN_CLOSE, TF_PAYCHAN_RENEW, TF_UNIVERSAL_MASK};
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::tx::Transaction;
use meridian_protocol::Serializer;

use crate::transactor::{account_root, read_typed, remove_owned, view_now};

pub fn preflight_create(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_UNIVERSAL_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    let Some(amount) = tx.obj().get_amount(&field::SF_AMOUNT) else {
        return Ter::TemBadAmount;
    };
    if !amount.is_native() || !amount.is_positive() {
        return Ter::TemBadAmount;
    }
    let Some(destination) = tx.obj().get_account(&field::SF_DESTINATION) else {
        return Ter::TemDstNeeded;
    };
    if destination == tx.account() {
        return Ter::TemDstIsSrc;
    }
    if tx.obj().get_u32(&field::SF_SETTLE_DELAY).is_none() {
        return Ter::TemMalformed;
    }
    if tx.obj().get_blob(&field::SF_PUBLIC_KEY).is_none() {
        return Ter::TemMalformed;
    }
    Ter::TesSuccess
}

pub fn preflight_fund(tx: &Transaction) -> Ter {
    if tx.obj().get_h256(&field::SF_CHANNEL).is_none() {
        return Ter::TemMalformed;
    }
    match tx.obj().get_amount(&field::SF_AMOUNT) {
        Some(amount) if amount.is_native() && amount.is_positive() => Ter::TesSuccess,
        _ => Ter::TemBadAmount,
    }
}

pub fn preflight_claim(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_PAYCHAN_CLAIM_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    if tx.obj().get_h256(&field::SF_CHANNEL).is_none() {
        return Ter::TemMalformed;
    }
    // A claim with a balance needs a signature covering it, unless the
    // channel owner is closing out.
    let has_balance = tx.obj().get_amount(&field::SF_BALANCE).is_some();
    let has_sig = tx.obj().get_blob(&field::SF_SIGNATURE).is_some();
    if has_balance && !has_sig && tx.flags() & (TF_PAYCHAN_CLOSE | TF_PAYCHAN_RENEW) == 0 {
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

    let keylet = Keylet::paychan(&account, &destination, tx.sequence());
    let mut sle = Sle::new(LedgerEntryType::PayChannel, keylet);
    sle.obj_mut().set_account(&field::SF_ACCOUNT, account);
    sle.obj_mut().set_account(&field::SF_DESTINATION, destination);
    sle.obj_mut().set_amount(&field::SF_AMOUNT, amount);
    // Balance tracks what has been claimed out of the channel so far.
    sle.set_balance(Amount::Native(0));
    sle.obj_mut().set_u32(
        &field::SF_SETTLE_DELAY,
        tx.obj().get_u32(&field::SF_SETTLE_DELAY).expect("preflight"),
    );
    sle.obj_mut().set_blob(
        &field::SF_PUBLIC_KEY,
        tx.obj().get_blob(&field::SF_PUBLIC_KEY).expect("preflight").to_vec(),
    );
    if let Some(cancel) = tx.obj().get_u32(&field::SF_CANCEL_AFTER) {
        sle.obj_mut().set_u32(&field::SF_CANCEL_AFTER, cancel);
    }
    match crate::transactor::insert_owned(view, &account, sle) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}

pub fn apply_fund(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let channel_key = tx.obj().get_h256(&field::SF_CHANNEL).expect("preflight");
    let drops = tx
        .obj()
        .get_amount(&field::SF_AMOUNT)
        .and_then(|a| a.native_drops().ok())
        .expect("preflight checked");

    let Some(mut channel) = read_typed(view, &Keylet(channel_key), LedgerEntryType::PayChannel)
    else {
        return Ter::TecNoEntry;
    };
    if channel.account() != Some(account) {
        return Ter::TecNoPermission;
    }
    let mut root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };
    let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
    let reserve = view.fees().account_reserve(root.owner_count()) as i64;
    if balance - drops < reserve {
        return Ter::TecInsufficientReserve;
    }
    root.set_balance(Amount::Native(balance - drops));
    if view.update(root).is_err() {
        return Ter::TefInternal;
    }
    let total = channel
        .obj()
        .get_amount(&field::SF_AMOUNT)
        .and_then(|a| a.native_drops().ok())
        .unwrap_or(0);
    channel
        .obj_mut()
        .set_amount(&field::SF_AMOUNT, Amount::Native(total + drops));
    match view.update(channel) {
        Ok(()) => Ter::TesSuccess,
        Err(_) => Ter::TefInternal,
    }
}

/// The byte string a channel claim signature covers.
pub fn claim_message(channel: &Hash256, drops: i64) -> Vec<u8> {
    let mut s = Serializer::new();
    s.write_bytes(&HashPrefix::PaymentChannelClaim.to_bytes());
    s.write_hash256(channel);
    s.write_u64(drops as u64);
    s.into_bytes()
}

pub fn apply_claim(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let flags = tx.flags();
    let channel_key = tx.obj().get_h256(&field::SF_CHANNEL).expect("preflight");
    let Some(mut channel) = read_typed(view, &Keylet(channel_key), LedgerEntryType::PayChannel)
    else {
        return Ter::TecNoEntry;
    };
    let owner = channel.account().expect("created with an account");
    let destination = channel
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("created with a destination");
    if account != owner && account != destination {
        return Ter::TecNoPermission;
    }

    if let Some(balance_amount) = tx.obj().get_amount(&field::SF_BALANCE) {
        let Ok(new_claimed) = balance_amount.native_drops() else {
            return Ter::TemBadAmount;
        };
        let claimed = channel
            .balance()
            .and_then(|a| a.native_drops().ok())
            .unwrap_or(0);
        let total = channel
            .obj()
            .get_amount(&field::SF_AMOUNT)
            .and_then(|a| a.native_drops().ok())
            .unwrap_or(0);
        // Claims are monotone and bounded by the channel amount.
        if new_claimed <= claimed || new_claimed > total {
            return Ter::TecUnfundedPayment;
        }
        // The destination must present the owner's signed authorization;
        // the owner may pay out directly.
        if account == destination {
            let Some(sig) = tx.obj().get_blob(&field::SF_SIGNATURE) else {
                return Ter::TemMalformed;
            };
            let Some(pk) = channel
                .obj()
                .get_blob(&field::SF_PUBLIC_KEY)
                .map(|b| PublicKeyBytes(b.to_vec()))
            else {
                return Ter::TefInternal;
            };
            if !keys::verify(&pk, &claim_message(&channel_key, new_claimed), sig) {
                return Ter::TemBadSignature;
            }
        }
        let delta = new_claimed - claimed;
        let dst_key = Keylet::account(&destination).key();
        let Some(mut dst_root) = view.read(&dst_key) else {
            return Ter::TecNoDst;
        };
        let dst_balance = dst_root
            .balance()
            .and_then(|b| b.native_drops().ok())
            .unwrap_or(0);
        dst_root.set_balance(Amount::Native(dst_balance + delta));
        if view.update(dst_root).is_err() {
            return Ter::TefInternal;
        }
        channel.set_balance(Amount::Native(new_claimed));
        if view.update(channel.clone()).is_err() {
            return Ter::TefInternal;
        }
    }

    if flags & TF_PAYCHAN_CLOSE != 0 {
        // The destination closes immediately; the owner starts the settle
        // timer unless it already ran out.
        let can_close_now = account == destination
            || channel
                .obj()
                .get_u32(&field::SF_EXPIRATION)
                .map(|exp| view_now(view) >= exp)
                .unwrap_or(false);
        if can_close_now {
            let total = channel
                .obj()
                .get_amount(&field::SF_AMOUNT)
                .and_then(|a| a.native_drops().ok())
                .unwrap_or(0);
            let claimed = channel
                .balance()
                .and_then(|a| a.native_drops().ok())
                .unwrap_or(0);
            let refund = total - claimed;
            let owner_key = Keylet::account(&owner).key();
            let Some(mut owner_root) = view.read(&owner_key) else {
                return Ter::TefInternal;
            };
            let balance = owner_root
                .balance()
                .and_then(|b| b.native_drops().ok())
                .unwrap_or(0);
            owner_root.set_balance(Amount::Native(balance + refund));
            if view.update(owner_root).is_err() {
                return Ter::TefInternal;
            }
            return match remove_owned(view, &owner, &channel) {
                Ok(()) => Ter::TesSuccess,
                Err(ter) => ter,
            };
        }
        let delay = channel
            .obj()
            .get_u32(&field::SF_SETTLE_DELAY)
            .unwrap_or(0);
        channel
            .obj_mut()
            .set_u32(&field::SF_EXPIRATION, view_now(view) + delay);
        if view.update(channel).is_err() {
            return Ter::TefInternal;
        }
    }
    Ter::TesSuccess
}
