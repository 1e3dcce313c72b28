use meridian_core::Ter;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::flags::{
    ASF_DEFAULT_TRANSIT, ASF_DEPOSIT_AUTH, ASF_DISABLE_MASTER, ASF_GLOBAL_FREEZE,
    ASF_REQUIRE_AUTH, ASF_REQUIRE_DEST_TAG, LSF_DEFAULT_TRANSIT, LSF_DEPOSIT_AUTH,
    LSF_DISABLE_MASTER, LSF_GLOBAL_FREEZE, LSF_REQUIRE_AUTH, LSF_REQUIRE_DEST_TAG,
    TF_UNIVERSAL_MASK,
};
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::stobject::StValue;
use meridian_protocol::tx::Transaction;

use meridian_ledger::dirs::dir_is_empty;
use meridian_ledger::funds::RATE_ONE;

use crate::transactor::{account_root, insert_owned, read_typed, reserve_ok};

// ── AccountSet ───────────────────────────────────────────────────────────────

pub fn preflight_account_set(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_UNIVERSAL_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    if let Some(rate) = tx.obj().get_u32(&field::SF_TRANSFER_RATE) {
        if rate != 0 && (rate < RATE_ONE || rate > 2 * RATE_ONE) {
            return Ter::TemInvalid;
        }
    }
    let set = tx.obj().get_u32(&field::SF_SET_FLAG);
    let clear = tx.obj().get_u32(&field::SF_CLEAR_FLAG);
    if set.is_some() && set == clear {
        return Ter::TemInvalidFlag;
    }
    Ter::TesSuccess
}

pub fn apply_account_set(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let mut root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };

    if let Some(set) = tx.obj().get_u32(&field::SF_SET_FLAG) {
        match set {
            ASF_REQUIRE_DEST_TAG => root.set_flag(LSF_REQUIRE_DEST_TAG),
            ASF_REQUIRE_AUTH => {
                // Auth can only be required while no one holds a line.
                if !dir_is_empty(view, &Keylet::owner_dir(&account)) {
                    return Ter::TecOwners;
                }
                root.set_flag(LSF_REQUIRE_AUTH);
            }
            ASF_DISABLE_MASTER => {
                if !has_alternative_key(view, &root, &account) {
                    return Ter::TecNoAlternativeKey;
                }
                root.set_flag(LSF_DISABLE_MASTER);
            }
            ASF_GLOBAL_FREEZE => root.set_flag(LSF_GLOBAL_FREEZE),
            ASF_DEFAULT_TRANSIT => root.set_flag(LSF_DEFAULT_TRANSIT),
            ASF_DEPOSIT_AUTH => root.set_flag(LSF_DEPOSIT_AUTH),
            _ => return Ter::TemInvalidFlag,
        }
    }
    if let Some(clear) = tx.obj().get_u32(&field::SF_CLEAR_FLAG) {
        match clear {
            ASF_REQUIRE_DEST_TAG => root.clear_flag(LSF_REQUIRE_DEST_TAG),
            ASF_REQUIRE_AUTH => root.clear_flag(LSF_REQUIRE_AUTH),
            ASF_DISABLE_MASTER => root.clear_flag(LSF_DISABLE_MASTER),
            ASF_GLOBAL_FREEZE => root.clear_flag(LSF_GLOBAL_FREEZE),
            ASF_DEFAULT_TRANSIT => root.clear_flag(LSF_DEFAULT_TRANSIT),
            ASF_DEPOSIT_AUTH => root.clear_flag(LSF_DEPOSIT_AUTH),
            _ => return Ter::TemInvalidFlag,
        }
    }
    if let Some(rate) = tx.obj().get_u32(&field::SF_TRANSFER_RATE) {
        if rate == 0 || rate == RATE_ONE {
            root.obj_mut().remove(&field::SF_TRANSFER_RATE);
        } else {
            root.obj_mut().set_u32(&field::SF_TRANSFER_RATE, rate);
        }
    }
    match view.update(root) {
        Ok(()) => Ter::TesSuccess,
        Err(_) => Ter::TefInternal,
    }
}

// ── SetRegularKey ────────────────────────────────────────────────────────────

pub fn apply_set_regular_key(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let mut root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };
    match tx.obj().get_account(&field::SF_REGULAR_KEY) {
        Some(key) => {
            root.obj_mut().set_account(&field::SF_REGULAR_KEY, key);
        }
        None => {
            // Removing the last usable key would brick the account.
            if root.is_flag(LSF_DISABLE_MASTER)
                && !view.exists(&Keylet::signer_list(&account).key())
            {
                return Ter::TecNoAlternativeKey;
            }
            root.obj_mut().remove(&field::SF_REGULAR_KEY);
        }
    }
    match view.update(root) {
        Ok(()) => Ter::TesSuccess,
        Err(_) => Ter::TefInternal,
    }
}

// ── SignerListSet ────────────────────────────────────────────────────────────

pub const MAX_SIGNERS: usize = 8;

pub fn preflight_signer_list_set(tx: &Transaction) -> Ter {
    let Some(quorum) = tx.obj().get_u32(&field::SF_SIGNER_QUORUM) else {
        return Ter::TemMalformed;
    };
    let entries = tx.obj().get_array(&field::SF_SIGNER_ENTRIES);
    if quorum == 0 {
        // Deletion form: no entries allowed.
        return if entries.map(|e| e.is_empty()).unwrap_or(true) {
            Ter::TesSuccess
        } else {
            Ter::TemMalformed
        };
    }
    let Some(entries) = entries else {
        return Ter::TemMalformed;
    };
    if entries.is_empty() || entries.len() > MAX_SIGNERS {
        return Ter::TemMalformed;
    }
    let mut seen = std::collections::HashSet::new();
    let mut weight_sum: u64 = 0;
    for (_, entry) in entries {
        let Some(signer) = entry.get_account(&field::SF_ACCOUNT) else {
            return Ter::TemBadSigner;
        };
        if signer == tx.account() {
            return Ter::TemBadSigner;
        }
        if !seen.insert(signer) {
            return Ter::TemBadSigner;
        }
        let weight = entry.get_u16(&field::SF_SIGNER_WEIGHT).unwrap_or(0);
        if weight == 0 {
            return Ter::TemBadWeight;
        }
        weight_sum += weight as u64;
    }
    if (quorum as u64) > weight_sum {
        return Ter::TemBadQuorum;
    }
    Ter::TesSuccess
}

pub fn apply_signer_list_set(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let quorum = tx
        .obj()
        .get_u32(&field::SF_SIGNER_QUORUM)
        .expect("preflight checked");
    let keylet = Keylet::signer_list(&account);
    let existing = read_typed(view, &keylet, LedgerEntryType::SignerList);

    if quorum == 0 {
        let Some(list) = existing else {
            return Ter::TecNoEntry;
        };
        let root = match account_root(view, &account) {
            Ok(root) => root,
            Err(ter) => return ter,
        };
        if root.is_flag(LSF_DISABLE_MASTER)
            && root.obj().get_account(&field::SF_REGULAR_KEY).is_none()
        {
            return Ter::TecNoAlternativeKey;
        }
        return match crate::transactor::remove_owned(view, &account, &list) {
            Ok(()) => Ter::TesSuccess,
            Err(ter) => ter,
        };
    }

    let entries = tx
        .obj()
        .get_array(&field::SF_SIGNER_ENTRIES)
        .expect("preflight checked")
        .to_vec();

    match existing {
        Some(mut list) => {
            list.obj_mut().set_u32(&field::SF_SIGNER_QUORUM, quorum);
            list.obj_mut()
                .set(&field::SF_SIGNER_ENTRIES, StValue::Array(entries));
            match view.update(list) {
                Ok(()) => Ter::TesSuccess,
                Err(_) => Ter::TefInternal,
            }
        }
        None => {
            let root = match account_root(view, &account) {
                Ok(root) => root,
                Err(ter) => return ter,
            };
            if !reserve_ok(view, &root, 1) {
                return Ter::TecInsufficientReserve;
            }
            let mut list = Sle::new(LedgerEntryType::SignerList, keylet);
            list.obj_mut().set_u32(&field::SF_SIGNER_QUORUM, quorum);
            list.obj_mut()
                .set(&field::SF_SIGNER_ENTRIES, StValue::Array(entries));
            match insert_owned(view, &account, list) {
                Ok(()) => Ter::TesSuccess,
                Err(ter) => ter,
            }
        }
    }
}

// ── DepositPreauth ───────────────────────────────────────────────────────────

pub fn preflight_deposit_preauth(tx: &Transaction) -> Ter {
    let authorize = tx.obj().get_account(&field::SF_AUTHORIZE);
    let unauthorize = tx.obj().get_account(&field::SF_UNAUTHORIZE);
    match (authorize, unauthorize) {
        (Some(a), None) | (None, Some(a)) => {
            if a == tx.account() {
                Ter::TemMalformed
            } else {
                Ter::TesSuccess
            }
        }
        _ => Ter::TemMalformed,
    }
}

pub fn apply_deposit_preauth(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    if let Some(authorized) = tx.obj().get_account(&field::SF_AUTHORIZE) {
        if !view.exists(&Keylet::account(&authorized).key()) {
            return Ter::TecNoTarget;
        }
        let keylet = Keylet::deposit_preauth(&account, &authorized);
        if view.exists(&keylet.key()) {
            return Ter::TecDuplicate;
        }
        let root = match account_root(view, &account) {
            Ok(root) => root,
            Err(ter) => return ter,
        };
        if !reserve_ok(view, &root, 1) {
            return Ter::TecInsufficientReserve;
        }
        let mut sle = Sle::new(LedgerEntryType::DepositPreauth, keylet);
        sle.obj_mut().set_account(&field::SF_ACCOUNT, account);
        sle.obj_mut().set_account(&field::SF_AUTHORIZE, authorized);
        match insert_owned(view, &account, sle) {
            Ok(()) => Ter::TesSuccess,
            Err(ter) => ter,
        }
    } else {
        let unauthorized = tx
            .obj()
            .get_account(&field::SF_UNAUTHORIZE)
            .expect("preflight checked");
        let keylet = Keylet::deposit_preauth(&account, &unauthorized);
        let Some(sle) = view.read(&keylet.key()) else {
            return Ter::TecNoEntry;
        };
        match crate::transactor::remove_owned(view, &account, &sle) {
            Ok(()) => Ter::TesSuccess,
            Err(ter) => ter,
        }
    }
}

// ── TicketCreate ─────────────────────────────────────────────────────────────

pub const MAX_TICKETS_PER_TX: u32 = 250;

pub fn preflight_ticket_create(tx: &Transaction) -> Ter {
    match tx.obj().get_u32(&field::SF_TICKET_COUNT) {
        Some(n) if (1..=MAX_TICKETS_PER_TX).contains(&n) => Ter::TesSuccess,
        _ => Ter::TemMalformed,
    }
}

pub fn apply_ticket_create(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let count = tx
        .obj()
        .get_u32(&field::SF_TICKET_COUNT)
        .expect("preflight checked");
    let mut root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };
    if !reserve_ok(view, &root, count) {
        return Ter::TecInsufficientReserve;
    }
    // Ticket sequences start where the account sequence (already bumped for
    // this transaction) stands; the account skips past them.
    let first = root.sequence().unwrap_or(0);
    root.set_sequence(first + count);
    if view.update(root).is_err() {
        return Ter::TefInternal;
    }
    for i in 0..count {
        let ticket_seq = first + i;
        let keylet = Keylet::ticket(&account, ticket_seq);
        let mut sle = Sle::new(LedgerEntryType::Ticket, keylet);
        sle.obj_mut().set_account(&field::SF_ACCOUNT, account);
        sle.obj_mut()
            .set_u32(&field::SF_TICKET_SEQUENCE, ticket_seq);
        if insert_owned(view, &account, sle).is_err() {
            return Ter::TecDirFull;
        }
    }
    Ter::TesSuccess
}

fn has_alternative_key(view: &dyn ReadView, root: &Sle, account: &meridian_core::AccountId) -> bool {
    root.obj().get_account(&field::SF_REGULAR_KEY).is_some()
        || view.exists(&Keylet::signer_list(account).key())
}
