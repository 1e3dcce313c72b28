use meridian_core::amount::Amount;
use meridian_ledger::dirs::page_has_duplicates;
use meridian_ledger::view::{Delta, DeltaEntry};
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use tracing::error;

/// Post-apply checks that every successful transaction must pass. Any
/// failure voids the transaction's effects (the fee still burns) and is
/// reported loudly: a transactor that trips these has a logic bug.
pub fn check(base: &dyn ReadView, delta: &Delta, fee: u64) -> bool {
    native_conservation(base, delta, fee)
        && no_negative_balances(delta)
        && no_duplicate_directory_entries(delta)
        && signer_lists_well_formed(delta)
        && offers_well_formed(delta)
}

/// Native drops are conserved: the sum of account-root balance changes in
/// the inner delta must be zero. (The fee was charged outside the inner
/// sandbox; drops destroyed inside must be matched by balance reduction.)
fn native_conservation(base: &dyn ReadView, delta: &Delta, _fee: u64) -> bool {
    let mut net: i128 = 0;
    for (key, entry) in delta.entries() {
        let old = base
            .read(key)
            .filter(|sle| sle.entry_type() == LedgerEntryType::AccountRoot)
            .and_then(|sle| sle.balance())
            .and_then(|b| b.native_drops().ok())
            .unwrap_or(0) as i128;
        let new = match &entry {
            DeltaEntry::Inserted(sle) | DeltaEntry::Replaced(sle) => {
                if sle.entry_type() != LedgerEntryType::AccountRoot {
                    continue;
                }
                sle.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0) as i128
            }
            DeltaEntry::Erased => 0,
        };
        net += new - old;
    }
    // Escrows and payment channels sequester drops outside account roots.
    for (key, entry) in delta.entries() {
        let holds = |sle: &Sle| -> i128 {
            match sle.entry_type() {
                LedgerEntryType::Escrow => sle
                    .obj()
                    .get_amount(&field::SF_AMOUNT)
                    .and_then(|a| a.native_drops().ok())
                    .unwrap_or(0) as i128,
                LedgerEntryType::PayChannel => {
                    let amount = sle
                        .obj()
                        .get_amount(&field::SF_AMOUNT)
                        .and_then(|a| a.native_drops().ok())
                        .unwrap_or(0);
                    let claimed = sle
                        .balance()
                        .and_then(|a| a.native_drops().ok())
                        .unwrap_or(0);
                    (amount - claimed) as i128
                }
                _ => 0,
            }
        };
        let old = base.read(key).map(|sle| holds(&sle)).unwrap_or(0);
        let new = match &entry {
            DeltaEntry::Inserted(sle) | DeltaEntry::Replaced(sle) => holds(sle),
            DeltaEntry::Erased => 0,
        };
        net += new - old;
    }
    let destroyed = delta.destroyed() as i128;
    if net + destroyed != 0 {
        error!(net, destroyed = delta.destroyed(), "native conservation violated");
        return false;
    }
    true
}

fn no_negative_balances(delta: &Delta) -> bool {
    for (_, entry) in delta.entries() {
        let (DeltaEntry::Inserted(sle) | DeltaEntry::Replaced(sle)) = entry else {
            continue;
        };
        if sle.entry_type() == LedgerEntryType::AccountRoot {
            if let Some(Amount::Native(drops)) = sle.balance() {
                if drops < 0 {
                    error!(account = ?sle.account(), drops, "negative native balance");
                    return false;
                }
            }
        }
    }
    true
}

fn no_duplicate_directory_entries(delta: &Delta) -> bool {
    for (_, entry) in delta.entries() {
        let (DeltaEntry::Inserted(sle) | DeltaEntry::Replaced(sle)) = entry else {
            continue;
        };
        if page_has_duplicates(sle) {
            error!(key = %sle.key(), "duplicate directory entry");
            return false;
        }
    }
    true
}

fn signer_lists_well_formed(delta: &Delta) -> bool {
    for (_, entry) in delta.entries() {
        let (DeltaEntry::Inserted(sle) | DeltaEntry::Replaced(sle)) = entry else {
            continue;
        };
        if sle.entry_type() != LedgerEntryType::SignerList {
            continue;
        }
        let quorum = sle.obj().get_u32(&field::SF_SIGNER_QUORUM).unwrap_or(0);
        let entries = sle.obj().get_array(&field::SF_SIGNER_ENTRIES).unwrap_or(&[]);
        let weight_sum: u32 = entries
            .iter()
            .map(|(_, e)| e.get_u16(&field::SF_SIGNER_WEIGHT).unwrap_or(0) as u32)
            .sum();
        if quorum == 0 || weight_sum < quorum || entries.is_empty() {
            error!(quorum, weight_sum, "malformed signer list");
            return false;
        }
    }
    true
}

fn offers_well_formed(delta: &Delta) -> bool {
    for (_, entry) in delta.entries() {
        let (DeltaEntry::Inserted(sle) | DeltaEntry::Replaced(sle)) = entry else {
            continue;
        };
        if sle.entry_type() != LedgerEntryType::Offer {
            continue;
        }
        let pays = sle.obj().get_amount(&field::SF_TAKER_PAYS);
        let gets = sle.obj().get_amount(&field::SF_TAKER_GETS);
        let (Some(pays), Some(gets)) = (pays, gets) else {
            error!(key = %sle.key(), "offer missing amounts");
            return false;
        };
        if !pays.is_positive() || !gets.is_positive() || pays.issue() == gets.issue() {
            error!(key = %sle.key(), "offer amounts invalid");
            return false;
        }
    }
    true
}
