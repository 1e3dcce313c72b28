use meridian_core::Ter;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::stobject::StValue;
use meridian_protocol::tx::Transaction;
use tracing::info;

/// Activate an amendment: append its id to the amendments table. Injected
/// by consensus at flag ledgers once the vote held long enough.
pub fn apply_amendment(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let Some(amendment) = tx.obj().get_h256(&field::SF_AMENDMENT) else {
        return Ter::TemMalformed;
    };
    let keylet = Keylet::amendments();
    let mut sle = view
        .read(&keylet.key())
        .unwrap_or_else(|| Sle::new(LedgerEntryType::Amendments, keylet));
    let mut list: Vec<_> = sle
        .obj()
        .get_v256(&field::SF_AMENDMENTS)
        .unwrap_or(&[])
        .to_vec();
    if list.contains(&amendment) {
        return Ter::TefAlready;
    }
    list.push(amendment);
    sle.obj_mut().set(&field::SF_AMENDMENTS, StValue::V256(list));
    let result = if view.exists(&keylet.key()) {
        view.update(sle)
    } else {
        view.insert(sle)
    };
    match result {
        Ok(()) => {
            info!(%amendment, "amendment activated");
            Ter::TesSuccess
        }
        Err(_) => Ter::TefInternal,
    }
}

/// Rewrite the fee schedule from a quorum of validator fee votes.
pub fn apply_set_fee(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let Some(base_fee) = tx.obj().get_u64(&field::SF_BASE_FEE) else {
        return Ter::TemMalformed;
    };
    let reserve_base = tx.obj().get_u32(&field::SF_RESERVE_BASE);
    let reserve_increment = tx.obj().get_u32(&field::SF_RESERVE_INCREMENT);

    let keylet = Keylet::fees();
    let mut sle = view
        .read(&keylet.key())
        .unwrap_or_else(|| Sle::new(LedgerEntryType::FeeSettings, keylet));
    sle.obj_mut().set_u64(&field::SF_BASE_FEE, base_fee);
    if let Some(v) = reserve_base {
        sle.obj_mut().set_u32(&field::SF_RESERVE_BASE, v);
    }
    if let Some(v) = reserve_increment {
        sle.obj_mut().set_u32(&field::SF_RESERVE_INCREMENT, v);
    }
    let result = if view.exists(&keylet.key()) {
        view.update(sle)
    } else {
        view.insert(sle)
    };
    match result {
        Ok(()) => {
            info!(base_fee, "fee schedule updated");
            Ter::TesSuccess
        }
        Err(_) => Ter::TefInternal,
    }
}
