use meridian_core::amount::Amount;
use meridian_core::Ter;
use meridian_ledger::funds::{account_holds, account_send};
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::flags::TF_UNIVERSAL_MASK;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::tx::Transaction;

use crate::transactor::{account_root, read_typed, remove_owned, reserve_ok, view_now};

pub fn preflight_create(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_UNIVERSAL_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    let Some(send_max) = tx.obj().get_amount(&field::SF_SEND_MAX) else {
        return Ter::TemBadAmount;
    };
    if !send_max.is_positive() {
        return Ter::TemBadAmount;
    }
    let Some(destination) = tx.obj().get_account(&field::SF_DESTINATION) else {
        return Ter::TemDstNeeded;
    };
    if destination == tx.account() {
        return Ter::TemDstIsSrc;
    }
    Ter::TesSuccess
}

pub fn preflight_cash(tx: &Transaction) -> Ter {
    if tx.obj().get_h256(&field::SF_CHECK_ID).is_none() {
        return Ter::TemMalformed;
    }
    let amount = tx.obj().get_amount(&field::SF_AMOUNT);
    let deliver_min = tx.obj().get_amount(&field::SF_DELIVER_MIN);
    match (amount, deliver_min) {
        (Some(a), None) if a.is_positive() => Ter::TesSuccess,
        (None, Some(d)) if d.is_positive() => Ter::TesSuccess,
        _ => Ter::TemMalformed,
    }
}

pub fn apply_create(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let destination = tx
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("preflight checked");
    if !view.exists(&Keylet::account(&destination).key()) {
        return Ter::TecNoDst;
    }
    if let Some(exp) = tx.obj().get_u32(&field::SF_EXPIRATION) {
        if exp <= view_now(view) {
            return Ter::TecExpired;
        }
    }
    let root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };
    if !reserve_ok(view, &root, 1) {
        return Ter::TecInsufficientReserve;
    }

    let keylet = Keylet::check(&account, tx.sequence());
    let mut sle = Sle::new(LedgerEntryType::Check, keylet);
    sle.obj_mut().set_account(&field::SF_ACCOUNT, account);
    sle.obj_mut().set_account(&field::SF_DESTINATION, destination);
    sle.obj_mut().set_amount(
        &field::SF_SEND_MAX,
        tx.obj().get_amount(&field::SF_SEND_MAX).expect("preflight"),
    );
    sle.obj_mut().set_u32(&field::SF_SEQUENCE, tx.sequence());
    if let Some(exp) = tx.obj().get_u32(&field::SF_EXPIRATION) {
        sle.obj_mut().set_u32(&field::SF_EXPIRATION, exp);
    }
    if let Some(id) = tx.obj().get_h256(&field::SF_INVOICE_ID) {
        sle.obj_mut().set_h256(&field::SF_INVOICE_ID, id);
    }
    match crate::transactor::insert_owned(view, &account, sle) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}

pub fn apply_cash(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let check_id = tx.obj().get_h256(&field::SF_CHECK_ID).expect("preflight");
    let Some(check) = read_typed(view, &Keylet(check_id), LedgerEntryType::Check) else {
        return Ter::TecNoEntry;
    };
    let writer = check.account().expect("created with an account");
    let destination = check
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("created with a destination");
    if account != destination {
        return Ter::TecNoPermission;
    }
    if let Some(exp) = check.obj().get_u32(&field::SF_EXPIRATION) {
        if exp <= view_now(view) {
            // An expired check can only be cancelled.
            return Ter::TecExpired;
        }
    }
    let send_max = check
        .obj()
        .get_amount(&field::SF_SEND_MAX)
        .expect("created with a cap");

    // Exact amount, or best effort above a floor.
    let (requested, floor) = match tx.obj().get_amount(&field::SF_AMOUNT) {
        Some(amount) => (amount, amount),
        None => {
            let min = tx
                .obj()
                .get_amount(&field::SF_DELIVER_MIN)
                .expect("preflight checked");
            (send_max, min)
        }
    };
    if requested.issue() != send_max.issue() || floor.issue() != send_max.issue() {
        return Ter::TemBadCurrency;
    }
    if matches!(requested.compare(&send_max), Ok(std::cmp::Ordering::Greater)) {
        return Ter::TecPathPartial;
    }

    // The writer funds the delivery at cash time.
    let holds = account_holds(view, &writer, &requested.issue());
    let payable = match requested.min_of(holds) {
        Ok(p) => p,
        Err(_) => return Ter::TefInternal,
    };
    if matches!(payable.compare(&floor), Ok(std::cmp::Ordering::Less)) {
        return Ter::TecUnfundedPayment;
    }
    if account_send(view, &writer, &destination, payable).is_err() {
        return Ter::TefInternal;
    }
    match remove_owned(view, &writer, &check) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}

pub fn apply_cancel(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let Some(check_id) = tx.obj().get_h256(&field::SF_CHECK_ID) else {
        return Ter::TemMalformed;
    };
    let Some(check) = read_typed(view, &Keylet(check_id), LedgerEntryType::Check) else {
        return Ter::TecNoEntry;
    };
    let writer = check.account().expect("created with an account");
    let destination = check
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("created with a destination");
    let expired = check
        .obj()
        .get_u32(&field::SF_EXPIRATION)
        .map(|exp| exp <= view_now(view))
        .unwrap_or(false);
    // Writer and payee may always cancel; anyone may reap an expired check.
    if account != writer && account != destination && !expired {
        return Ter::TecNoPermission;
    }
    match remove_owned(view, &writer, &check) {
        Ok(()) => Ter::TesSuccess,
        Err(ter) => ter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactor::apply_transaction;
    use meridian_core::amount::IouValue;
    use meridian_core::issue::{Currency, Issue};
    use meridian_crypto::keys::{KeyType, Keypair, Seed};
    use meridian_ledger::{GenesisConfig, Ledger};
    use meridian_protocol::tx::TxType;

    fn keypair(tag: u8) -> Keypair {
        Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([tag; 16])).unwrap()
    }

    fn setup(a: &Keypair, b: &Keypair) -> Ledger {
        let master = keypair(0x7C);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let mut draft = Ledger::next(&mut genesis);
        for kp in [a, b] {
            draft
                .raw_insert(&Sle::new_account_root(kp.account_id(), 10_000_000_000, 1))
                .unwrap();
        }
        draft
    }

    #[test]
    fn write_then_cash_native_check() {
        let writer = keypair(1);
        let payee = keypair(2);
        let draft = setup(&writer, &payee);
        let mut view = ApplyView::new(&draft);

        let mut create = Transaction::build(TxType::CheckCreate, writer.account_id());
        create.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        create
            .obj_mut()
            .set_amount(&field::SF_FEE, Amount::Native(10));
        create
            .obj_mut()
            .set_amount(&field::SF_SEND_MAX, Amount::drops(3_000_000));
        create
            .obj_mut()
            .set_account(&field::SF_DESTINATION, payee.account_id());
        create.sign(&writer);
        assert_eq!(apply_transaction(&mut view, &create).result, Ter::TesSuccess);

        let check_id = Keylet::check(&writer.account_id(), 1).key();
        let mut cash = Transaction::build(TxType::CheckCash, payee.account_id());
        cash.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        cash.obj_mut().set_amount(&field::SF_FEE, Amount::Native(10));
        cash.obj_mut().set_h256(&field::SF_CHECK_ID, check_id);
        cash.obj_mut()
            .set_amount(&field::SF_AMOUNT, Amount::drops(3_000_000));
        cash.sign(&payee);
        assert_eq!(apply_transaction(&mut view, &cash).result, Ter::TesSuccess);

        assert!(!view.exists(&check_id));
        let payee_root = view
            .read(&Keylet::account(&payee.account_id()).key())
            .unwrap();
        assert_eq!(
            payee_root.balance().unwrap().native_drops().unwrap(),
            10_000_000_000 + 3_000_000 - 10
        );
    }

    #[test]
    fn only_payee_cashes() {
        let writer = keypair(1);
        let payee = keypair(2);
        let thief = keypair(3);
        let mut draft = setup(&writer, &payee);
        draft
            .raw_insert(&Sle::new_account_root(thief.account_id(), 10_000_000_000, 1))
            .unwrap();
        let mut view = ApplyView::new(&draft);

        let mut create = Transaction::build(TxType::CheckCreate, writer.account_id());
        create.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        create
            .obj_mut()
            .set_amount(&field::SF_FEE, Amount::Native(10));
        create
            .obj_mut()
            .set_amount(&field::SF_SEND_MAX, Amount::drops(1_000_000));
        create
            .obj_mut()
            .set_account(&field::SF_DESTINATION, payee.account_id());
        create.sign(&writer);
        assert_eq!(apply_transaction(&mut view, &create).result, Ter::TesSuccess);

        let check_id = Keylet::check(&writer.account_id(), 1).key();
        let mut steal = Transaction::build(TxType::CheckCash, thief.account_id());
        steal.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        steal
            .obj_mut()
            .set_amount(&field::SF_FEE, Amount::Native(10));
        steal.obj_mut().set_h256(&field::SF_CHECK_ID, check_id);
        steal
            .obj_mut()
            .set_amount(&field::SF_AMOUNT, Amount::drops(1_000_000));
        steal.sign(&thief);
        assert_eq!(
            apply_transaction(&mut view, &steal).result,
            Ter::TecNoPermission
        );
    }

    #[test]
    fn iou_check_with_deliver_min() {
        let writer = keypair(1);
        let payee = keypair(2);
        let issuer = keypair(3);
        let mut draft = setup(&writer, &payee);
        draft
            .raw_insert(&Sle::new_account_root(issuer.account_id(), 10_000_000_000, 1))
            .unwrap();
        let mut view = ApplyView::new(&draft);
        let usd = Issue::new(Currency::from_code("USD").unwrap(), issuer.account_id());
        account_send(
            &mut view,
            &issuer.account_id(),
            &writer.account_id(),
            Amount::iou(IouValue::from_int(20), usd),
        )
        .unwrap();

        let mut create = Transaction::build(TxType::CheckCreate, writer.account_id());
        create.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        create
            .obj_mut()
            .set_amount(&field::SF_FEE, Amount::Native(10));
        create.obj_mut().set_amount(
            &field::SF_SEND_MAX,
            Amount::iou(IouValue::from_int(50), usd),
        );
        create
            .obj_mut()
            .set_account(&field::SF_DESTINATION, payee.account_id());
        create.sign(&writer);
        assert_eq!(apply_transaction(&mut view, &create).result, Ter::TesSuccess);

        // Writer only holds 20 USD; cashing for at least 10 succeeds with
        // what is actually there.
        let check_id = Keylet::check(&writer.account_id(), 1).key();
        let mut cash = Transaction::build(TxType::CheckCash, payee.account_id());
        cash.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        cash.obj_mut().set_amount(&field::SF_FEE, Amount::Native(10));
        cash.obj_mut().set_h256(&field::SF_CHECK_ID, check_id);
        cash.obj_mut().set_amount(
            &field::SF_DELIVER_MIN,
            Amount::iou(IouValue::from_int(10), usd),
        );
        cash.sign(&payee);
        assert_eq!(apply_transaction(&mut view, &cash).result, Ter::TesSuccess);
        assert_eq!(
            meridian_ledger::funds::line_balance(&view, &payee.account_id(), &usd),
            IouValue::from_int(20)
        );
    }
}
