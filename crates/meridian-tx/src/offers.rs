use meridian_core::amount::Amount;
use meridian_core::Ter;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_paths::book::insert_offer;
use meridian_paths::flow::{flow, FlowOptions};
use meridian_paths::quality::Quality;
use meridian_protocol::field;
use meridian_protocol::flags::{
    LSF_PASSIVE, LSF_SELL, TF_FILL_OR_KILL, TF_IMMEDIATE_OR_CANCEL, TF_OFFER_CREATE_MASK,
    TF_PASSIVE, TF_SELL,
};
use meridian_protocol::keylet::Keylet;
use meridian_protocol::path::PathSet;
use meridian_protocol::sle::LedgerEntryType;
use meridian_protocol::tx::Transaction;
use tracing::debug;

use crate::transactor::{account_root, read_typed, reserve_ok};

pub fn preflight_create(tx: &Transaction) -> Ter {
    let flags = tx.flags();
    if flags & !TF_OFFER_CREATE_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    if flags & TF_IMMEDIATE_OR_CANCEL != 0 && flags & TF_FILL_OR_KILL != 0 {
        return Ter::TemInvalidFlag;
    }
    let (Some(pays), Some(gets)) = (
        tx.obj().get_amount(&field::SF_TAKER_PAYS),
        tx.obj().get_amount(&field::SF_TAKER_GETS),
    ) else {
        return Ter::TemBadOffer;
    };
    if !pays.is_positive() || !gets.is_positive() {
        return Ter::TemBadOffer;
    }
    if pays.issue() == gets.issue() {
        return Ter::TemRedundant;
    }
    if let Some(exp) = tx.obj().get_u32(&field::SF_EXPIRATION) {
        if exp == 0 {
            return Ter::TemBadExpiration;
        }
    }
    Ter::TesSuccess
}

pub fn preflight_cancel(tx: &Transaction) -> Ter {
    match tx.obj().get_u32(&field::SF_OFFER_SEQUENCE) {
        Some(seq) if seq != 0 && seq < tx.sequence().max(1) => Ter::TesSuccess,
        Some(_) => Ter::TemBadSequence,
        None => Ter::TemBadSequence,
    }
}

pub fn apply_create(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let flags = tx.flags();
    let taker_pays = tx
        .obj()
        .get_amount(&field::SF_TAKER_PAYS)
        .expect("preflight checked");
    let taker_gets = tx
        .obj()
        .get_amount(&field::SF_TAKER_GETS)
        .expect("preflight checked");

    if let Some(exp) = tx.obj().get_u32(&field::SF_EXPIRATION) {
        if exp <= view.parent_close_time() {
            // Creating an already-expired offer is a no-op that succeeds.
            return Ter::TesSuccess;
        }
    }

    // An optional predecessor offer dies first.
    if let Some(old_seq) = tx.obj().get_u32(&field::SF_OFFER_SEQUENCE) {
        let keylet = Keylet::offer(&account, old_seq);
        if read_typed(view, &keylet, LedgerEntryType::Offer).is_some()
            && meridian_paths::book::remove_offer(view, &keylet.key()).is_err()
        {
            return Ter::TefInternal;
        }
    }

    // Funding check on the offered side.
    let holds = meridian_ledger::funds::account_holds(view, &account, &taker_gets.issue());
    if holds.is_zero() || holds.is_negative() {
        return Ter::TecUnfundedOffer;
    }

    // Cross against the opposing book: deliver what we want (taker_pays),
    // spending what we give (taker_gets), never at a worse rate than ours.
    let our_quality = Quality::from_amounts(&taker_gets, &taker_pays);
    let crossing = flow(
        view,
        taker_pays,
        &account,
        &account,
        &PathSet::default(),
        &FlowOptions {
            partial_payment: true,
            send_max: Some(taker_gets),
            deliver_min: None,
            limit_quality: our_quality,
            default_path: true,
            offer_crossing: true,
        },
    );
    debug!(result = %crossing.result, in_ = %crossing.actual_in, out = %crossing.actual_out, "offer crossing");

    let got = crossing.actual_out;
    let spent = crossing.actual_in;
    let fully_crossed = match taker_pays.compare(&got) {
        Ok(std::cmp::Ordering::Greater) => false,
        Ok(_) => true,
        Err(_) => false,
    };

    if flags & TF_FILL_OR_KILL != 0 && !fully_crossed {
        return Ter::TecKilled;
    }
    if fully_crossed || flags & TF_IMMEDIATE_OR_CANCEL != 0 {
        return Ter::TesSuccess;
    }

    // Place the remainder in the book.
    let remaining_pays = taker_pays.checked_sub(got).unwrap_or(taker_pays);
    let remaining_gets = taker_gets.checked_sub(spent).unwrap_or(taker_gets);
    if !remaining_pays.is_positive() || !remaining_gets.is_positive() {
        return Ter::TesSuccess;
    }

    let root = match account_root(view, &account) {
        Ok(root) => root,
        Err(ter) => return ter,
    };
    if !reserve_ok(view, &root, 1) {
        return Ter::TecInsufReserveOffer;
    }

    let mut lsf = 0;
    if flags & TF_PASSIVE != 0 {
        lsf |= LSF_PASSIVE;
    }
    if flags & TF_SELL != 0 {
        lsf |= LSF_SELL;
    }
    let sequence = tx.sequence();
    match insert_offer(
        view,
        &account,
        sequence,
        remaining_pays,
        remaining_gets,
        lsf,
        tx.obj().get_u32(&field::SF_EXPIRATION),
    ) {
        Ok(_) => Ter::TesSuccess,
        Err(_) => Ter::TecDirFull,
    }
}

pub fn apply_cancel(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let old_seq = tx
        .obj()
        .get_u32(&field::SF_OFFER_SEQUENCE)
        .expect("preflight checked");
    let keylet = Keylet::offer(&account, old_seq);
    match read_typed(view, &keylet, LedgerEntryType::Offer) {
        Some(_) => match meridian_paths::book::remove_offer(view, &keylet.key()) {
            Ok(()) => Ter::TesSuccess,
            Err(_) => Ter::TefInternal,
        },
        // Cancelling a dead offer succeeds quietly.
        None => Ter::TesSuccess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactor::apply_transaction;
    use meridian_core::amount::IouValue;
    use meridian_core::issue::{Currency, Issue};
    use meridian_core::types::AccountId;
    use meridian_crypto::keys::{KeyType, Keypair, Seed};
    use meridian_ledger::funds::{account_send, line_balance};
    use meridian_ledger::{GenesisConfig, Ledger};
    use meridian_paths::book::book_offers;
    use meridian_protocol::sle::Sle;
    use meridian_protocol::tx::TxType;

    fn keypair(tag: u8) -> Keypair {
        Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([tag; 16])).unwrap()
    }

    fn usd(issuer: AccountId) -> Issue {
        Issue::new(Currency::from_code("USD").unwrap(), issuer)
    }

    fn iou(value: i64, issue: Issue) -> Amount {
        Amount::iou(IouValue::from_int(value), issue)
    }

    fn offer_tx(kp: &Keypair, seq: u32, pays: Amount, gets: Amount, flags: u32) -> Transaction {
        let mut tx = Transaction::build(TxType::OfferCreate, kp.account_id());
        tx.obj_mut().set_u32(&field::SF_SEQUENCE, seq);
        tx.obj_mut().set_amount(&field::SF_FEE, Amount::Native(10));
        tx.obj_mut().set_amount(&field::SF_TAKER_PAYS, pays);
        tx.obj_mut().set_amount(&field::SF_TAKER_GETS, gets);
        if flags != 0 {
            tx.obj_mut().set_u32(&field::SF_FLAGS, flags);
        }
        tx.sign(kp);
        tx
    }

    /// A maker offers 100 USD for 100 MRD; a taker posts the mirror offer;
    /// both fully consume.
    #[test]
    fn offers_cross_fully() {
        let master = keypair(1);
        let maker = keypair(2);
        let taker = keypair(3);
        let issuer = keypair(4);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        for kp in [&maker, &taker, &issuer] {
            view.insert(Sle::new_account_root(kp.account_id(), 10_000_000_000, 1))
                .unwrap();
        }
        // Maker holds USD and offers it for MRD.
        account_send(
            &mut view,
            &issuer.account_id(),
            &maker.account_id(),
            iou(100, usd(issuer.account_id())),
        )
        .unwrap();
        let maker_offer = offer_tx(
            &maker,
            1,
            Amount::drops(100_000_000),
            iou(100, usd(issuer.account_id())),
            0,
        );
        let outcome = apply_transaction(&mut view, &maker_offer);
        assert_eq!(outcome.result, Ter::TesSuccess);
        let book = meridian_core::issue::Book::new(
            Amount::drops(0).issue(),
            usd(issuer.account_id()),
        );
        assert_eq!(book_offers(&view, &book, 10).len(), 1);

        // Taker posts the mirror: pays 100 USD, gets 100 MRD.
        let taker_offer = offer_tx(
            &taker,
            1,
            iou(100, usd(issuer.account_id())),
            Amount::drops(100_000_000),
            0,
        );
        let outcome = apply_transaction(&mut view, &taker_offer);
        assert_eq!(outcome.result, Ter::TesSuccess);

        // Both offers consumed; the taker now holds the USD.
        assert!(book_offers(&view, &book, 10).is_empty());
        assert_eq!(
            line_balance(&view, &taker.account_id(), &usd(issuer.account_id())),
            IouValue::from_int(100)
        );
        // The maker received 100 MRD.
        let maker_root = view
            .read(&Keylet::account(&maker.account_id()).key())
            .unwrap();
        let balance = maker_root.balance().unwrap().native_drops().unwrap();
        assert_eq!(balance, 10_000_000_000 - 10 + 100_000_000);
    }

    #[test]
    fn unfunded_offer_claims_fee_only() {
        let master = keypair(1);
        let maker = keypair(2);
        let issuer = keypair(4);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        view.insert(Sle::new_account_root(maker.account_id(), 10_000_000_000, 1))
            .unwrap();
        // Maker has no USD at all.
        let tx = offer_tx(
            &maker,
            1,
            Amount::drops(100_000_000),
            iou(100, usd(issuer.account_id())),
            0,
        );
        let outcome = apply_transaction(&mut view, &tx);
        assert_eq!(outcome.result, Ter::TecUnfundedOffer);
        assert!(outcome.applied);
    }

    #[test]
    fn fill_or_kill_dies_without_liquidity() {
        let master = keypair(1);
        let maker = keypair(2);
        let issuer = keypair(4);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        view.insert(Sle::new_account_root(maker.account_id(), 10_000_000_000, 1))
            .unwrap();
        account_send(
            &mut view,
            &issuer.account_id(),
            &maker.account_id(),
            iou(100, usd(issuer.account_id())),
        )
        .unwrap();
        let tx = offer_tx(
            &maker,
            1,
            Amount::drops(100_000_000),
            iou(100, usd(issuer.account_id())),
            TF_FILL_OR_KILL,
        );
        let outcome = apply_transaction(&mut view, &tx);
        assert_eq!(outcome.result, Ter::TecKilled);
        assert!(outcome.applied);
    }

    #[test]
    fn cancel_removes_offer() {
        let master = keypair(1);
        let maker = keypair(2);
        let issuer = keypair(4);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        view.insert(Sle::new_account_root(maker.account_id(), 10_000_000_000, 1))
            .unwrap();
        account_send(
            &mut view,
            &issuer.account_id(),
            &maker.account_id(),
            iou(100, usd(issuer.account_id())),
        )
        .unwrap();
        let create = offer_tx(
            &maker,
            1,
            Amount::drops(100_000_000),
            iou(100, usd(issuer.account_id())),
            0,
        );
        assert_eq!(apply_transaction(&mut view, &create).result, Ter::TesSuccess);

        let mut cancel = Transaction::build(TxType::OfferCancel, maker.account_id());
        cancel.obj_mut().set_u32(&field::SF_SEQUENCE, 2);
        cancel
            .obj_mut()
            .set_amount(&field::SF_FEE, Amount::Native(10));
        cancel.obj_mut().set_u32(&field::SF_OFFER_SEQUENCE, 1);
        cancel.sign(&maker);
        assert_eq!(apply_transaction(&mut view, &cancel).result, Ter::TesSuccess);
        assert!(!view.exists(&Keylet::offer(&maker.account_id(), 1).key()));
    }
}
