use meridian_core::amount::{Amount, IouValue};
use meridian_core::issue::Issue;
use meridian_core::types::AccountId;
use meridian_core::Ter;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::flags::{
    LSF_HIGH_AUTH, LSF_HIGH_FREEZE, LSF_HIGH_NO_TRANSIT, LSF_HIGH_RESERVE, LSF_LOW_AUTH,
    LSF_LOW_FREEZE, LSF_LOW_NO_TRANSIT, LSF_LOW_RESERVE, LSF_REQUIRE_AUTH, TF_CLEAR_FREEZE,
    TF_CLEAR_NO_TRANSIT, TF_SET_AUTH, TF_SET_FREEZE, TF_SET_NO_TRANSIT, TF_TRUST_SET_MASK,
};
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::tx::Transaction;

use crate::transactor::{account_root, adjust_owner_count, reserve_ok};

pub fn preflight(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_TRUST_SET_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    let Some(limit) = tx.obj().get_amount(&field::SF_LIMIT_AMOUNT) else {
        return Ter::TemBadLimit;
    };
    let Amount::Iou { value, issue } = limit else {
        return Ter::TemBadLimit;
    };
    if value.is_negative() {
        return Ter::TemBadLimit;
    }
    if issue.issuer == tx.account() {
        return Ter::TemDstIsSrc;
    }
    if issue.issuer.is_zero() {
        return Ter::TemBadIssuer;
    }
    Ter::TesSuccess
}

pub fn apply(view: &mut ApplyView<'_>, tx: &Transaction) -> Ter {
    let account = tx.account();
    let flags = tx.flags();
    let limit = tx
        .obj()
        .get_amount(&field::SF_LIMIT_AMOUNT)
        .expect("preflight checked");
    let Amount::Iou {
        value: limit_value,
        issue,
    } = limit
    else {
        return Ter::TemBadLimit;
    };
    let issuer = issue.issuer;

    if !view.exists(&Keylet::account(&issuer).key()) {
        return Ter::TecNoIssuer;
    }

    let keylet = Keylet::line(&account, &issuer, &issue.currency);
    let account_is_low = account <= issuer;
    let (our_reserve_flag, our_auth_flag, our_no_transit, our_freeze) = if account_is_low {
        (LSF_LOW_RESERVE, LSF_LOW_AUTH, LSF_LOW_NO_TRANSIT, LSF_LOW_FREEZE)
    } else {
        (LSF_HIGH_RESERVE, LSF_HIGH_AUTH, LSF_HIGH_NO_TRANSIT, LSF_HIGH_FREEZE)
    };

    match view.read(&keylet.key()) {
        Some(mut line) => {
            let limit_field = if account_is_low {
                &field::SF_LOW_LIMIT
            } else {
                &field::SF_HIGH_LIMIT
            };
            line.obj_mut().set_amount(
                limit_field,
                Amount::Iou {
                    value: limit_value,
                    issue: Issue::new(issue.currency, account),
                },
            );
            apply_line_flags(&mut line, flags, our_no_transit, our_freeze);
            if let Some(quality_in) = tx.obj().get_u32(&field::SF_QUALITY_IN) {
                line.obj_mut().set_u32(&field::SF_QUALITY_IN, quality_in);
            }
            if let Some(quality_out) = tx.obj().get_u32(&field::SF_QUALITY_OUT) {
                line.obj_mut().set_u32(&field::SF_QUALITY_OUT, quality_out);
            }
            // tfSetAuth is sent by the currency's issuer, naming the holder
            // in LimitAmount; it marks the issuer's side as authorized.
            if flags & TF_SET_AUTH != 0 {
                let sender_root = match account_root(view, &account) {
                    Ok(root) => root,
                    Err(ter) => return ter,
                };
                if !sender_root.is_flag(LSF_REQUIRE_AUTH) {
                    return Ter::TefNoAuthRequired;
                }
                line.set_flag(our_auth_flag);
            }
            let balance = match line.balance() {
                Some(Amount::Iou { value, .. }) => value,
                _ => IouValue::ZERO,
            };
            // Default on every axis: the line evaporates.
            if limit_value.is_zero()
                && balance.is_zero()
                && peer_limit_is_zero(&line, account_is_low)
                && line.flags() & (LSF_LOW_AUTH | LSF_HIGH_AUTH) == 0
            {
                if view.erase(&keylet.key()).is_err() {
                    return Ter::TefInternal;
                }
                if line.is_flag(our_reserve_flag) {
                    if adjust_owner_count(view, &account, -1).is_err() {
                        return Ter::TefInternal;
                    }
                }
                return Ter::TesSuccess;
            }
            if view.update(line).is_err() {
                return Ter::TefInternal;
            }
            Ter::TesSuccess
        }
        None => {
            if limit_value.is_zero() && flags & (TF_SET_NO_TRANSIT | TF_SET_FREEZE | TF_SET_AUTH) == 0 {
                // Nothing to record.
                return Ter::TecNoLineRedundant;
            }
            let root = match account_root(view, &account) {
                Ok(root) => root,
                Err(ter) => return ter,
            };
            if !reserve_ok(view, &root, 1) {
                return Ter::TecNoLineInsufReserve;
            }
            let (low, high) = if account_is_low {
                (account, issuer)
            } else {
                (issuer, account)
            };
            let mut line = Sle::new(LedgerEntryType::TrustLine, keylet);
            line.set_balance(Amount::Iou {
                value: IouValue::ZERO,
                issue: Issue::new(issue.currency, AccountId::ZERO),
            });
            let (low_limit, high_limit) = if account_is_low {
                (limit_value, IouValue::ZERO)
            } else {
                (IouValue::ZERO, limit_value)
            };
            line.obj_mut().set_amount(
                &field::SF_LOW_LIMIT,
                Amount::Iou {
                    value: low_limit,
                    issue: Issue::new(issue.currency, low),
                },
            );
            line.obj_mut().set_amount(
                &field::SF_HIGH_LIMIT,
                Amount::Iou {
                    value: high_limit,
                    issue: Issue::new(issue.currency, high),
                },
            );
            line.set_flag(our_reserve_flag);
            apply_line_flags(&mut line, flags, our_no_transit, our_freeze);
            if crate::transactor::insert_owned(view, &account, line).is_err() {
                return Ter::TecDirFull;
            }
            Ter::TesSuccess
        }
    }
}

fn apply_line_flags(line: &mut Sle, tx_flags: u32, no_transit: u32, freeze: u32) {
    if tx_flags & TF_SET_NO_TRANSIT != 0 {
        line.set_flag(no_transit);
    }
    if tx_flags & TF_CLEAR_NO_TRANSIT != 0 {
        line.clear_flag(no_transit);
    }
    if tx_flags & TF_SET_FREEZE != 0 {
        line.set_flag(freeze);
    }
    if tx_flags & TF_CLEAR_FREEZE != 0 {
        line.clear_flag(freeze);
    }
}

fn peer_limit_is_zero(line: &Sle, account_is_low: bool) -> bool {
    let field = if account_is_low {
        &field::SF_HIGH_LIMIT
    } else {
        &field::SF_LOW_LIMIT
    };
    line.obj()
        .get_amount(field)
        .map(|a| a.is_zero())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactor::apply_transaction;
    use meridian_core::issue::Currency;
    use meridian_crypto::keys::{KeyType, Keypair, Seed};
    use meridian_ledger::{GenesisConfig, Ledger};
    use meridian_protocol::tx::TxType;

    fn keypair(tag: u8) -> Keypair {
        Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([tag; 16])).unwrap()
    }

    fn trust_tx(kp: &Keypair, seq: u32, issuer: AccountId, limit: i64) -> Transaction {
        let mut tx = Transaction::build(TxType::TrustSet, kp.account_id());
        tx.obj_mut().set_u32(&field::SF_SEQUENCE, seq);
        tx.obj_mut().set_amount(&field::SF_FEE, Amount::Native(10));
        tx.obj_mut().set_amount(
            &field::SF_LIMIT_AMOUNT,
            Amount::Iou {
                value: IouValue::from_int(limit),
                issue: Issue::new(Currency::from_code("USD").unwrap(), issuer),
            },
        );
        tx.sign(kp);
        tx
    }

    #[test]
    fn create_update_delete_line() {
        let master = keypair(1);
        let holder = keypair(2);
        let issuer = keypair(3);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        for kp in [&holder, &issuer] {
            view.insert(Sle::new_account_root(kp.account_id(), 10_000_000_000, 1))
                .unwrap();
        }

        let outcome = apply_transaction(&mut view, &trust_tx(&holder, 1, issuer.account_id(), 500));
        assert_eq!(outcome.result, Ter::TesSuccess);
        let keylet = Keylet::line(
            &holder.account_id(),
            &issuer.account_id(),
            &Currency::from_code("USD").unwrap(),
        );
        let line = view.read(&keylet.key()).unwrap();
        assert_eq!(line.entry_type(), LedgerEntryType::TrustLine);

        // Owner count rose with the new line.
        let root = view
            .read(&Keylet::account(&holder.account_id()).key())
            .unwrap();
        assert_eq!(root.owner_count(), 1);

        // Limit back to zero deletes the default line.
        let outcome = apply_transaction(&mut view, &trust_tx(&holder, 2, issuer.account_id(), 0));
        assert_eq!(outcome.result, Ter::TesSuccess);
        assert!(!view.exists(&keylet.key()));
    }

    #[test]
    fn trust_to_self_is_malformed() {
        let holder = keypair(2);
        let tx = trust_tx(&holder, 1, holder.account_id(), 100);
        assert_eq!(preflight(&tx), Ter::TemDstIsSrc);
    }

    #[test]
    fn missing_issuer_claims_fee() {
        let master = keypair(1);
        let holder = keypair(2);
        let ghost = AccountId::from_bytes([0x77; 20]);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        view.insert(Sle::new_account_root(holder.account_id(), 10_000_000_000, 1))
            .unwrap();
        let outcome = apply_transaction(&mut view, &trust_tx(&holder, 1, ghost, 100));
        assert_eq!(outcome.result, Ter::TecNoIssuer);
        assert!(outcome.applied);
    }

    #[test]
    fn reserve_gate_for_new_line() {
        let master = keypair(1);
        let poor = keypair(2);
        let issuer = keypair(3);
        let mut genesis = GenesisConfig::new(master.account_id()).build();
        let draft = Ledger::next(&mut genesis);
        let mut view = ApplyView::new(&draft);
        // Just enough for the base reserve, not for one more object.
        let fees = draft.fees();
        view.insert(Sle::new_account_root(
            poor.account_id(),
            fees.reserve_base as i64 + 100,
            1,
        ))
        .unwrap();
        view.insert(Sle::new_account_root(issuer.account_id(), 10_000_000_000, 1))
            .unwrap();
        let outcome = apply_transaction(&mut view, &trust_tx(&poor, 1, issuer.account_id(), 10));
        assert_eq!(outcome.result, Ter::TecNoLineInsufReserve);
        assert!(outcome.applied);
    }
}
