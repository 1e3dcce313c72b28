use meridian_core::amount::{Amount, IouValue, Rounding};
use meridian_core::issue::Issue;
use meridian_core::types::AccountId;
use meridian_protocol::field;
use meridian_protocol::flags::{LSF_GLOBAL_FREEZE, LSF_HIGH_FREEZE, LSF_LOW_FREEZE};
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};

use crate::view::ApplyView;
use crate::{LedgerError, ReadView};

/// Transfer rate unit: a rate of 1.0 (no fee).
pub const RATE_ONE: u32 = 1_000_000_000;

/// The issuer's transfer fee as billionths; 1e9 means no fee.
pub fn transfer_rate(view: &dyn ReadView, issuer: &AccountId) -> u32 {
    view.read(&Keylet::account(issuer).key())
        .and_then(|sle| sle.obj().get_u32(&field::SF_TRANSFER_RATE))
        .filter(|&r| r >= RATE_ONE)
        .unwrap_or(RATE_ONE)
}

/// Signed trust-line balance from `account`'s perspective: positive means
/// `account` holds the issuer's obligations.
pub fn line_balance(view: &dyn ReadView, account: &AccountId, issue: &Issue) -> IouValue {
    let keylet = Keylet::line(account, &issue.issuer, &issue.currency);
    let Some(sle) = view.read(&keylet.key()) else {
        return IouValue::ZERO;
    };
    let Some(Amount::Iou { value, .. }) = sle.balance() else {
        return IouValue::ZERO;
    };
    // Stored from the low account's perspective.
    if account <= &issue.issuer {
        value
    } else {
        value.negate()
    }
}

/// Is `issue` frozen for `account`, globally or on its line.
pub fn is_frozen(view: &dyn ReadView, account: &AccountId, issue: &Issue) -> bool {
    if issue.is_native() || account == &issue.issuer {
        return false;
    }
    if let Some(root) = view.read(&Keylet::account(&issue.issuer).key()) {
        if root.is_flag(LSF_GLOBAL_FREEZE) {
            return true;
        }
    }
    let keylet = Keylet::line(account, &issue.issuer, &issue.currency);
    if let Some(line) = view.read(&keylet.key()) {
        // The freeze that matters is the one set by the issuer's side.
        let issuer_is_low = issue.issuer <= *account;
        let flag = if issuer_is_low {
            LSF_LOW_FREEZE
        } else {
            LSF_HIGH_FREEZE
        };
        if line.is_flag(flag) {
            return true;
        }
    }
    false
}

/// What `account` can spend of `issue`. Native spendable excludes the
/// reserve; issued holdings are zero when frozen.
pub fn account_holds(view: &dyn ReadView, account: &AccountId, issue: &Issue) -> Amount {
    if issue.is_native() {
        let Some(root) = view.read(&Keylet::account(account).key()) else {
            return Amount::Native(0);
        };
        let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
        let reserve = view.fees().account_reserve(root.owner_count()) as i64;
        return Amount::Native((balance - reserve).max(0));
    }
    if account == &issue.issuer {
        // The issuer can always issue more.
        return Amount::Iou {
            value: IouValue::new(false, meridian_core::amount::MANTISSA_MAX, 80)
                .expect("max value is canonical"),
            issue: *issue,
        };
    }
    if is_frozen(view, account, issue) {
        return Amount::zero(*issue);
    }
    let value = line_balance(view, account, issue);
    if value.is_negative() {
        Amount::zero(*issue)
    } else {
        Amount::Iou {
            value,
            issue: *issue,
        }
    }
}

/// Adjust `account`'s line with the issuer of `issue` by `delta` (from the
/// account's perspective), creating the line when absent.
fn adjust_line(
    view: &mut ApplyView<'_>,
    account: &AccountId,
    issue: &Issue,
    delta: IouValue,
) -> Result<(), LedgerError> {
    let keylet = Keylet::line(account, &issue.issuer, &issue.currency);
    let account_is_low = account <= &issue.issuer;
    let stored_delta = if account_is_low { delta } else { delta.negate() };

    match view.read(&keylet.key()) {
        Some(mut sle) => {
            let current = match sle.balance() {
                Some(Amount::Iou { value, .. }) => value,
                _ => IouValue::ZERO,
            };
            let next = current
                .checked_add(stored_delta)
                .map_err(|_| LedgerError::DropsOverflow)?;
            sle.set_balance(Amount::Iou {
                value: next,
                issue: Issue::new(issue.currency, AccountId::ZERO),
            });
            if next.is_zero() && line_limits_are_zero(&sle) {
                view.erase(&keylet.key())?;
            } else {
                view.update(sle)?;
            }
            Ok(())
        }
        None => {
            let (low, high) = if account_is_low {
                (*account, issue.issuer)
            } else {
                (issue.issuer, *account)
            };
            let mut sle = Sle::new(LedgerEntryType::TrustLine, keylet);
            sle.set_balance(Amount::Iou {
                value: stored_delta,
                issue: Issue::new(issue.currency, AccountId::ZERO),
            });
            sle.obj_mut().set_amount(
                &field::SF_LOW_LIMIT,
                Amount::Iou {
                    value: IouValue::ZERO,
                    issue: Issue::new(issue.currency, low),
                },
            );
            sle.obj_mut().set_amount(
                &field::SF_HIGH_LIMIT,
                Amount::Iou {
                    value: IouValue::ZERO,
                    issue: Issue::new(issue.currency, high),
                },
            );
            view.insert(sle)?;
            Ok(())
        }
    }
}

fn line_limits_are_zero(sle: &Sle) -> bool {
    let low = sle.obj().get_amount(&field::SF_LOW_LIMIT);
    let high = sle.obj().get_amount(&field::SF_HIGH_LIMIT);
    let zero = |a: Option<Amount>| a.map(|a| a.is_zero()).unwrap_or(true);
    zero(low) && zero(high)
}

/// Move native drops between account roots.
pub fn native_transfer(
    view: &mut ApplyView<'_>,
    from: &AccountId,
    to: &AccountId,
    drops: i64,
) -> Result<(), LedgerError> {
    debug_assert!(drops >= 0);
    let from_key = Keylet::account(from).key();
    let mut from_sle = view.read(&from_key).ok_or(LedgerError::NotFound(from_key))?;
    let from_balance = from_sle
        .balance()
        .and_then(|b| b.native_drops().ok())
        .unwrap_or(0);
    from_sle.set_balance(Amount::Native(from_balance - drops));
    view.update(from_sle)?;

    let to_key = Keylet::account(to).key();
    let mut to_sle = view.read(&to_key).ok_or(LedgerError::NotFound(to_key))?;
    let to_balance = to_sle
        .balance()
        .and_then(|b| b.native_drops().ok())
        .unwrap_or(0);
    to_sle.set_balance(Amount::Native(to_balance + drops));
    view.update(to_sle)?;
    Ok(())
}

/// Move value from `from` to `to`. Issued amounts settle through the
/// issuer's books: `from` is debited, `to` credited, each on its own line
/// with the issuer. The caller accounts for any transfer fee.
pub fn account_send(
    view: &mut ApplyView<'_>,
    from: &AccountId,
    to: &AccountId,
    amount: Amount,
) -> Result<(), LedgerError> {
    if amount.is_zero() {
        return Ok(());
    }
    debug_assert!(!amount.is_negative());
    match amount {
        Amount::Native(drops) => native_transfer(view, from, to, drops),
        Amount::Iou { value, issue } => {
            if from != &issue.issuer {
                adjust_line(view, from, &issue, value.negate())?;
            }
            if to != &issue.issuer {
                adjust_line(view, to, &issue, value)?;
            }
            Ok(())
        }
    }
}

/// The transfer-fee-adjusted input needed to deliver `out` through
/// `issuer`: out × rate, rounded against the sender.
pub fn multiply_rate(out: IouValue, rate: u32) -> IouValue {
    if rate == RATE_ONE {
        return out;
    }
    let rate_value = IouValue::new(false, rate as u64, -9).expect("rate in range");
    out.checked_mul(rate_value, Rounding::Up).unwrap_or(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisConfig;
    use crate::ledger::Ledger;
    use meridian_core::issue::Currency;

    fn genesis(master: AccountId) -> Ledger {
        GenesisConfig::new(master).build()
    }

    fn usd(issuer: AccountId) -> Issue {
        Issue::new(Currency::from_code("USD").unwrap(), issuer)
    }

    #[test]
    fn native_holds_excludes_reserve() {
        let master = AccountId::from_bytes([0xAA; 20]);
        let ledger = genesis(master);
        let view = ApplyView::new(&ledger);
        let holds = account_holds(&view, &master, &Issue::NATIVE);
        let expected = meridian_core::constants::GENESIS_DROPS as i64
            - ledger.fees().account_reserve(0) as i64;
        assert_eq!(holds, Amount::Native(expected));
    }

    #[test]
    fn iou_send_creates_and_balances_lines() {
        let master = AccountId::from_bytes([0xAA; 20]);
        let issuer = AccountId::from_bytes([0x01; 20]);
        let holder = AccountId::from_bytes([0x02; 20]);
        let ledger = genesis(master);
        let mut view = ApplyView::new(&ledger);

        let hundred = IouValue::from_int(100);
        account_send(
            &mut view,
            &issuer,
            &holder,
            Amount::Iou {
                value: hundred,
                issue: usd(issuer),
            },
        )
        .unwrap();

        assert_eq!(line_balance(&view, &holder, &usd(issuer)), hundred);
        let holds = account_holds(&view, &holder, &usd(issuer));
        assert_eq!(
            holds,
            Amount::Iou {
                value: hundred,
                issue: usd(issuer)
            }
        );
    }

    #[test]
    fn round_trip_send_cancels_out() {
        let master = AccountId::from_bytes([0xAA; 20]);
        let issuer = AccountId::from_bytes([0x01; 20]);
        let a = AccountId::from_bytes([0x02; 20]);
        let b = AccountId::from_bytes([0x03; 20]);
        let ledger = genesis(master);
        let mut view = ApplyView::new(&ledger);

        let fifty = Amount::Iou {
            value: IouValue::from_int(50),
            issue: usd(issuer),
        };
        account_send(&mut view, &issuer, &a, fifty).unwrap();
        account_send(&mut view, &a, &b, fifty).unwrap();
        account_send(&mut view, &b, &issuer, fifty).unwrap();

        assert!(line_balance(&view, &a, &usd(issuer)).is_zero());
        assert!(line_balance(&view, &b, &usd(issuer)).is_zero());
    }

    #[test]
    fn transfer_rate_default_is_parity() {
        let master = AccountId::from_bytes([0xAA; 20]);
        let ledger = genesis(master);
        let view = ApplyView::new(&ledger);
        assert_eq!(transfer_rate(&view, &master), RATE_ONE);
        let out = IouValue::from_int(100);
        assert_eq!(multiply_rate(out, RATE_ONE), out);
        // A 0.2% fee costs the sender more.
        let with_fee = multiply_rate(out, 1_002_000_000);
        assert!(with_fee > out);
    }

    #[test]
    fn native_transfer_moves_drops() {
        let master = AccountId::from_bytes([0xAA; 20]);
        let other = AccountId::from_bytes([0x05; 20]);
        let ledger = genesis(master);
        let mut view = ApplyView::new(&ledger);
        view.insert(Sle::new_account_root(other, 1_000, 1)).unwrap();
        native_transfer(&mut view, &master, &other, 500).unwrap();
        let sle = view.read(&Keylet::account(&other).key()).unwrap();
        assert_eq!(sle.balance(), Some(Amount::Native(1_500)));
    }
}
