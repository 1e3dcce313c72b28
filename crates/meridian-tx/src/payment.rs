use meridian_core::amount::Amount;
use meridian_core::types::AccountId;
use meridian_core::Ter;
use meridian_ledger::funds::account_holds;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_paths::flow::{flow, FlowOptions};
use meridian_paths::quality::Quality;
use meridian_protocol::field;
use meridian_protocol::flags::{
    LSF_DEPOSIT_AUTH, LSF_REQUIRE_DEST_TAG, TF_LIMIT_QUALITY, TF_NO_DIRECT_TRANSIT,
    TF_PARTIAL_PAYMENT, TF_PAYMENT_MASK,
};
use meridian_protocol::keylet::Keylet;
use meridian_protocol::path::PathSet;
use meridian_protocol::sle::Sle;
use meridian_protocol::tx::Transaction;
use meridian_core::issue::Issue;
use tracing::debug;

pub fn preflight(tx: &Transaction) -> Ter {
    if tx.flags() & !TF_PAYMENT_MASK != 0 {
        return Ter::TemInvalidFlag;
    }
    let Some(amount) = tx.obj().get_amount(&field::SF_AMOUNT) else {
        return Ter::TemBadAmount;
    };
    if !amount.is_positive() {
        return Ter::TemBadAmount;
    }
    let Some(destination) = tx.obj().get_account(&field::SF_DESTINATION) else {
        return Ter::TemDstNeeded;
    };
    let account = tx.account();
    let send_max = tx.obj().get_amount(&field::SF_SEND_MAX);
    if let Some(send_max) = send_max {
        if !send_max.is_positive() {
            return Ter::TemBadSendMax;
        }
        if send_max.is_native() && amount.is_native() {
            // Native-to-native needs no sendMax.
            return Ter::TemBadSendMax;
        }
    }
    let paths = tx.obj().get_path_set(&field::SF_PATHS);
    let has_paths = paths.map(|p| !p.is_empty()).unwrap_or(false);
    if destination == account && !has_paths && send_max.is_none() {
        // A same-issue self payment moves nothing.
        return Ter::TemRedundant;
    }
    if amount.is_native() && send_max.is_none() && has_paths {
        return Ter::TemBadPath;
    }
    Ter::TesSuccess
}

/// Apply a payment; returns the outcome and the delivered amount.
pub fn apply(view: &mut ApplyView<'_>, tx: &Transaction) -> (Ter, Option<Amount>) {
    let account = tx.account();
    let amount = tx
        .obj()
        .get_amount(&field::SF_AMOUNT)
        .expect("preflight checked");
    let destination = tx
        .obj()
        .get_account(&field::SF_DESTINATION)
        .expect("preflight checked");
    let send_max = tx.obj().get_amount(&field::SF_SEND_MAX);
    let flags = tx.flags();

    // Destination gating.
    let dst_root = view.read(&Keylet::account(&destination).key());
    match &dst_root {
        Some(root) => {
            if root.is_flag(LSF_REQUIRE_DEST_TAG)
                && tx.obj().get_u32(&field::SF_DESTINATION_TAG).is_none()
            {
                return (Ter::TecDstTagNeeded, None);
            }
            if root.is_flag(LSF_DEPOSIT_AUTH) && account != destination {
                let preauth = Keylet::deposit_preauth(&destination, &account);
                if !view.exists(&preauth.key()) {
                    return (Ter::TecNoPermission, None);
                }
            }
        }
        None => {
            // Only a sufficiently large native payment creates an account.
            let Ok(drops) = amount.native_drops() else {
                return (Ter::TecNoDst, None);
            };
            if (drops as u64) < view.fees().reserve_base {
                return (Ter::TecNoDstInsufNative, None);
            }
        }
    }

    // Pure native transfer: no pathfinding involved.
    if amount.is_native() && send_max.is_none() {
        return (
            native_payment(view, &account, &destination, amount, dst_root),
            Some(amount),
        );
    }

    let empty = PathSet::default();
    let paths = tx.obj().get_path_set(&field::SF_PATHS).unwrap_or(&empty);
    let limit_quality = (flags & TF_LIMIT_QUALITY != 0)
        .then(|| {
            send_max
                .as_ref()
                .and_then(|sm| Quality::from_amounts(sm, &amount))
        })
        .flatten();
    let options = FlowOptions {
        partial_payment: flags & TF_PARTIAL_PAYMENT != 0,
        send_max,
        deliver_min: tx.obj().get_amount(&field::SF_DELIVER_MIN),
        limit_quality,
        default_path: flags & TF_NO_DIRECT_TRANSIT == 0,
        offer_crossing: false,
    };

    let result = flow(view, amount, &account, &destination, paths, &options);
    debug!(result = %result.result, out = %result.actual_out, "payment flow");
    let delivered = (!result.actual_out.is_zero()).then_some(result.actual_out);
    (result.result, delivered)
}

fn native_payment(
    view: &mut ApplyView<'_>,
    src: &AccountId,
    dst: &AccountId,
    amount: Amount,
    dst_root: Option<Sle>,
) -> Ter {
    let drops = amount.native_drops().expect("checked native");
    let spendable = account_holds(view, src, &Issue::NATIVE)
        .native_drops()
        .unwrap_or(0);
    if drops > spendable {
        return Ter::TecUnfundedPayment;
    }

    let src_key = Keylet::account(src).key();
    let Some(mut src_root) = view.read(&src_key) else {
        return Ter::TefInternal;
    };
    let src_balance = src_root
        .balance()
        .and_then(|b| b.native_drops().ok())
        .unwrap_or(0);
    src_root.set_balance(Amount::Native(src_balance - drops));
    if view.update(src_root).is_err() {
        return Ter::TefInternal;
    }

    match dst_root {
        Some(mut root) => {
            let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
            root.set_balance(Amount::Native(balance + drops));
            if view.update(root).is_err() {
                return Ter::TefInternal;
            }
        }
        None => {
            // Funding payment creates the destination account.
            let root = Sle::new_account_root(*dst, drops, 1);
            if view.insert(root).is_err() {
                return Ter::TefInternal;
            }
        }
    }
    Ter::TesSuccess
}
