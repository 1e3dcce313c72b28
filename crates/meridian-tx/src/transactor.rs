use meridian_core::amount::Amount;
use meridian_core::types::AccountId;
use meridian_core::Ter;
use meridian_crypto::account_id_from_public;
use meridian_ledger::view::ApplyView;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::flags::LSF_DISABLE_MASTER;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::tx::{Transaction, TxType};
use tracing::{debug, warn};

use crate::invariants;
use crate::{account, channels, checks, escrow, offers, payment, pseudo, trust};

/// The result of pushing one transaction through the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub result: Ter,
    /// True when the transaction (or at least its fee) changed the view.
    pub applied: bool,
    /// Amount actually delivered by a payment, for metadata.
    pub delivered: Option<Amount>,
}

impl ApplyOutcome {
    fn rejected(result: Ter) -> Self {
        Self {
            result,
            applied: false,
            delivered: None,
        }
    }
}

/// Apply `tx` to `view` through the three-phase pipeline. Only `tes` and
/// `tec` outcomes leave any trace in the view.
pub fn apply_transaction(view: &mut ApplyView<'_>, tx: &Transaction) -> ApplyOutcome {
    // ── Phase 1: stateless checks ───────────────────────────────────────────
    let pf = preflight(tx);
    if !pf.is_success() {
        debug!(result = %pf, "preflight rejected");
        return ApplyOutcome::rejected(pf);
    }

    if tx.tx_type().is_pseudo() {
        return apply_pseudo(view, tx);
    }

    // ── Phase 2: read-only checks against the view ──────────────────────────
    let pc = preclaim(view, tx);
    if !pc.is_success() && pc.class() != meridian_core::TerClass::Claimed {
        debug!(result = %pc, "preclaim rejected");
        return ApplyOutcome::rejected(pc);
    }

    // ── Phase 3: mutate. Fee and sequence stick even when effects void. ─────
    let fee = tx.fee().native_drops().unwrap_or(0) as u64;
    let mut outer = ApplyView::new(view);
    if let Err(ter) = charge_fee_and_sequence(&mut outer, tx, fee) {
        return ApplyOutcome::rejected(ter);
    }

    let mut delivered = None;
    let result = if pc.class() == meridian_core::TerClass::Claimed {
        // Preclaim already decided the effects are void; fee still applies.
        pc
    } else {
        let (ter, inner_delta, got) = {
            let mut inner = ApplyView::new(&outer);
            let (ter, got) = dispatch_inner(&mut inner, tx);
            (ter, inner.into_delta(), got)
        };
        if ter.is_success() {
            if invariants::check(&outer, &inner_delta, fee) {
                outer.absorb(inner_delta);
                delivered = got;
                ter
            } else {
                warn!(tx = %tx.tx_id(), "invariant violation; effects voided");
                Ter::TecInvariantFailed
            }
        } else {
            // tec keeps the fee; anything else rejects entirely.
            ter
        }
    };

    if result.is_applied() {
        let outer_delta = outer.into_delta();
        view.absorb(outer_delta);
        ApplyOutcome {
            result,
            applied: true,
            delivered,
        }
    } else {
        ApplyOutcome::rejected(result)
    }
}

/// Pseudo-transactions bypass fees, sequences and signatures.
fn apply_pseudo(view: &mut ApplyView<'_>, tx: &Transaction) -> ApplyOutcome {
    let (result, _) = dispatch_inner(view, tx);
    ApplyOutcome {
        result,
        applied: result.is_applied(),
        delivered: None,
    }
}

fn dispatch_inner(view: &mut ApplyView<'_>, tx: &Transaction) -> (Ter, Option<Amount>) {
    match tx.tx_type() {
        TxType::Payment => payment::apply(view, tx),
        TxType::OfferCreate => (offers::apply_create(view, tx), None),
        TxType::OfferCancel => (offers::apply_cancel(view, tx), None),
        TxType::TrustSet => (trust::apply(view, tx), None),
        TxType::AccountSet => (account::apply_account_set(view, tx), None),
        TxType::SetRegularKey => (account::apply_set_regular_key(view, tx), None),
        TxType::SignerListSet => (account::apply_signer_list_set(view, tx), None),
        TxType::DepositPreauth => (account::apply_deposit_preauth(view, tx), None),
        TxType::TicketCreate => (account::apply_ticket_create(view, tx), None),
        TxType::EscrowCreate => (escrow::apply_create(view, tx), None),
        TxType::EscrowFinish => (escrow::apply_finish(view, tx), None),
        TxType::EscrowCancel => (escrow::apply_cancel(view, tx), None),
        TxType::PayChanCreate => (channels::apply_create(view, tx), None),
        TxType::PayChanFund => (channels::apply_fund(view, tx), None),
        TxType::PayChanClaim => (channels::apply_claim(view, tx), None),
        TxType::CheckCreate => (checks::apply_create(view, tx), None),
        TxType::CheckCash => (checks::apply_cash(view, tx), None),
        TxType::CheckCancel => (checks::apply_cancel(view, tx), None),
        TxType::Amendment => (pseudo::apply_amendment(view, tx), None),
        TxType::SetFee => (pseudo::apply_set_fee(view, tx), None),
    }
}

// ── Preflight ────────────────────────────────────────────────────────────────

fn preflight(tx: &Transaction) -> Ter {
    if tx.tx_type().is_pseudo() {
        // Injected by consensus: unsigned, fee-less, zero account.
        if !tx.account().is_zero() || tx.signature().is_some() {
            return Ter::TemMalformed;
        }
        return Ter::TesSuccess;
    }
    if tx.account().is_zero() {
        return Ter::TemMalformed;
    }
    match tx.fee().native_drops() {
        Ok(f) if f >= 0 => {}
        _ => return Ter::TemBadFee,
    }
    // Either a sequence or a ticket, never both meaningfully.
    if tx.ticket_sequence().is_some() && tx.sequence() != 0 {
        return Ter::TemBadSequence;
    }
    if tx.ticket_sequence().is_none() && tx.sequence() == 0 {
        return Ter::TemBadSequence;
    }
    if !tx.check_signature() {
        return Ter::TefBadSignature;
    }
    // Per-type field and flag validation.
    let per_type = match tx.tx_type() {
        TxType::Payment => payment::preflight(tx),
        TxType::OfferCreate => offers::preflight_create(tx),
        TxType::OfferCancel => offers::preflight_cancel(tx),
        TxType::TrustSet => trust::preflight(tx),
        TxType::AccountSet => account::preflight_account_set(tx),
        TxType::SetRegularKey => Ter::TesSuccess,
        TxType::SignerListSet => account::preflight_signer_list_set(tx),
        TxType::DepositPreauth => account::preflight_deposit_preauth(tx),
        TxType::TicketCreate => account::preflight_ticket_create(tx),
        TxType::EscrowCreate => escrow::preflight_create(tx),
        TxType::EscrowFinish | TxType::EscrowCancel => escrow::preflight_finish_or_cancel(tx),
        TxType::PayChanCreate => channels::preflight_create(tx),
        TxType::PayChanFund => channels::preflight_fund(tx),
        TxType::PayChanClaim => channels::preflight_claim(tx),
        TxType::CheckCreate => checks::preflight_create(tx),
        TxType::CheckCash => checks::preflight_cash(tx),
        TxType::CheckCancel => Ter::TesSuccess,
        TxType::Amendment | TxType::SetFee => Ter::TesSuccess,
    };
    if !per_type.is_success() {
        return per_type;
    }
    Ter::TesSuccess
}

// ── Preclaim ─────────────────────────────────────────────────────────────────

fn preclaim(view: &dyn ReadView, tx: &Transaction) -> Ter {
    let account = tx.account();
    let Some(root) = view.read(&Keylet::account(&account).key()) else {
        return Ter::TerNoAccount;
    };

    // Sequence or ticket.
    let account_seq = root.sequence().unwrap_or(0);
    match tx.ticket_sequence() {
        Some(ticket_seq) => {
            let ticket = Keylet::ticket(&account, ticket_seq);
            if !view.exists(&ticket.key()) {
                return if ticket_seq >= account_seq {
                    Ter::TerPreSeq
                } else {
                    Ter::TefPastSeq
                };
            }
        }
        None => {
            let seq = tx.sequence();
            if seq < account_seq {
                return Ter::TefPastSeq;
            }
            if seq > account_seq {
                return Ter::TerPreSeq;
            }
        }
    }

    // Fee funding: the fee may dip into the reserve but not below zero.
    let fee = tx.fee().native_drops().unwrap_or(0);
    let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
    if fee > balance {
        return Ter::TerInsufFeeB;
    }
    if (fee as u64) < view.fees().base_fee {
        return Ter::TelInsufFeeP;
    }

    // Authorization: master key, regular key, or signer list quorum.
    check_authorization(view, tx, &root)
}

fn check_authorization(view: &dyn ReadView, tx: &Transaction, root: &Sle) -> Ter {
    let account = tx.account();
    if tx.is_multi_signed() {
        return check_multisign(view, tx, &account);
    }
    let Some(public) = tx.signing_pub_key() else {
        return Ter::TefBadAuth;
    };
    let signer = account_id_from_public(&public);
    if signer == account {
        if root.is_flag(LSF_DISABLE_MASTER) {
            return Ter::TefBadAuthMaster;
        }
        return Ter::TesSuccess;
    }
    if let Some(regular) = root.obj().get_account(&field::SF_REGULAR_KEY) {
        if signer == regular {
            return Ter::TesSuccess;
        }
    }
    Ter::TefBadAuth
}

fn check_multisign(view: &dyn ReadView, tx: &Transaction, account: &AccountId) -> Ter {
    let Some(list) = view.read(&Keylet::signer_list(account).key()) else {
        return Ter::TefNotMultiSigning;
    };
    let Some(quorum) = list.obj().get_u32(&field::SF_SIGNER_QUORUM) else {
        return Ter::TefBadQuorum;
    };
    let Some(entries) = list.obj().get_array(&field::SF_SIGNER_ENTRIES) else {
        return Ter::TefBadQuorum;
    };
    let mut weight_total: u32 = 0;
    for (signer_account, _, _) in tx.multi_signers() {
        let weight = entries.iter().find_map(|(_, entry)| {
            (entry.get_account(&field::SF_ACCOUNT) == Some(signer_account))
                .then(|| entry.get_u16(&field::SF_SIGNER_WEIGHT).unwrap_or(0))
        });
        match weight {
            Some(w) => weight_total += w as u32,
            // A signature from outside the list voids the set.
            None => return Ter::TefBadSignature,
        }
    }
    if weight_total < quorum {
        return Ter::TefBadQuorum;
    }
    Ter::TesSuccess
}

// ── Fee & sequence ───────────────────────────────────────────────────────────

fn charge_fee_and_sequence(
    view: &mut ApplyView<'_>,
    tx: &Transaction,
    fee: u64,
) -> Result<(), Ter> {
    let account = tx.account();
    let key = Keylet::account(&account).key();
    let mut root = view.read(&key).ok_or(Ter::TerNoAccount)?;
    let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
    if (fee as i64) > balance {
        return Err(Ter::TerInsufFeeB);
    }
    root.set_balance(Amount::Native(balance - fee as i64));

    match tx.ticket_sequence() {
        Some(ticket_seq) => {
            let ticket_key = Keylet::ticket(&account, ticket_seq).key();
            let ticket = view.read(&ticket_key).ok_or(Ter::TefPastSeq)?;
            let page = ticket.obj().get_u64(&field::SF_OWNER_NODE).unwrap_or(0);
            meridian_ledger::dirs::dir_remove(view, &Keylet::owner_dir(&account), page, &ticket_key)
                .map_err(|_| Ter::TefInternal)?;
            view.erase(&ticket_key).map_err(|_| Ter::TefPastSeq)?;
            let count = root.owner_count();
            root.set_owner_count(count.saturating_sub(1));
        }
        None => {
            root.set_sequence(tx.sequence() + 1);
        }
    }
    view.update(root).map_err(|_| Ter::TefInternal)?;
    view.destroy_drops(fee);
    Ok(())
}

// ── Shared helpers for transactors ───────────────────────────────────────────

/// Read the account root or fail.
pub(crate) fn account_root(view: &dyn ReadView, account: &AccountId) -> Result<Sle, Ter> {
    view.read(&Keylet::account(account).key())
        .ok_or(Ter::TerNoAccount)
}

/// Whether adding `new_objects` owned objects keeps the account above its
/// reserve.
pub(crate) fn reserve_ok(
    view: &dyn ReadView,
    root: &Sle,
    new_objects: u32,
) -> bool {
    let balance = root.balance().and_then(|b| b.native_drops().ok()).unwrap_or(0);
    let reserve = view.fees().account_reserve(root.owner_count() + new_objects);
    balance >= reserve as i64
}

/// Bump or drop the owner count on an account root.
pub(crate) fn adjust_owner_count(
    view: &mut ApplyView<'_>,
    account: &AccountId,
    delta: i32,
) -> Result<(), Ter> {
    let key = Keylet::account(account).key();
    let mut root = view.read(&key).ok_or(Ter::TefInternal)?;
    let count = root.owner_count() as i64 + delta as i64;
    root.set_owner_count(count.max(0) as u32);
    view.update(root).map_err(|_| Ter::TefInternal)?;
    Ok(())
}

/// The ledger-time "now" used by time-gated transactors.
pub(crate) fn view_now(view: &dyn ReadView) -> u32 {
    view.parent_close_time()
}

/// Entry creation boilerplate: insert the SLE and list it in the owner
/// directory, storing the page back on the entry.
pub(crate) fn insert_owned(
    view: &mut ApplyView<'_>,
    owner: &AccountId,
    mut sle: Sle,
) -> Result<(), Ter> {
    let page = meridian_ledger::dirs::dir_insert(
        view,
        &Keylet::owner_dir(owner),
        sle.key(),
    )
    .map_err(|_| Ter::TecDirFull)?;
    sle.obj_mut().set_u64(&field::SF_OWNER_NODE, page);
    view.insert(sle).map_err(|_| Ter::TefInternal)?;
    adjust_owner_count(view, owner, 1)
}

/// Inverse of `insert_owned`.
pub(crate) fn remove_owned(
    view: &mut ApplyView<'_>,
    owner: &AccountId,
    sle: &Sle,
) -> Result<(), Ter> {
    let page = sle.obj().get_u64(&field::SF_OWNER_NODE).unwrap_or(0);
    meridian_ledger::dirs::dir_remove(view, &Keylet::owner_dir(owner), page, &sle.key())
        .map_err(|_| Ter::TefInternal)?;
    view.erase(&sle.key()).map_err(|_| Ter::TefInternal)?;
    adjust_owner_count(view, owner, -1)
}

/// Every entry type a transactor may look up by keylet.
pub(crate) fn read_typed(
    view: &dyn ReadView,
    keylet: &Keylet,
    expect: LedgerEntryType,
) -> Option<Sle> {
    view.read(&keylet.key()).filter(|sle| sle.entry_type() == expect)
}
