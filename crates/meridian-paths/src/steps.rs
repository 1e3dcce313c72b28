use meridian_core::amount::{Amount, IouValue, Rounding};
use meridian_core::constants::MAX_OFFERS_CONSUMED;
use meridian_core::issue::{Book, Issue};
use meridian_core::types::AccountId;
use meridian_ledger::funds::{account_holds, account_send, multiply_rate, transfer_rate, RATE_ONE};
use meridian_ledger::view::ApplyView;
use meridian_ledger::{LedgerError, ReadView};
use meridian_protocol::field;
use meridian_protocol::path::{PathElement, PathSet};
use tracing::trace;

use crate::book::{book_offers, offer_quality, remove_offer};
use crate::quality::Quality;

/// One hop of a strand. Closed set: value moves either across a trust line
/// or through an order book.
#[derive(Clone, Debug)]
pub enum Step {
    /// Move `issue` from `src` to `dst` across trust lines. The issuer's
    /// transfer rate applies when `src` is not the issuer.
    Direct {
        src: AccountId,
        dst: AccountId,
        issue: Issue,
    },
    /// Cross offers exchanging `book.taker_pays` (paid by `payer`) for
    /// `book.taker_gets` (delivered to `payee`).
    Book {
        book: Book,
        payer: AccountId,
        payee: AccountId,
    },
}

impl Step {
    pub fn out_issue(&self) -> Issue {
        match self {
            Step::Direct { issue, .. } => *issue,
            Step::Book { book, .. } => book.taker_gets,
        }
    }

    pub fn in_issue(&self) -> Issue {
        match self {
            Step::Direct { issue, .. } => *issue,
            Step::Book { book, .. } => book.taker_pays,
        }
    }

    /// Reverse-pass sizing: the input needed to produce `out_wanted`, and
    /// the output actually reachable given liquidity. Pure: no mutation.
    pub fn estimate(&self, view: &dyn ReadView, out_wanted: IouValue) -> (IouValue, IouValue) {
        match self {
            Step::Direct { src, issue, .. } => {
                let rate = if src == &issue.issuer {
                    RATE_ONE
                } else {
                    transfer_rate(view, &issue.issuer)
                };
                let available = account_holds(view, src, issue).as_iou_value();
                // Source liquidity bounds the input, which bounds the output.
                let in_needed = multiply_rate(out_wanted, rate);
                if in_needed <= available {
                    (in_needed, out_wanted)
                } else {
                    let out_possible = if rate == RATE_ONE {
                        available
                    } else {
                        let rate_value =
                            IouValue::new(false, rate as u64, -9).expect("rate in range");
                        available
                            .checked_div(rate_value, Rounding::Down)
                            .unwrap_or(IouValue::ZERO)
                    };
                    (available, out_possible)
                }
            }
            Step::Book { book, .. } => {
                let mut in_needed = IouValue::ZERO;
                let mut out_got = IouValue::ZERO;
                for offer in book_offers(view, book, MAX_OFFERS_CONSUMED) {
                    if out_got >= out_wanted {
                        break;
                    }
                    let Some((_, funded_out, quality)) = usable_offer(view, &offer) else {
                        continue;
                    };
                    let remaining = out_wanted.checked_sub(out_got).unwrap_or(IouValue::ZERO);
                    let take_out = funded_out.min(remaining);
                    if take_out.is_zero() {
                        continue;
                    }
                    let take_in = quality.in_for_out(take_out);
                    in_needed = in_needed.checked_add(take_in).unwrap_or(in_needed);
                    out_got = out_got.checked_add(take_out).unwrap_or(out_got);
                }
                (in_needed, out_got)
            }
        }
    }

    /// Forward-pass execution: push `in_available` through, mutating the
    /// sandbox, and report (input consumed, output produced).
    pub fn execute(
        &self,
        view: &mut ApplyView<'_>,
        in_available: IouValue,
        offers_crossed: &mut usize,
    ) -> Result<(IouValue, IouValue), LedgerError> {
        match self {
            Step::Direct { src, dst, issue } => {
                let rate = if src == &issue.issuer {
                    RATE_ONE
                } else {
                    transfer_rate(view, &issue.issuer)
                };
                let holds = account_holds(view, src, issue).as_iou_value();
                let in_available = in_available.min(holds);
                let out = if rate == RATE_ONE {
                    in_available
                } else {
                    let rate_value = IouValue::new(false, rate as u64, -9).expect("rate in range");
                    in_available
                        .checked_div(rate_value, Rounding::Down)
                        .unwrap_or(IouValue::ZERO)
                };
                if out.is_zero() {
                    return Ok((IouValue::ZERO, IouValue::ZERO));
                }
                account_send(view, src, dst, Amount::iou(out, *issue).canonical())?;
                let fee = in_available.checked_sub(out).unwrap_or(IouValue::ZERO);
                if !fee.is_zero() {
                    // The issuer absorbs the transfer fee.
                    account_send(view, src, &issue.issuer, Amount::iou(fee, *issue).canonical())?;
                }
                Ok((in_available, out))
            }
            Step::Book { book, payer, payee } => {
                let mut in_used = IouValue::ZERO;
                let mut out_done = IouValue::ZERO;
                loop {
                    if *offers_crossed >= MAX_OFFERS_CONSUMED {
                        break;
                    }
                    let in_left = in_available.checked_sub(in_used).unwrap_or(IouValue::ZERO);
                    if in_left.is_zero() {
                        break;
                    }
                    let offers = book_offers(view, book, 1);
                    let Some(offer) = offers.into_iter().next() else {
                        break;
                    };
                    let offer_key = offer.key();
                    let Some((owner, funded_out, quality)) = usable_offer(view, &offer) else {
                        // Unfunded or expired: consume and drop it.
                        remove_offer(view, &offer_key)?;
                        *offers_crossed += 1;
                        continue;
                    };
                    let mut take_out = quality.out_for_in(in_left).min(funded_out);
                    if take_out.is_zero() {
                        break;
                    }
                    let offer_gets = offer
                        .obj()
                        .get_amount(&field::SF_TAKER_GETS)
                        .map(|a| a.as_iou_value())
                        .unwrap_or(IouValue::ZERO);
                    take_out = take_out.min(offer_gets);
                    let take_in = quality.in_for_out(take_out).min(in_left);

                    let in_amount = issue_amount(take_in, book.taker_pays)?;
                    let out_amount = issue_amount(take_out, book.taker_gets)?;
                    account_send(view, payer, &owner, in_amount)?;
                    account_send(view, &owner, payee, out_amount)?;
                    *offers_crossed += 1;

                    // Shrink or retire the offer.
                    let new_gets = offer_gets.checked_sub(take_out).unwrap_or(IouValue::ZERO);
                    let offer_pays = offer
                        .obj()
                        .get_amount(&field::SF_TAKER_PAYS)
                        .map(|a| a.as_iou_value())
                        .unwrap_or(IouValue::ZERO);
                    let new_pays = offer_pays.checked_sub(take_in).unwrap_or(IouValue::ZERO);
                    if new_gets.is_zero() || new_pays.is_zero() {
                        remove_offer(view, &offer_key)?;
                    } else {
                        let mut updated = offer.clone();
                        updated
                            .obj_mut()
                            .set_amount(&field::SF_TAKER_GETS, issue_amount(new_gets, book.taker_gets)?);
                        updated
                            .obj_mut()
                            .set_amount(&field::SF_TAKER_PAYS, issue_amount(new_pays, book.taker_pays)?);
                        view.update(updated)?;
                    }

                    in_used = in_used.checked_add(take_in).unwrap_or(in_used);
                    out_done = out_done.checked_add(take_out).unwrap_or(out_done);
                    trace!(?take_in, ?take_out, "crossed offer");
                }
                Ok((in_used, out_done))
            }
        }
    }
}

/// An executable path: steps whose issues line up end to end.
#[derive(Clone, Debug)]
pub struct Strand {
    pub steps: Vec<Step>,
}

impl Strand {
    /// Composite reverse-pass estimate for delivering `out_wanted` at the
    /// strand's tail: (input at head, deliverable output, composite quality).
    pub fn estimate(
        &self,
        view: &dyn ReadView,
        out_wanted: IouValue,
    ) -> (IouValue, IouValue, Option<Quality>) {
        let mut want = out_wanted;
        let mut inputs = Vec::with_capacity(self.steps.len());
        for step in self.steps.iter().rev() {
            let (in_needed, out_possible) = step.estimate(view, want);
            inputs.push((in_needed, out_possible));
            want = in_needed;
            if want.is_zero() {
                break;
            }
        }
        let in_at_head = inputs.last().map(|(i, _)| *i).unwrap_or(IouValue::ZERO);

        // Forward-simulate the capped output.
        let mut flow = in_at_head;
        let mut out = IouValue::ZERO;
        for step in &self.steps {
            let (_, step_out) = step.estimate_forward(view, flow);
            out = step_out;
            flow = step_out;
            if flow.is_zero() {
                break;
            }
        }
        let out_capped = out.min(out_wanted);
        let quality = if in_at_head.is_zero() || out_capped.is_zero() {
            None
        } else {
            IouValue::checked_div(in_at_head, out_capped, Rounding::Up)
                .ok()
                .and_then(Quality::from_rate)
        };
        (in_at_head, out_capped, quality)
    }

    /// Execute forward with `in_limit` at the head. Returns (in, out).
    pub fn execute(
        &self,
        view: &mut ApplyView<'_>,
        in_limit: IouValue,
        offers_crossed: &mut usize,
    ) -> Result<(IouValue, IouValue), LedgerError> {
        let mut carry = in_limit;
        let mut head_in = IouValue::ZERO;
        for (i, step) in self.steps.iter().enumerate() {
            let (used, produced) = step.execute(view, carry, offers_crossed)?;
            if i == 0 {
                head_in = used;
            }
            carry = produced;
            if carry.is_zero() {
                break;
            }
        }
        Ok((head_in, carry))
    }

    pub fn out_issue(&self) -> Option<Issue> {
        self.steps.last().map(|s| s.out_issue())
    }

    pub fn in_issue(&self) -> Option<Issue> {
        self.steps.first().map(|s| s.in_issue())
    }
}

impl Step {
    /// Forward estimate: output produced by `in_available`. Pure.
    fn estimate_forward(&self, view: &dyn ReadView, in_available: IouValue) -> (IouValue, IouValue) {
        match self {
            Step::Direct { src, issue, .. } => {
                let rate = if src == &issue.issuer {
                    RATE_ONE
                } else {
                    transfer_rate(view, &issue.issuer)
                };
                let holds = account_holds(view, src, issue).as_iou_value();
                let usable = in_available.min(holds);
                let out = if rate == RATE_ONE {
                    usable
                } else {
                    let rate_value = IouValue::new(false, rate as u64, -9).expect("rate in range");
                    usable
                        .checked_div(rate_value, Rounding::Down)
                        .unwrap_or(IouValue::ZERO)
                };
                (usable, out)
            }
            Step::Book { book, .. } => {
                let mut in_left = in_available;
                let mut out = IouValue::ZERO;
                for offer in book_offers(view, book, MAX_OFFERS_CONSUMED) {
                    if in_left.is_zero() {
                        break;
                    }
                    let Some((_, funded_out, quality)) = usable_offer(view, &offer) else {
                        continue;
                    };
                    let take_out = quality.out_for_in(in_left).min(funded_out);
                    if take_out.is_zero() {
                        continue;
                    }
                    let take_in = quality.in_for_out(take_out).min(in_left);
                    in_left = in_left.checked_sub(take_in).unwrap_or(IouValue::ZERO);
                    out = out.checked_add(take_out).unwrap_or(out);
                }
                (in_available.checked_sub(in_left).unwrap_or(IouValue::ZERO), out)
            }
        }
    }
}

/// Owner, funded output and quality of an offer; `None` when the offer is
/// unfunded, expired or malformed and should be consumed.
fn usable_offer(
    view: &dyn ReadView,
    offer: &meridian_protocol::Sle,
) -> Option<(AccountId, IouValue, Quality)> {
    let owner = offer.account()?;
    if let Some(exp) = offer.obj().get_u32(&field::SF_EXPIRATION) {
        if exp <= view.parent_close_time() {
            return None;
        }
    }
    let gets = offer.obj().get_amount(&field::SF_TAKER_GETS)?;
    let quality = offer_quality(offer)?;
    let holds = account_holds(view, &owner, &gets.issue()).as_iou_value();
    let funded = gets.as_iou_value().min(holds);
    if funded.is_zero() || funded.is_negative() {
        return None;
    }
    Some((owner, funded, quality))
}

fn issue_amount(value: IouValue, issue: Issue) -> Result<Amount, LedgerError> {
    Ok(Amount::iou(value, issue).canonical())
}

// ── Strand construction ──────────────────────────────────────────────────────

/// Expand a proposed path set (plus the default path) into executable
/// strands. Strands that do not line up with the source and destination
/// issues are dropped.
pub fn build_strands(
    src: &AccountId,
    dst: &AccountId,
    src_issue: Issue,
    dst_issue: Issue,
    paths: &PathSet,
    default_path: bool,
) -> Vec<Strand> {
    let mut strands = Vec::new();
    if default_path {
        if src_issue == dst_issue && !src_issue.is_native() {
            strands.push(Strand {
                steps: vec![Step::Direct {
                    src: *src,
                    dst: *dst,
                    issue: src_issue,
                }],
            });
        } else if src_issue != dst_issue {
            strands.push(Strand {
                steps: vec![Step::Book {
                    book: Book::new(src_issue, dst_issue),
                    payer: *src,
                    payee: *dst,
                }],
            });
        }
    }
    for path in &paths.0 {
        if let Some(strand) = build_one(src, dst, src_issue, dst_issue, path) {
            strands.push(strand);
        }
    }
    strands
}

fn build_one(
    src: &AccountId,
    dst: &AccountId,
    src_issue: Issue,
    dst_issue: Issue,
    path: &[PathElement],
) -> Option<Strand> {
    let mut steps: Vec<Step> = Vec::new();
    let mut cur_account = *src;
    let mut cur_issue = src_issue;
    // True while the last step is a book whose payee is not yet pinned.
    let mut open_book = false;

    for element in path {
        if let Some(account) = element.account {
            if cur_issue.is_native() {
                return None;
            }
            if open_book {
                // The account right after a book receives the book's output.
                if let Some(Step::Book { payee, .. }) = steps.last_mut() {
                    *payee = account;
                }
                open_book = false;
            } else {
                if account == cur_account {
                    return None; // degenerate hop
                }
                steps.push(Step::Direct {
                    src: cur_account,
                    dst: account,
                    issue: cur_issue,
                });
            }
            cur_account = account;
        } else if let Some(currency) = element.currency {
            let next_issue = if currency.is_native() {
                Issue::NATIVE
            } else {
                Issue::new(currency, element.issuer?)
            };
            if next_issue == cur_issue {
                return None;
            }
            if open_book {
                // Chained books settle through the strand source.
                if let Some(Step::Book { payee, .. }) = steps.last_mut() {
                    *payee = *src;
                }
                cur_account = *src;
            }
            steps.push(Step::Book {
                book: Book::new(cur_issue, next_issue),
                payer: cur_account,
                payee: *dst,
            });
            open_book = true;
            cur_issue = next_issue;
        } else {
            return None;
        }
    }

    if cur_issue != dst_issue {
        return None;
    }
    // Deliver the tail to the destination when the last hop stops short.
    if !open_book && cur_account != *dst {
        steps.push(Step::Direct {
            src: cur_account,
            dst: *dst,
            issue: cur_issue,
        });
    }
    if steps.is_empty() {
        return None;
    }
    // A path revisiting the same book or the same account hop is a loop.
    let mut seen_books = std::collections::HashSet::new();
    let mut seen_hops = std::collections::HashSet::new();
    for step in &steps {
        let fresh = match step {
            Step::Book { book, .. } => seen_books.insert(*book),
            Step::Direct { dst, issue, .. } => seen_hops.insert((*dst, *issue)),
        };
        if !fresh {
            return None;
        }
    }
    Some(Strand { steps })
}

/// Amount canonicalization shim: native amounts computed through IOU
/// arithmetic are converted back to whole drops.
trait Canonical {
    fn canonical(self) -> Amount;
}

impl Canonical for Amount {
    fn canonical(self) -> Amount {
        match self {
            Amount::Iou { value, issue } if issue.is_native() => {
                let drops =
                    meridian_core::amount::iou_to_drops(value, Rounding::Down).unwrap_or(0);
                Amount::Native(drops)
            }
            other => other,
        }
    }
}
