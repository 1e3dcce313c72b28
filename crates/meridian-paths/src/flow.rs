use meridian_core::amount::{Amount, IouValue, Rounding};
use meridian_core::issue::Issue;
use meridian_core::types::AccountId;
use meridian_core::Ter;
use meridian_ledger::view::ApplyView;
use meridian_protocol::path::PathSet;
use tracing::debug;

use crate::quality::Quality;
use crate::steps::{build_strands, Strand};

/// Caller-selected behavior for one flow execution.
#[derive(Clone, Debug, Default)]
pub struct FlowOptions {
    /// Deliver as much as possible instead of all-or-nothing.
    pub partial_payment: bool,
    /// Cap on the input spent, in the source issue.
    pub send_max: Option<Amount>,
    /// Lower bound on delivery under partial payment.
    pub deliver_min: Option<Amount>,
    /// Reject strands whose composite quality is worse than this.
    pub limit_quality: Option<Quality>,
    /// Include the default direct/book path.
    pub default_path: bool,
    /// Executing an OfferCreate crossing rather than a payment.
    pub offer_crossing: bool,
}

/// Outcome of a flow execution.
#[derive(Debug)]
pub struct FlowResult {
    pub result: Ter,
    /// Input consumed, in the source issue.
    pub actual_in: Amount,
    /// Output delivered, in the destination issue.
    pub actual_out: Amount,
    /// Offers consumed across all strands.
    pub offers_crossed: usize,
}

/// Multi-strand liquidity execution: repeatedly sizes every remaining
/// strand with a reverse pass, executes the best one forward, and stops
/// when the target is delivered or liquidity is dry.
pub fn flow(
    view: &mut ApplyView<'_>,
    deliver: Amount,
    src: &AccountId,
    dst: &AccountId,
    paths: &PathSet,
    options: &FlowOptions,
) -> FlowResult {
    let dst_issue = deliver.issue();
    let src_issue = options
        .send_max
        .as_ref()
        .map(|a| a.issue())
        .unwrap_or(dst_issue);

    let mut strands = build_strands(src, dst, src_issue, dst_issue, paths, options.default_path);
    debug!(strands = strands.len(), "flow start");
    if strands.is_empty() {
        return FlowResult {
            result: Ter::TemBadPath,
            actual_in: Amount::zero(src_issue),
            actual_out: Amount::zero(dst_issue),
            offers_crossed: 0,
        };
    }

    let target_out = deliver.as_iou_value();
    let mut remaining_out = target_out;
    let mut remaining_in = options.send_max.as_ref().map(|a| a.as_iou_value());
    let mut total_in = IouValue::ZERO;
    let mut total_out = IouValue::ZERO;
    let mut offers_crossed = 0usize;

    while !remaining_out.is_zero() && !strands.is_empty() {
        // Reverse-size every strand and keep the best by composite quality.
        let mut best: Option<(usize, IouValue, IouValue, Quality)> = None;
        for (i, strand) in strands.iter().enumerate() {
            let (in_needed, out_possible, quality) = strand.estimate(view, remaining_out);
            let Some(quality) = quality else { continue };
            if out_possible.is_zero() || in_needed.is_zero() {
                continue;
            }
            if let Some(limit) = &options.limit_quality {
                if quality > *limit {
                    continue;
                }
            }
            let better = match &best {
                None => true,
                Some((_, _, _, best_q)) => quality < *best_q,
            };
            if better {
                best = Some((i, in_needed, out_possible, quality));
            }
        }
        let Some((index, mut in_planned, _, _)) = best else {
            break;
        };
        if let Some(in_cap) = remaining_in {
            in_planned = in_planned.min(in_cap);
            if in_planned.is_zero() {
                break;
            }
        }

        let (in_used, out_done) = match strands[index].execute(view, in_planned, &mut offers_crossed)
        {
            Ok(v) => v,
            Err(_) => {
                strands.remove(index);
                continue;
            }
        };
        if out_done.is_zero() {
            // Dry strand: drop it and try the rest.
            strands.remove(index);
            continue;
        }
        total_in = total_in.checked_add(in_used).unwrap_or(total_in);
        total_out = total_out.checked_add(out_done).unwrap_or(total_out);
        remaining_out = target_out.checked_sub(total_out).unwrap_or(IouValue::ZERO);
        if let Some(cap) = remaining_in {
            remaining_in = Some(cap.checked_sub(in_used).unwrap_or(IouValue::ZERO));
            if remaining_in.as_ref().map(|c| c.is_zero()).unwrap_or(false) && !remaining_out.is_zero()
            {
                break;
            }
        }
    }

    let actual_in = rebuild(total_in, src_issue);
    let actual_out = rebuild(total_out, dst_issue);

    let result = if remaining_out.is_zero() {
        Ter::TesSuccess
    } else if total_out.is_zero() {
        Ter::TecPathDry
    } else if options.partial_payment || options.offer_crossing {
        if let Some(min) = &options.deliver_min {
            if total_out < min.as_iou_value() {
                Ter::TecPathPartial
            } else {
                Ter::TesSuccess
            }
        } else {
            Ter::TesSuccess
        }
    } else {
        Ter::TecPathPartial
    };

    debug!(?result, ?actual_in, ?actual_out, offers_crossed, "flow done");
    FlowResult {
        result,
        actual_in,
        actual_out,
        offers_crossed,
    }
}

fn rebuild(value: IouValue, issue: Issue) -> Amount {
    if issue.is_native() {
        Amount::Native(meridian_core::amount::iou_to_drops(value, Rounding::Down).unwrap_or(0))
    } else {
        Amount::iou(value, issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::insert_offer;
    use meridian_core::issue::Currency;
    use meridian_ledger::funds::{account_send, line_balance};
    use meridian_ledger::{GenesisConfig, Ledger, ReadView};
    use meridian_protocol::keylet::Keylet;
    use meridian_protocol::sle::Sle;

    const MASTER: [u8; 20] = [0xAA; 20];

    fn genesis() -> Ledger {
        GenesisConfig::new(AccountId::from_bytes(MASTER)).build()
    }

    fn acct(tag: u8) -> AccountId {
        AccountId::from_bytes([tag; 20])
    }

    fn usd(issuer: AccountId) -> Issue {
        Issue::new(Currency::from_code("USD").unwrap(), issuer)
    }

    fn eur(issuer: AccountId) -> Issue {
        Issue::new(Currency::from_code("EUR").unwrap(), issuer)
    }

    fn fund(view: &mut ApplyView<'_>, tag: u8, drops: i64) -> AccountId {
        let id = acct(tag);
        view.insert(Sle::new_account_root(id, drops, 1)).unwrap();
        id
    }

    fn iou(value: i64, issue: Issue) -> Amount {
        Amount::iou(IouValue::from_int(value), issue)
    }

    #[test]
    fn direct_iou_payment_flows() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let issuer = fund(&mut view, 1, 100_000_000);
        let alice = fund(&mut view, 2, 100_000_000);
        let bob = fund(&mut view, 3, 100_000_000);
        account_send(&mut view, &issuer, &alice, iou(200, usd(issuer))).unwrap();

        let result = flow(
            &mut view,
            iou(50, usd(issuer)),
            &alice,
            &bob,
            &PathSet::default(),
            &FlowOptions {
                default_path: true,
                ..Default::default()
            },
        );
        assert_eq!(result.result, Ter::TesSuccess);
        assert_eq!(result.actual_out, iou(50, usd(issuer)));
        assert_eq!(line_balance(&view, &bob, &usd(issuer)), IouValue::from_int(50));
        assert_eq!(
            line_balance(&view, &alice, &usd(issuer)),
            IouValue::from_int(150)
        );
    }

    #[test]
    fn insufficient_liquidity_fails_hard_without_partial() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let issuer = fund(&mut view, 1, 100_000_000);
        let alice = fund(&mut view, 2, 100_000_000);
        let bob = fund(&mut view, 3, 100_000_000);
        account_send(&mut view, &issuer, &alice, iou(10, usd(issuer))).unwrap();

        let result = flow(
            &mut view,
            iou(50, usd(issuer)),
            &alice,
            &bob,
            &PathSet::default(),
            &FlowOptions {
                default_path: true,
                ..Default::default()
            },
        );
        assert_eq!(result.result, Ter::TecPathPartial);
    }

    #[test]
    fn partial_payment_delivers_what_it_can() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let issuer = fund(&mut view, 1, 100_000_000);
        let alice = fund(&mut view, 2, 100_000_000);
        let bob = fund(&mut view, 3, 100_000_000);
        account_send(&mut view, &issuer, &alice, iou(10, usd(issuer))).unwrap();

        let result = flow(
            &mut view,
            iou(50, usd(issuer)),
            &alice,
            &bob,
            &PathSet::default(),
            &FlowOptions {
                default_path: true,
                partial_payment: true,
                ..Default::default()
            },
        );
        assert_eq!(result.result, Ter::TesSuccess);
        assert_eq!(result.actual_out, iou(10, usd(issuer)));
    }

    #[test]
    fn cross_currency_through_book() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let issuer = fund(&mut view, 1, 1_000_000_000);
        let maker = fund(&mut view, 2, 1_000_000_000);
        let alice = fund(&mut view, 3, 1_000_000_000);
        let bob = fund(&mut view, 4, 1_000_000_000);

        // Maker sells 100 MRD for 100 USD at 1:1.
        insert_offer(
            &mut view,
            &maker,
            5,
            iou(100, usd(issuer)),
            Amount::drops(100_000_000),
            0,
            None,
        )
        .unwrap();
        account_send(&mut view, &issuer, &alice, iou(500, usd(issuer))).unwrap();

        // Alice pays Bob 40 MRD, spending at most 40 USD.
        let result = flow(
            &mut view,
            Amount::drops(40_000_000),
            &alice,
            &bob,
            &PathSet::default(),
            &FlowOptions {
                default_path: true,
                send_max: Some(iou(40, usd(issuer))),
                ..Default::default()
            },
        );
        assert_eq!(result.result, Ter::TesSuccess);
        assert_eq!(result.actual_out, Amount::drops(40_000_000));
        assert_eq!(result.offers_crossed, 1);
        // Maker was paid USD, bob received drops.
        assert_eq!(
            line_balance(&view, &maker, &usd(issuer)),
            IouValue::from_int(40)
        );
        let bob_root = view.read(&Keylet::account(&bob).key()).unwrap();
        assert_eq!(
            bob_root.balance().unwrap(),
            Amount::Native(1_000_000_000 + 40_000_000)
        );
    }

    #[test]
    fn two_book_hop_usd_to_eur() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let issuer = fund(&mut view, 1, 1_000_000_000);
        let maker1 = fund(&mut view, 2, 10_000_000_000);
        let maker2 = fund(&mut view, 3, 1_000_000_000);
        let alice = fund(&mut view, 4, 1_000_000_000);
        let bob = fund(&mut view, 5, 1_000_000_000);

        // Book 1: USD → MRD. Book 2: MRD → EUR.
        insert_offer(
            &mut view,
            &maker1,
            2,
            iou(100, usd(issuer)),
            Amount::drops(100_000_000),
            0,
            None,
        )
        .unwrap();
        account_send(&mut view, &issuer, &maker2, iou(200, eur(issuer))).unwrap();
        insert_offer(
            &mut view,
            &maker2,
            2,
            Amount::drops(100_000_000),
            iou(100, eur(issuer)),
            0,
            None,
        )
        .unwrap();
        account_send(&mut view, &issuer, &alice, iou(500, usd(issuer))).unwrap();

        // Explicit path: USD → (native book) → EUR.
        let path = PathSet(vec![vec![
            meridian_protocol::path::PathElement::book(Currency::NATIVE, None),
            meridian_protocol::path::PathElement::book(
                Currency::from_code("EUR").unwrap(),
                Some(issuer),
            ),
        ]]);
        let result = flow(
            &mut view,
            iou(30, eur(issuer)),
            &alice,
            &bob,
            &path,
            &FlowOptions {
                default_path: false,
                send_max: Some(iou(40, usd(issuer))),
                ..Default::default()
            },
        );
        assert_eq!(result.result, Ter::TesSuccess);
        assert_eq!(result.actual_out, iou(30, eur(issuer)));
        assert_eq!(
            line_balance(&view, &bob, &eur(issuer)),
            IouValue::from_int(30)
        );
    }

    #[test]
    fn limit_quality_rejects_bad_books() {
        let ledger = genesis();
        let mut view = ApplyView::new(&ledger);
        let issuer = fund(&mut view, 1, 1_000_000_000);
        let maker = fund(&mut view, 2, 1_000_000_000);
        let alice = fund(&mut view, 3, 1_000_000_000);
        let bob = fund(&mut view, 4, 1_000_000_000);

        // Terrible rate: 200 USD for 50 MRD.
        insert_offer(
            &mut view,
            &maker,
            9,
            iou(200, usd(issuer)),
            Amount::drops(50_000_000),
            0,
            None,
        )
        .unwrap();
        account_send(&mut view, &issuer, &alice, iou(500, usd(issuer))).unwrap();

        let result = flow(
            &mut view,
            Amount::drops(50_000_000),
            &alice,
            &bob,
            &PathSet::default(),
            &FlowOptions {
                default_path: true,
                send_max: Some(iou(500, usd(issuer))),
                limit_quality: Quality::from_amounts(
                    &iou(1, usd(issuer)),
                    &Amount::drops(1_000_000),
                ),
                ..Default::default()
            },
        );
        // Quality floor filters the only strand: nothing delivered.
        assert_eq!(result.result, Ter::TecPathDry);
    }
}
