use std::collections::{HashSet, VecDeque};

use meridian_core::amount::Amount;
use meridian_core::constants::{MAX_PATHS_FOUND, MAX_PATH_LENGTH};
use meridian_core::issue::{Book, Issue};
use meridian_core::types::AccountId;
use meridian_ledger::dirs::dir_entries;
use meridian_ledger::ReadView;
use meridian_protocol::field;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::path::{PathElement, PathSet};
use meridian_protocol::sle::LedgerEntryType;
use tracing::trace;

use crate::book::book_offers;
use crate::steps::build_strands;

/// A partial path under exploration.
#[derive(Clone, Debug)]
struct Frontier {
    elements: Vec<PathElement>,
    account: AccountId,
    issue: Issue,
}

/// Breadth-first path search over the trust-line / order-book graph.
///
/// The search is incremental: `step()` does a bounded amount of work and
/// yields at most one candidate path, so the caller can interleave
/// pathfinding with other duties.
pub struct Pathfinder<'a> {
    view: &'a dyn ReadView,
    src: AccountId,
    dst: AccountId,
    src_issue: Issue,
    dst_issue: Issue,
    deliver: Amount,
    queue: VecDeque<Frontier>,
    visited: HashSet<(AccountId, Issue)>,
    emitted: usize,
    exhausted: bool,
}

impl<'a> Pathfinder<'a> {
    pub fn new(
        view: &'a dyn ReadView,
        src: AccountId,
        dst: AccountId,
        deliver: Amount,
        send_max_issue: Option<Issue>,
    ) -> Self {
        let dst_issue = deliver.issue();
        let src_issue = send_max_issue.unwrap_or(dst_issue);
        let mut queue = VecDeque::new();
        queue.push_back(Frontier {
            elements: Vec::new(),
            account: src,
            issue: src_issue,
        });
        Self {
            view,
            src,
            dst,
            src_issue,
            dst_issue,
            deliver,
            queue,
            visited: HashSet::new(),
            emitted: 0,
            exhausted: false,
        }
    }

    /// Advance the search; returns the next candidate path if one completes.
    /// `None` once the graph is exhausted or the caps are reached.
    pub fn step(&mut self) -> Option<Vec<PathElement>> {
        if self.exhausted || self.emitted >= MAX_PATHS_FOUND {
            return None;
        }
        while let Some(frontier) = self.queue.pop_front() {
            if frontier.elements.len() >= MAX_PATH_LENGTH {
                continue;
            }
            if !self.visited.insert((frontier.account, frontier.issue)) {
                continue;
            }

            // Completion: at the destination issue, deliverable to dst.
            if frontier.issue == self.dst_issue && !frontier.elements.is_empty() {
                let done = frontier.issue.is_native()
                    || frontier.account == self.dst
                    || self.holds_or_trusts(&self.dst, &frontier.issue);
                if done {
                    self.emitted += 1;
                    trace!(len = frontier.elements.len(), "path candidate");
                    self.expand(&frontier);
                    return Some(frontier.elements);
                }
            }
            self.expand(&frontier);
        }
        self.exhausted = true;
        None
    }

    /// Up to `limit` candidate paths ranked by deliverable quality.
    pub fn find_paths(&mut self, limit: usize) -> PathSet {
        let mut candidates = Vec::new();
        while candidates.len() < limit.max(MAX_PATHS_FOUND) {
            match self.step() {
                Some(path) => candidates.push(path),
                None => break,
            }
        }
        // Rank by reverse-pass quality at the requested amount.
        let mut ranked: Vec<(u64, Vec<PathElement>)> = candidates
            .into_iter()
            .map(|path| {
                let set = PathSet(vec![path.clone()]);
                let strands = build_strands(
                    &self.src,
                    &self.dst,
                    self.src_issue,
                    self.dst_issue,
                    &set,
                    false,
                );
                let score = strands
                    .first()
                    .and_then(|s| {
                        let (_, out, quality) =
                            s.estimate(self.view, self.deliver.as_iou_value());
                        quality.filter(|_| !out.is_zero()).map(|q| q.to_key())
                    })
                    .unwrap_or(u64::MAX);
                (score, path)
            })
            .collect();
        ranked.sort_by_key(|(score, _)| *score);
        PathSet(
            ranked
                .into_iter()
                .take(limit)
                .filter(|(score, _)| *score != u64::MAX)
                .map(|(_, path)| path)
                .collect(),
        )
    }

    // ── Expansion ───────────────────────────────────────────────────────────

    fn expand(&mut self, frontier: &Frontier) {
        if frontier.elements.len() + 1 > MAX_PATH_LENGTH {
            return;
        }
        // 1. Hop to the issuer and to trust-line peers in this currency.
        if !frontier.issue.is_native() {
            if frontier.account != frontier.issue.issuer {
                self.push_account(frontier, frontier.issue.issuer);
            }
            for peer in self.line_peers(&frontier.account, &frontier.issue) {
                self.push_account(frontier, peer);
            }
        }
        // 2. Books from the current issue toward the destination currency,
        //    and through the native asset as a bridge.
        let mut targets: Vec<Issue> = Vec::new();
        if frontier.issue != self.dst_issue {
            targets.push(self.dst_issue);
        }
        if !frontier.issue.is_native() && !self.dst_issue.is_native() {
            targets.push(Issue::NATIVE);
        }
        for target in targets {
            if target == frontier.issue {
                continue;
            }
            let book = Book::new(frontier.issue, target);
            if book_offers(self.view, &book, 1).is_empty() {
                continue;
            }
            let mut elements = frontier.elements.clone();
            elements.push(if target.is_native() {
                PathElement::book(meridian_core::issue::Currency::NATIVE, None)
            } else {
                PathElement::book(target.currency, Some(target.issuer))
            });
            self.queue.push_back(Frontier {
                elements,
                account: self.src,
                issue: target,
            });
        }
    }

    fn push_account(&mut self, frontier: &Frontier, account: AccountId) {
        if self.visited.contains(&(account, frontier.issue)) {
            return;
        }
        let mut elements = frontier.elements.clone();
        elements.push(PathElement::account(account));
        self.queue.push_back(Frontier {
            elements,
            account,
            issue: frontier.issue,
        });
    }

    /// Accounts sharing a trust line with `account` in the issue's currency.
    fn line_peers(&self, account: &AccountId, issue: &Issue) -> Vec<AccountId> {
        let mut peers = Vec::new();
        let root = Keylet::owner_dir(account);
        for key in dir_entries(self.view, &root) {
            let Some(sle) = self.view.read(&key) else {
                continue;
            };
            if sle.entry_type() != LedgerEntryType::TrustLine {
                continue;
            }
            let low = sle
                .obj()
                .get_amount(&field::SF_LOW_LIMIT)
                .map(|a| a.issue());
            let high = sle
                .obj()
                .get_amount(&field::SF_HIGH_LIMIT)
                .map(|a| a.issue());
            let (Some(low), Some(high)) = (low, high) else {
                continue;
            };
            if low.currency != issue.currency {
                continue;
            }
            let peer = if low.issuer == *account {
                high.issuer
            } else {
                low.issuer
            };
            peers.push(peer);
        }
        peers
    }

    fn holds_or_trusts(&self, account: &AccountId, issue: &Issue) -> bool {
        let keylet = Keylet::line(account, &issue.issuer, &issue.currency);
        self.view.exists(&keylet.key()) || *account == issue.issuer
    }
}
