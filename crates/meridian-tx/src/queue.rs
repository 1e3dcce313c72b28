use std::collections::HashMap;

use meridian_core::types::{Hash256, LedgerIndex};
use meridian_core::constants::LOCAL_TX_HOLD_LEDGERS;
use meridian_protocol::tx::Transaction;
use tracing::debug;

/// Locally-submitted and retry-class transactions held for re-application
/// against subsequent open ledgers. Entries age out after a bounded number
/// of ledgers or once they appear in a validated ledger.
pub struct LocalTxs {
    held: HashMap<Hash256, HeldTx>,
}

struct HeldTx {
    tx: Transaction,
    /// Last ledger seq at which re-application is still attempted.
    expires: LedgerIndex,
}

impl Default for LocalTxs {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTxs {
    pub fn new() -> Self {
        Self {
            held: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Hold `tx` for retry, starting from `current_seq`.
    pub fn push(&mut self, tx: Transaction, current_seq: LedgerIndex) {
        let id = tx.tx_id();
        let expires = tx
            .last_ledger_sequence()
            .unwrap_or(current_seq + LOCAL_TX_HOLD_LEDGERS);
        self.held.entry(id).or_insert(HeldTx { tx, expires });
    }

    /// Transactions to feed into the next open ledger, dropping the ones
    /// that aged out or were seen validated.
    pub fn candidates(
        &mut self,
        next_seq: LedgerIndex,
        validated: impl Fn(&Hash256) -> bool,
    ) -> Vec<Transaction> {
        let mut dropped = 0;
        self.held.retain(|id, held| {
            if validated(id) || held.expires < next_seq {
                dropped += 1;
                false
            } else {
                true
            }
        });
        if dropped > 0 {
            debug!(dropped, remaining = self.held.len(), "local txs pruned");
        }
        self.held.values().map(|h| h.tx.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::amount::Amount;
    use meridian_core::types::AccountId;
    use meridian_crypto::keys::{KeyType, Keypair, Seed};
    use meridian_protocol::field;
    use meridian_protocol::tx::TxType;

    fn sample_tx(seq: u32) -> Transaction {
        let kp = Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([9; 16])).unwrap();
        let mut tx = Transaction::build(TxType::Payment, kp.account_id());
        tx.obj_mut().set_u32(&field::SF_SEQUENCE, seq);
        tx.obj_mut().set_amount(&field::SF_FEE, Amount::Native(10));
        tx.obj_mut().set_amount(&field::SF_AMOUNT, Amount::drops(1));
        tx.obj_mut()
            .set_account(&field::SF_DESTINATION, AccountId::from_bytes([1; 20]));
        tx.sign(&kp);
        tx
    }

    #[test]
    fn holds_and_expires() {
        let mut queue = LocalTxs::new();
        queue.push(sample_tx(1), 10);
        assert_eq!(queue.len(), 1);

        // Still live inside the hold window.
        assert_eq!(queue.candidates(11, |_| false).len(), 1);
        // Aged out past the window.
        assert!(queue
            .candidates(10 + LOCAL_TX_HOLD_LEDGERS + 1, |_| false)
            .is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn validated_txs_are_dropped() {
        let mut queue = LocalTxs::new();
        let tx = sample_tx(1);
        let id = tx.tx_id();
        queue.push(tx, 10);
        assert!(queue.candidates(11, |seen| *seen == id).is_empty());
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let mut queue = LocalTxs::new();
        queue.push(sample_tx(1), 10);
        queue.push(sample_tx(1), 12);
        assert_eq!(queue.len(), 1);
    }
}
