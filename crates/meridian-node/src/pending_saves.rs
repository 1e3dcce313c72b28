use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

use meridian_core::types::LedgerIndex;

/// Deduplicates and tracks in-flight ledger persistence. A producer asks
/// `should_work(seq, sync)`: the first caller per sequence owns the save;
/// later synchronous callers block until the owner finishes.
pub struct PendingSaves {
    state: Mutex<HashMap<LedgerIndex, bool>>, // seq → save still running
    done: Condvar,
}

impl Default for PendingSaves {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingSaves {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            done: Condvar::new(),
        }
    }

    /// Whether the caller should perform the save for `seq`.
    ///
    /// With `synchronous`, a caller that loses the race blocks until the
    /// owner calls `finished`, then reports false (nothing left to do).
    pub fn should_work(&self, seq: LedgerIndex, synchronous: bool) -> bool {
        let mut state = self.state.lock();
        match state.get(&seq) {
            None => {
                state.insert(seq, true);
                true
            }
            Some(true) => {
                if synchronous {
                    while state.get(&seq) == Some(&true) {
                        self.done.wait(&mut state);
                    }
                }
                false
            }
            Some(false) => false, // already saved
        }
    }

    /// The owner reports completion, releasing synchronous waiters.
    pub fn finished(&self, seq: LedgerIndex) {
        let mut state = self.state.lock();
        state.insert(seq, false);
        self.done.notify_all();
    }

    /// Forget a completed entry (after pruning old ledgers).
    pub fn erase(&self, seq: LedgerIndex) {
        self.state.lock().remove(&seq);
    }

    pub fn pending(&self) -> usize {
        self.state.lock().values().filter(|v| **v).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_caller_owns_the_save() {
        let saves = PendingSaves::new();
        assert!(saves.should_work(5, false));
        assert!(!saves.should_work(5, false));
        saves.finished(5);
        assert!(!saves.should_work(5, false));
        assert_eq!(saves.pending(), 0);
    }

    #[test]
    fn synchronous_caller_waits_for_owner() {
        let saves = Arc::new(PendingSaves::new());
        assert!(saves.should_work(7, false));

        let waiter = {
            let saves = saves.clone();
            std::thread::spawn(move || {
                // Blocks until finished(7), then reports nothing to do.
                !saves.should_work(7, true)
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        saves.finished(7);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn erase_resets_the_slot() {
        let saves = PendingSaves::new();
        assert!(saves.should_work(9, false));
        saves.finished(9);
        saves.erase(9);
        // A replay after pruning is a fresh save.
        assert!(saves.should_work(9, false));
    }
}
