use std::collections::HashSet;
use std::sync::Arc;

use meridian_core::Hash256;

/// The amendment set active for a ledger. Transactor behavior branches on
/// membership; the set changes only at flag ledgers.
#[derive(Clone, Debug, Default)]
pub struct Rules {
    enabled: Arc<HashSet<Hash256>>,
}

impl Rules {
    pub fn new(enabled: HashSet<Hash256>) -> Self {
        Self {
            enabled: Arc::new(enabled),
        }
    }

    pub fn enabled(&self, amendment: &Hash256) -> bool {
        self.enabled.contains(amendment)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash256> {
        self.enabled.iter()
    }

    pub fn count(&self) -> usize {
        self.enabled.len()
    }

    /// A copy with `amendment` added.
    pub fn with(&self, amendment: Hash256) -> Rules {
        let mut set: HashSet<Hash256> = (*self.enabled).clone();
        set.insert(amendment);
        Rules::new(set)
    }
}
