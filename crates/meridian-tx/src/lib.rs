pub mod account;
pub mod builder;
pub mod channels;
pub mod checks;
pub mod escrow;
pub mod invariants;
pub mod offers;
pub mod payment;
pub mod pseudo;
pub mod queue;
pub mod transactor;
pub mod trust;

pub use builder::{build_ledger, canonical_order};
pub use queue::LocalTxs;
pub use transactor::{apply_transaction, ApplyOutcome};
