pub mod dirs;
pub mod fees;
pub mod funds;
pub mod genesis;
pub mod ledger;
pub mod rules;
pub mod timing;
pub mod view;

pub use fees::FeeSchedule;
pub use genesis::GenesisConfig;
pub use ledger::{decode_tx_leaf, encode_tx_leaf, make_meta, Ledger};
pub use rules::Rules;
pub use view::{commit, ApplyView, Delta, ReadView};

use meridian_core::Hash256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger is sealed; mutation refused")]
    Immutable,

    #[error("entry already exists at {0}")]
    AlreadyExists(Hash256),

    #[error("no entry at {0}")]
    NotFound(Hash256),

    #[error("directory page is full")]
    DirectoryFull,

    #[error("state map error: {0}")]
    Map(#[from] meridian_shamap::ShaMapError),

    #[error("entry is malformed: {0}")]
    Protocol(#[from] meridian_protocol::ProtocolError),

    #[error("drop balance arithmetic overflow")]
    DropsOverflow,
}
