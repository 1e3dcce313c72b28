pub mod field;
pub mod flags;
pub mod keylet;
pub mod path;
pub mod serializer;
pub mod sle;
pub mod stobject;
pub mod tx;

pub use field::{FieldId, FieldType, SField};
pub use keylet::Keylet;
pub use path::{PathElement, PathSet};
pub use serializer::{BinaryReader, Serializer};
pub use sle::{LedgerEntryType, Sle};
pub use stobject::{StObject, StValue};
pub use tx::{Transaction, TxType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown field: type {0} code {1}")]
    UnknownField(u8, u8),

    #[error("field {0} has the wrong type")]
    FieldTypeMismatch(&'static str),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("truncated input at offset {0}")]
    Truncated(usize),

    #[error("malformed variable-length prefix")]
    BadVlPrefix,

    #[error("malformed amount encoding")]
    BadAmount,

    #[error("fields out of canonical order")]
    OutOfOrder,

    #[error("unknown transaction type {0}")]
    UnknownTxType(u16),

    #[error("unknown ledger entry type {0}")]
    UnknownEntryType(u16),

    #[error("malformed path set")]
    BadPathSet,

    #[error("{0}")]
    Core(#[from] meridian_core::CoreError),
}
