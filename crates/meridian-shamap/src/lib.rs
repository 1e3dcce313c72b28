pub mod diff;
pub mod item;
pub mod map;
pub mod node;
pub mod nodeid;
pub mod sync;

pub use diff::MapDelta;
pub use item::ShaMapItem;
pub use map::{MapType, ShaMap};
pub use node::{LeafKind, NodeSource, Slot, TreeNode};
pub use nodeid::ShaMapNodeId;
pub use sync::{FetchPack, SyncFilter};

use meridian_core::Hash256;
use thiserror::Error;

/// What a missing-node report points at: either the node's hash (when the
/// parent knew it) or the leaf key being sought.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRef {
    Hash(Hash256),
    Key(Hash256),
}

#[derive(Debug, Error)]
pub enum ShaMapError {
    /// A traversal needed a node that is neither in memory nor in the
    /// backing store. Upper layers fetch it and retry.
    #[error("missing {map_type:?} node: {which:?}")]
    MissingNode {
        map_type: MapType,
        which: MissingRef,
    },

    #[error("key already present: {0}")]
    AlreadyPresent(Hash256),

    #[error("key not found: {0}")]
    NotFound(Hash256),

    #[error("map is sealed; mutation refused")]
    Immutable,

    #[error("malformed tree node")]
    BadNode,

    #[error("node does not match the expected hash")]
    HashMismatch,

    #[error("node id is not consistent with the tree position")]
    BadNodeId,
}
