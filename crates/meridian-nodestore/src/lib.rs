pub mod cache;
pub mod object;
pub mod store;

pub use cache::{FullBelowCache, TaggedCache};
pub use object::{NodeObject, NodeObjectType};
pub use store::{store_tree, DatabaseSource, MemoryStore, NodeStore, SledStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt node object header")]
    BadHeader,

    #[error("stored body does not hash to its key")]
    HashMismatch,
}
