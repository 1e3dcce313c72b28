use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use meridian_core::Hash256;
use meridian_shamap::NodeSource;

use crate::object::{NodeObject, NodeObjectType};
use crate::StoreError;

/// Key→blob contract of the persistent node store. Writers treat it as
/// append-only; a key is only ever written with one body.
pub trait NodeStore: Send + Sync {
    fn store(&self, object: &NodeObject) -> Result<(), StoreError>;

    fn fetch(&self, key: &Hash256) -> Result<Option<NodeObject>, StoreError>;

    /// Batched write; backends may reorder within a batch.
    fn store_batch(&self, objects: &[NodeObject]) -> Result<(), StoreError> {
        for obj in objects {
            self.store(obj)?;
        }
        Ok(())
    }

    fn contains(&self, key: &Hash256) -> Result<bool, StoreError> {
        Ok(self.fetch(key)?.is_some())
    }
}

// ── Memory backend ───────────────────────────────────────────────────────────

/// Unbounded in-memory backend for tests and stand-alone operation.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<Hash256, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl NodeStore for MemoryStore {
    fn store(&self, object: &NodeObject) -> Result<(), StoreError> {
        self.map.write().insert(object.key, object.encode());
        Ok(())
    }

    fn fetch(&self, key: &Hash256) -> Result<Option<NodeObject>, StoreError> {
        match self.map.read().get(key) {
            Some(record) => Ok(Some(NodeObject::decode(*key, record)?)),
            None => Ok(None),
        }
    }
}

// ── Sled backend ─────────────────────────────────────────────────────────────

/// Persistent backend on sled (pure-Rust, no C dependencies).
pub struct SledStore {
    _db: sled::Db,
    nodes: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let nodes = db
            .open_tree("nodes")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { _db: db, nodes })
    }
}

impl NodeStore for SledStore {
    fn store(&self, object: &NodeObject) -> Result<(), StoreError> {
        self.nodes
            .insert(object.key.as_bytes(), object.encode())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn fetch(&self, key: &Hash256) -> Result<Option<NodeObject>, StoreError> {
        match self
            .nodes
            .get(key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(record) => Ok(Some(NodeObject::decode(*key, &record)?)),
            None => Ok(None),
        }
    }

    fn store_batch(&self, objects: &[NodeObject]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for obj in objects {
            batch.insert(obj.key.as_bytes(), obj.encode());
        }
        self.nodes
            .apply_batch(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(count = objects.len(), "node store batch committed");
        Ok(())
    }
}

// ── Tree-node adapter ────────────────────────────────────────────────────────

/// Presents a `NodeStore` as a `NodeSource` for partial tree resolution.
pub struct DatabaseSource {
    store: Arc<dyn NodeStore>,
}

impl DatabaseSource {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }
}

impl NodeSource for DatabaseSource {
    fn fetch(&self, hash: &Hash256) -> Option<Vec<u8>> {
        self.store.fetch(hash).ok().flatten().map(|obj| obj.body)
    }
}

/// Persist every reachable node of a tree in one batch.
pub fn store_tree(
    store: &dyn NodeStore,
    map: &meridian_shamap::ShaMap,
    object_type: NodeObjectType,
) -> Result<usize, StoreError> {
    let mut objects = Vec::new();
    let v2 = map.is_v2();
    map.visit_nodes(&mut |node, depth| {
        objects.push(NodeObject::new(
            node.compute_hash(depth, v2),
            object_type,
            node.to_wire(depth, v2),
        ));
        Ok(())
    })
    .map_err(|e| StoreError::Backend(e.to_string()))?;
    let count = objects.len();
    store.store_batch(&objects)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shamap::{MapType, ShaMap, ShaMapItem};

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let obj = NodeObject::new(
            Hash256::from_bytes([7u8; 32]),
            NodeObjectType::TransactionNode,
            vec![1, 2, 3],
        );
        store.store(&obj).unwrap();
        assert_eq!(store.fetch(&obj.key).unwrap().unwrap(), obj);
        assert!(store.fetch(&Hash256::ZERO).unwrap().is_none());
    }

    #[test]
    fn stored_tree_resolves_through_database_source() {
        let mut map = ShaMap::new(MapType::State);
        for i in 0u8..30 {
            map.add(ShaMapItem::new(
                Hash256::from_bytes([i ^ 0xA1; 32]),
                vec![i],
            ))
            .unwrap();
        }
        map.seal();
        let root = map.hash();

        let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
        let stored = store_tree(store.as_ref(), &map, NodeObjectType::AccountNode).unwrap();
        assert!(stored > 30);

        // Rebuild from the root hash alone, resolving via the store.
        let source = Arc::new(DatabaseSource::new(store));
        let mut rebuilt = ShaMap::new(MapType::State).with_backing(source);
        let root_obj = map.serve_node(&meridian_shamap::ShaMapNodeId::ROOT).unwrap();
        rebuilt.add_root_node(root, &root_obj).unwrap();
        assert!(rebuilt.missing_nodes(16).unwrap().is_empty());
        assert_eq!(rebuilt.get_hash(), root);
        assert_eq!(rebuilt.leaf_count().unwrap(), 30);
    }
}
