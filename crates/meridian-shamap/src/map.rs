use std::sync::Arc;

use meridian_core::Hash256;

use crate::item::ShaMapItem;
use crate::node::{LeafKind, NodeSource, Slot, TreeNode};
use crate::{MissingRef, ShaMapError};

/// What a map stores; selects leaf hashing and missing-node reporting.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MapType {
    /// Account-state entries.
    State,
    /// A ledger's transaction set.
    Transaction,
    /// Detached scratch map.
    Free,
}

impl MapType {
    fn leaf_kind(self) -> LeafKind {
        match self {
            MapType::Transaction => LeafKind::Transaction,
            MapType::State | MapType::Free => LeafKind::State,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    Add,
    Update,
}

/// A Merkleized 16-way radix tree.
///
/// Snapshots are O(1): clones share every node and writers re-allocate only
/// the path they touch. An instance may be partial, with absent subtrees
/// represented by their hashes and resolved through a `NodeSource`.
pub struct ShaMap {
    map_type: MapType,
    v2: bool,
    root: Arc<TreeNode>,
    backing: Option<Arc<dyn NodeSource>>,
    immutable: bool,
}

impl ShaMap {
    pub fn new(map_type: MapType) -> Self {
        Self {
            map_type,
            v2: false,
            root: Arc::new(TreeNode::new_inner()),
            backing: None,
            immutable: false,
        }
    }

    /// Select the depth-tagged (v2) hashing layout. Chosen per ledger.
    pub fn new_v2(map_type: MapType) -> Self {
        Self {
            v2: true,
            ..Self::new(map_type)
        }
    }

    pub fn with_backing(mut self, backing: Arc<dyn NodeSource>) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn map_type(&self) -> MapType {
        self.map_type
    }

    pub fn is_v2(&self) -> bool {
        self.v2
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn root(&self) -> &Arc<TreeNode> {
        &self.root
    }

    pub(crate) fn replace_root(&mut self, root: Arc<TreeNode>) {
        self.root = root;
    }

    fn missing(&self, which: MissingRef) -> ShaMapError {
        ShaMapError::MissingNode {
            map_type: self.map_type,
            which,
        }
    }

    /// Fetch and verify a non-resident node.
    pub(crate) fn fetch_node(&self, hash: &Hash256, depth: u8) -> Result<TreeNode, ShaMapError> {
        let data = self
            .backing
            .as_ref()
            .and_then(|b| b.fetch(hash))
            .ok_or_else(|| self.missing(MissingRef::Hash(*hash)))?;
        let (node, _) = TreeNode::from_wire(&data)?;
        if node.compute_hash(depth, self.v2) != *hash {
            return Err(ShaMapError::HashMismatch);
        }
        Ok(node)
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    pub fn get(&self, key: &Hash256) -> Result<Option<Arc<ShaMapItem>>, ShaMapError> {
        let mut current = self.root.clone();
        let mut depth: u8 = 0;
        loop {
            match &*current {
                TreeNode::Leaf { item, .. } => {
                    return Ok((item.key() == *key).then(|| item.clone()));
                }
                TreeNode::Inner { slots, .. } => {
                    let branch = key.nibble(depth as usize) as usize;
                    match &slots[branch] {
                        Slot::Empty => return Ok(None),
                        Slot::Node(child) => current = child.clone(),
                        Slot::Hash(h) => current = Arc::new(self.fetch_node(h, depth + 1)?),
                    }
                    depth += 1;
                }
            }
        }
    }

    pub fn has(&self, key: &Hash256) -> Result<bool, ShaMapError> {
        Ok(self.get(key)?.is_some())
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    /// Insert a new item; fails with `AlreadyPresent` if the key exists.
    pub fn add(&mut self, item: ShaMapItem) -> Result<(), ShaMapError> {
        self.insert(Arc::new(item), InsertMode::Add)
    }

    /// Replace an existing item; fails with `NotFound` if the key is absent.
    pub fn update(&mut self, item: ShaMapItem) -> Result<(), ShaMapError> {
        self.insert(Arc::new(item), InsertMode::Update)
    }

    fn insert(&mut self, item: Arc<ShaMapItem>, mode: InsertMode) -> Result<(), ShaMapError> {
        if self.immutable {
            return Err(ShaMapError::Immutable);
        }
        let ctx = Ctx {
            kind: self.map_type.leaf_kind(),
            v2: self.v2,
            map_type: self.map_type,
            backing: self.backing.clone(),
        };
        let mut root = self.root.clone();
        insert_into(&mut root, 0, item, mode, &ctx)?;
        self.root = root;
        Ok(())
    }

    /// Remove the item at `key`; fails with `NotFound` if absent.
    pub fn delete(&mut self, key: &Hash256) -> Result<(), ShaMapError> {
        if self.immutable {
            return Err(ShaMapError::Immutable);
        }
        let ctx = Ctx {
            kind: self.map_type.leaf_kind(),
            v2: self.v2,
            map_type: self.map_type,
            backing: self.backing.clone(),
        };
        let mut root = self.root.clone();
        delete_from(&mut root, 0, key, &ctx)?;
        self.root = root;
        Ok(())
    }

    // ── Hashing & snapshots ─────────────────────────────────────────────────

    /// The root hash, recomputing dirty nodes bottom-up and caching.
    pub fn get_hash(&mut self) -> Hash256 {
        Arc::make_mut(&mut self.root).update_hash(0, self.v2)
    }

    /// The root hash without touching caches.
    pub fn hash(&self) -> Hash256 {
        self.root.compute_hash(0, self.v2)
    }

    /// O(1) copy-on-write clone sharing every node. Hashes are flushed
    /// first so both maps agree on their digests.
    pub fn snapshot(&mut self, mutable: bool) -> ShaMap {
        self.get_hash();
        ShaMap {
            map_type: self.map_type,
            v2: self.v2,
            root: self.root.clone(),
            backing: self.backing.clone(),
            immutable: !mutable,
        }
    }

    /// Seal this map against further mutation.
    pub fn seal(&mut self) {
        self.get_hash();
        self.immutable = true;
    }

    // ── Traversal ───────────────────────────────────────────────────────────

    /// Visit every leaf in key order. Fetches absent subtrees read-only.
    pub fn visit_leaves(
        &self,
        f: &mut dyn FnMut(&Arc<ShaMapItem>),
    ) -> Result<(), ShaMapError> {
        self.walk(&self.root, 0, &mut |node| {
            if let TreeNode::Leaf { item, .. } = node {
                f(item);
            }
            Ok(())
        })
    }

    /// Visit every node (inner and leaf) in depth-first order.
    pub fn visit_nodes(
        &self,
        f: &mut dyn FnMut(&TreeNode, u8) -> Result<(), ShaMapError>,
    ) -> Result<(), ShaMapError> {
        self.walk_with_depth(&self.root, 0, f)
    }

    fn walk(
        &self,
        node: &Arc<TreeNode>,
        depth: u8,
        f: &mut dyn FnMut(&TreeNode) -> Result<(), ShaMapError>,
    ) -> Result<(), ShaMapError> {
        self.walk_with_depth(node, depth, &mut |n, _| f(n))
    }

    fn walk_with_depth(
        &self,
        node: &Arc<TreeNode>,
        depth: u8,
        f: &mut dyn FnMut(&TreeNode, u8) -> Result<(), ShaMapError>,
    ) -> Result<(), ShaMapError> {
        f(node, depth)?;
        if let TreeNode::Inner { slots, .. } = &**node {
            for slot in slots.iter() {
                match slot {
                    Slot::Empty => {}
                    Slot::Node(child) => self.walk_with_depth(child, depth + 1, f)?,
                    Slot::Hash(h) => {
                        let child = Arc::new(self.fetch_node(h, depth + 1)?);
                        self.walk_with_depth(&child, depth + 1, f)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Count of leaves reachable from the root.
    pub fn leaf_count(&self) -> Result<usize, ShaMapError> {
        let mut n = 0;
        self.visit_leaves(&mut |_| n += 1)?;
        Ok(n)
    }

    /// The smallest leaf key greater than or equal to `from`, if any.
    /// Drives ordered iteration (directory pages, order-book qualities).
    pub fn succ(&self, from: &Hash256) -> Result<Option<Hash256>, ShaMapError> {
        self.succ_in(&self.root, 0, from)
    }

    fn succ_in(
        &self,
        node: &Arc<TreeNode>,
        depth: u8,
        from: &Hash256,
    ) -> Result<Option<Hash256>, ShaMapError> {
        match &**node {
            TreeNode::Leaf { item, .. } => {
                Ok((item.key() >= *from).then(|| item.key()))
            }
            TreeNode::Inner { slots, .. } => {
                let start = from.nibble(depth as usize) as usize;
                for branch in start..16 {
                    let child = match &slots[branch] {
                        Slot::Empty => continue,
                        Slot::Node(c) => c.clone(),
                        Slot::Hash(h) => Arc::new(self.fetch_node(h, depth + 1)?),
                    };
                    // Only the first branch stays constrained by `from`;
                    // later branches take their smallest leaf.
                    let bound = if branch == start {
                        *from
                    } else {
                        Hash256::ZERO
                    };
                    if let Some(found) = self.succ_in(&child, depth + 1, &bound)? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
        }
    }
}

struct Ctx {
    kind: LeafKind,
    v2: bool,
    map_type: MapType,
    backing: Option<Arc<dyn NodeSource>>,
}

impl Ctx {
    fn missing(&self, hash: Hash256) -> ShaMapError {
        ShaMapError::MissingNode {
            map_type: self.map_type,
            which: MissingRef::Hash(hash),
        }
    }

    /// Replace a `Slot::Hash` with the materialized node.
    fn materialize(&self, slot: &mut Slot, depth: u8) -> Result<(), ShaMapError> {
        if let Slot::Hash(h) = slot {
            let hash = *h;
            let data = self
                .backing
                .as_ref()
                .and_then(|b| b.fetch(&hash))
                .ok_or_else(|| self.missing(hash))?;
            let (node, _) = TreeNode::from_wire(&data)?;
            if node.compute_hash(depth, self.v2) != hash {
                return Err(ShaMapError::HashMismatch);
            }
            *slot = Slot::Node(Arc::new(node));
        }
        Ok(())
    }
}

fn insert_into(
    node: &mut Arc<TreeNode>,
    depth: u8,
    item: Arc<ShaMapItem>,
    mode: InsertMode,
    ctx: &Ctx,
) -> Result<(), ShaMapError> {
    let inner = Arc::make_mut(node);
    let TreeNode::Inner { slots, cached } = inner else {
        return Err(ShaMapError::BadNode);
    };
    let branch = item.key().nibble(depth as usize) as usize;
    ctx.materialize(&mut slots[branch], depth + 1)?;

    match &mut slots[branch] {
        Slot::Empty => {
            if mode == InsertMode::Update {
                return Err(ShaMapError::NotFound(item.key()));
            }
            slots[branch] = Slot::Node(Arc::new(TreeNode::new_leaf(item, ctx.kind)));
        }
        Slot::Node(child) if child.is_inner() => {
            insert_into(child, depth + 1, item, mode, ctx)?;
        }
        Slot::Node(child) => {
            let existing = match &**child {
                TreeNode::Leaf { item, .. } => item.clone(),
                _ => unreachable!("checked inner above"),
            };
            if existing.key() == item.key() {
                match mode {
                    InsertMode::Add => return Err(ShaMapError::AlreadyPresent(item.key())),
                    InsertMode::Update => {
                        *child = Arc::new(TreeNode::new_leaf(item, ctx.kind));
                    }
                }
            } else {
                if mode == InsertMode::Update {
                    return Err(ShaMapError::NotFound(item.key()));
                }
                // Split: push the resident leaf one level down, then descend.
                // Chained splits happen naturally while the keys share
                // nibbles.
                let mut split = Arc::new(TreeNode::new_inner());
                {
                    let split_mut = Arc::make_mut(&mut split);
                    let TreeNode::Inner { slots, .. } = split_mut else {
                        unreachable!("fresh inner");
                    };
                    let old_branch = existing.key().nibble(depth as usize + 1) as usize;
                    slots[old_branch] =
                        Slot::Node(Arc::new(TreeNode::new_leaf(existing, ctx.kind)));
                }
                insert_into(&mut split, depth + 1, item, mode, ctx)?;
                slots[branch] = Slot::Node(split);
            }
        }
        Slot::Hash(_) => unreachable!("materialized above"),
    }
    *cached = None;
    Ok(())
}

fn delete_from(
    node: &mut Arc<TreeNode>,
    depth: u8,
    key: &Hash256,
    ctx: &Ctx,
) -> Result<(), ShaMapError> {
    let inner = Arc::make_mut(node);
    let TreeNode::Inner { slots, cached } = inner else {
        return Err(ShaMapError::BadNode);
    };
    let branch = key.nibble(depth as usize) as usize;
    ctx.materialize(&mut slots[branch], depth + 1)?;

    match &mut slots[branch] {
        Slot::Empty => return Err(ShaMapError::NotFound(*key)),
        Slot::Node(child) if child.is_leaf() => {
            let matches = matches!(&**child, TreeNode::Leaf { item, .. } if item.key() == *key);
            if !matches {
                return Err(ShaMapError::NotFound(*key));
            }
            slots[branch] = Slot::Empty;
        }
        Slot::Node(child) => {
            delete_from(child, depth + 1, key, ctx)?;
            // An inner left holding a single leaf collapses into this slot;
            // an empty inner vanishes.
            match child.branch_count() {
                0 => slots[branch] = Slot::Empty,
                1 => {
                    if let Some(leaf) = sole_leaf_child(child, depth + 1, ctx)? {
                        slots[branch] = Slot::Node(leaf);
                    }
                }
                _ => {}
            }
        }
        Slot::Hash(_) => unreachable!("materialized above"),
    }
    *cached = None;
    Ok(())
}

/// If `inner`'s one remaining child is a leaf, return it.
fn sole_leaf_child(
    inner: &mut Arc<TreeNode>,
    depth: u8,
    ctx: &Ctx,
) -> Result<Option<Arc<TreeNode>>, ShaMapError> {
    let node = Arc::make_mut(inner);
    let TreeNode::Inner { slots, .. } = node else {
        return Ok(None);
    };
    for slot in slots.iter_mut() {
        if !slot.is_empty() {
            ctx.materialize(slot, depth + 1)?;
            if let Slot::Node(child) = slot {
                if child.is_leaf() {
                    return Ok(Some(child.clone()));
                }
            }
            return Ok(None);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> Hash256 {
        let mut k = [0u8; 32];
        k[..bytes.len()].copy_from_slice(bytes);
        Hash256::from_bytes(k)
    }

    fn item(bytes: &[u8]) -> ShaMapItem {
        ShaMapItem::new(key(bytes), bytes.to_vec())
    }

    #[test]
    fn empty_map_has_zero_hash() {
        let mut map = ShaMap::new(MapType::State);
        assert_eq!(map.get_hash(), Hash256::ZERO);
    }

    #[test]
    fn add_get_update_delete() {
        let mut map = ShaMap::new(MapType::State);
        map.add(item(&[1])).unwrap();
        assert!(map.has(&key(&[1])).unwrap());
        assert_eq!(map.get(&key(&[1])).unwrap().unwrap().data(), &[1]);

        assert!(matches!(
            map.add(item(&[1])),
            Err(ShaMapError::AlreadyPresent(_))
        ));

        map.update(ShaMapItem::new(key(&[1]), vec![9, 9])).unwrap();
        assert_eq!(map.get(&key(&[1])).unwrap().unwrap().data(), &[9, 9]);

        map.delete(&key(&[1])).unwrap();
        assert!(!map.has(&key(&[1])).unwrap());
        assert!(matches!(
            map.delete(&key(&[1])),
            Err(ShaMapError::NotFound(_))
        ));
        assert_eq!(map.get_hash(), Hash256::ZERO);
    }

    #[test]
    fn update_missing_fails() {
        let mut map = ShaMap::new(MapType::State);
        assert!(matches!(
            map.update(item(&[7])),
            Err(ShaMapError::NotFound(_))
        ));
    }

    #[test]
    fn hash_is_insertion_order_independent() {
        let items: Vec<ShaMapItem> = (0u8..50).map(|i| item(&[i, i ^ 0x3C])).collect();
        let mut forward = ShaMap::new(MapType::State);
        for it in &items {
            forward.add(it.clone()).unwrap();
        }
        let mut backward = ShaMap::new(MapType::State);
        for it in items.iter().rev() {
            backward.add(it.clone()).unwrap();
        }
        assert_eq!(forward.get_hash(), backward.get_hash());
    }

    #[test]
    fn deep_split_on_shared_prefix() {
        // Keys sharing the first 3 nibbles force a chain of splits.
        let a = ShaMapItem::new(key(&[0xAB, 0xC0]), vec![1]);
        let b = ShaMapItem::new(key(&[0xAB, 0xCF]), vec![2]);
        let mut map = ShaMap::new(MapType::State);
        map.add(a.clone()).unwrap();
        map.add(b.clone()).unwrap();
        assert_eq!(map.get(&a.key()).unwrap().unwrap().data(), &[1]);
        assert_eq!(map.get(&b.key()).unwrap().unwrap().data(), &[2]);

        // Deleting one collapses the chain back to a single leaf.
        let with_both = map.get_hash();
        map.delete(&b.key()).unwrap();
        let mut solo = ShaMap::new(MapType::State);
        solo.add(a).unwrap();
        assert_eq!(map.get_hash(), solo.get_hash());
        assert_ne!(with_both, solo.get_hash());
    }

    #[test]
    fn snapshot_isolates_writers() {
        let mut map = ShaMap::new(MapType::State);
        for i in 0u8..10 {
            map.add(item(&[i])).unwrap();
        }
        let frozen_hash = map.get_hash();
        let frozen = map.snapshot(false);

        map.add(item(&[99])).unwrap();
        map.delete(&key(&[0])).unwrap();

        assert_eq!(frozen.hash(), frozen_hash);
        assert_ne!(map.get_hash(), frozen_hash);
        assert!(frozen.has(&key(&[0])).unwrap());
        assert!(!frozen.has(&key(&[99])).unwrap());
    }

    #[test]
    fn immutable_snapshot_refuses_writes() {
        let mut map = ShaMap::new(MapType::State);
        map.add(item(&[1])).unwrap();
        let mut frozen = map.snapshot(false);
        assert!(matches!(frozen.add(item(&[2])), Err(ShaMapError::Immutable)));
    }

    #[test]
    fn mutable_snapshot_diverges() {
        let mut map = ShaMap::new(MapType::State);
        map.add(item(&[1])).unwrap();
        let mut branch = map.snapshot(true);
        branch.add(item(&[2])).unwrap();
        assert!(!map.has(&key(&[2])).unwrap());
        assert!(branch.has(&key(&[2])).unwrap());
    }

    #[test]
    fn visit_leaves_sees_all() {
        let mut map = ShaMap::new(MapType::State);
        for i in 0u8..25 {
            map.add(item(&[i, 0xF0 | (i & 3)])).unwrap();
        }
        assert_eq!(map.leaf_count().unwrap(), 25);
    }

    #[test]
    fn succ_iterates_in_key_order() {
        let mut map = ShaMap::new(MapType::State);
        let keys: Vec<Hash256> = [0x10u8, 0x2F, 0x30, 0x31, 0xEE]
            .iter()
            .map(|&b| key(&[b]))
            .collect();
        for k in &keys {
            map.add(ShaMapItem::new(*k, vec![0])).unwrap();
        }
        let mut found = Vec::new();
        let mut cursor = Hash256::ZERO;
        while let Some(next) = map.succ(&cursor).unwrap() {
            found.push(next);
            // Advance past `next`.
            let mut bytes = *next.as_bytes();
            for i in (0..32).rev() {
                if bytes[i] != 0xFF {
                    bytes[i] += 1;
                    break;
                }
                bytes[i] = 0;
            }
            cursor = Hash256::from_bytes(bytes);
        }
        assert_eq!(found, keys);
    }

    #[test]
    fn v2_layout_changes_root_hash() {
        let mut v1 = ShaMap::new(MapType::State);
        let mut v2 = ShaMap::new_v2(MapType::State);
        for i in 0u8..8 {
            v1.add(item(&[i])).unwrap();
            v2.add(item(&[i])).unwrap();
        }
        assert_ne!(v1.get_hash(), v2.get_hash());
    }
}
