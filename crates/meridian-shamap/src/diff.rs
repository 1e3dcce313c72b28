use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::Hash256;

use crate::item::ShaMapItem;
use crate::map::ShaMap;
use crate::node::{Slot, TreeNode};
use crate::ShaMapError;

/// Leaf-level difference between two maps: key → (ours, theirs). `None` on
/// one side means the key is absent there.
#[derive(Debug, Default)]
pub struct MapDelta {
    pub items: BTreeMap<Hash256, (Option<Arc<ShaMapItem>>, Option<Arc<ShaMapItem>>)>,
}

impl MapDelta {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys present only in the other map.
    pub fn added(&self) -> impl Iterator<Item = (&Hash256, &Arc<ShaMapItem>)> {
        self.items
            .iter()
            .filter_map(|(k, (ours, theirs))| match (ours, theirs) {
                (None, Some(t)) => Some((k, t)),
                _ => None,
            })
    }

    /// Keys present only in this map.
    pub fn removed(&self) -> impl Iterator<Item = (&Hash256, &Arc<ShaMapItem>)> {
        self.items
            .iter()
            .filter_map(|(k, (ours, theirs))| match (ours, theirs) {
                (Some(o), None) => Some((k, o)),
                _ => None,
            })
    }

    /// Keys present in both with different payloads.
    pub fn changed(
        &self,
    ) -> impl Iterator<Item = (&Hash256, (&Arc<ShaMapItem>, &Arc<ShaMapItem>))> {
        self.items
            .iter()
            .filter_map(|(k, (ours, theirs))| match (ours, theirs) {
                (Some(o), Some(t)) => Some((k, (o, t))),
                _ => None,
            })
    }
}

impl ShaMap {
    /// Compute the leaf delta against `other`, pruning identical subtrees by
    /// node hash. Returns `None` once the delta exceeds `max_diff` entries.
    pub fn compare(
        &self,
        other: &ShaMap,
        max_diff: usize,
    ) -> Result<Option<MapDelta>, ShaMapError> {
        let mut delta = MapDelta::default();
        if self.hash() == other.hash() {
            return Ok(Some(delta));
        }
        if !self.diff_node(other, self.root(), other.root(), 0, max_diff, &mut delta)? {
            return Ok(None);
        }
        Ok(Some(delta))
    }

    /// Returns false once the budget is exhausted.
    fn diff_node(
        &self,
        other: &ShaMap,
        ours: &Arc<TreeNode>,
        theirs: &Arc<TreeNode>,
        depth: u8,
        max_diff: usize,
        delta: &mut MapDelta,
    ) -> Result<bool, ShaMapError> {
        if ours.compute_hash(depth, self.is_v2()) == theirs.compute_hash(depth, other.is_v2()) {
            return Ok(true);
        }
        match (&**ours, &**theirs) {
            (TreeNode::Leaf { item: a, .. }, TreeNode::Leaf { item: b, .. }) => {
                if a.key() == b.key() {
                    delta.items.insert(a.key(), (Some(a.clone()), Some(b.clone())));
                } else {
                    delta.items.insert(a.key(), (Some(a.clone()), None));
                    delta.items.insert(b.key(), (None, Some(b.clone())));
                }
                Ok(delta.len() <= max_diff)
            }
            (TreeNode::Leaf { .. }, TreeNode::Inner { .. }) => {
                // Everything under their inner is a candidate; our lone leaf
                // may also be absent there.
                self.diff_one_sided(other, theirs, depth, false, max_diff, delta)?;
                if let TreeNode::Leaf { item, .. } = &**ours {
                    match delta.items.get_mut(&item.key()) {
                        Some(entry) => entry.0 = Some(item.clone()),
                        None => {
                            delta.items.insert(item.key(), (Some(item.clone()), None));
                        }
                    }
                }
                Ok(delta.len() <= max_diff)
            }
            (TreeNode::Inner { .. }, TreeNode::Leaf { .. }) => {
                self.diff_one_sided(other, ours, depth, true, max_diff, delta)?;
                if let TreeNode::Leaf { item, .. } = &**theirs {
                    match delta.items.get_mut(&item.key()) {
                        Some(entry) => entry.1 = Some(item.clone()),
                        None => {
                            delta.items.insert(item.key(), (None, Some(item.clone())));
                        }
                    }
                }
                Ok(delta.len() <= max_diff)
            }
            (TreeNode::Inner { .. }, TreeNode::Inner { .. }) => {
                for branch in 0..16usize {
                    let our_child = self.resolve_child(ours, branch, depth)?;
                    let their_child = other.resolve_child(theirs, branch, depth)?;
                    let keep = match (our_child, their_child) {
                        (None, None) => true,
                        (Some(o), None) => {
                            self.diff_one_sided(other, &o, depth + 1, true, max_diff, delta)?
                        }
                        (None, Some(t)) => {
                            self.diff_one_sided(other, &t, depth + 1, false, max_diff, delta)?
                        }
                        (Some(o), Some(t)) => {
                            self.diff_node(other, &o, &t, depth + 1, max_diff, delta)?
                        }
                    };
                    if !keep {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Record every leaf under `node` as present only on one side.
    fn diff_one_sided(
        &self,
        other: &ShaMap,
        node: &Arc<TreeNode>,
        depth: u8,
        ours_side: bool,
        max_diff: usize,
        delta: &mut MapDelta,
    ) -> Result<bool, ShaMapError> {
        let map = if ours_side { self } else { other };
        let mut ok = true;
        map.walk_from(node, depth, &mut |n| {
            if let TreeNode::Leaf { item, .. } = n {
                let entry = delta.items.entry(item.key()).or_insert((None, None));
                if ours_side {
                    entry.0 = Some(item.clone());
                } else {
                    entry.1 = Some(item.clone());
                }
                if delta.len() > max_diff {
                    ok = false;
                }
            }
            Ok(())
        })?;
        Ok(ok)
    }

    fn resolve_child(
        &self,
        node: &Arc<TreeNode>,
        branch: usize,
        depth: u8,
    ) -> Result<Option<Arc<TreeNode>>, ShaMapError> {
        let TreeNode::Inner { slots, .. } = &**node else {
            return Ok(None);
        };
        Ok(match &slots[branch] {
            Slot::Empty => None,
            Slot::Node(child) => Some(child.clone()),
            Slot::Hash(h) => Some(Arc::new(self.fetch_node(h, depth + 1)?)),
        })
    }

    /// Depth-first walk from an arbitrary node (used by the differ).
    pub(crate) fn walk_from(
        &self,
        node: &Arc<TreeNode>,
        depth: u8,
        f: &mut dyn FnMut(&TreeNode) -> Result<(), ShaMapError>,
    ) -> Result<(), ShaMapError> {
        f(node)?;
        if let TreeNode::Inner { slots, .. } = &**node {
            for slot in slots.iter() {
                match slot {
                    Slot::Empty => {}
                    Slot::Node(child) => self.walk_from(child, depth + 1, f)?,
                    Slot::Hash(h) => {
                        let child = Arc::new(self.fetch_node(h, depth + 1)?);
                        self.walk_from(&child, depth + 1, f)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapType;

    fn key(b: u8) -> Hash256 {
        Hash256::from_bytes([b; 32])
    }

    fn build(keys: &[(u8, u8)]) -> ShaMap {
        let mut map = ShaMap::new(MapType::Transaction);
        for (k, v) in keys {
            map.add(ShaMapItem::new(key(*k), vec![*v])).unwrap();
        }
        map.get_hash();
        map
    }

    #[test]
    fn identical_maps_have_empty_delta() {
        let a = build(&[(1, 1), (2, 2), (3, 3)]);
        let b = build(&[(1, 1), (2, 2), (3, 3)]);
        let delta = a.compare(&b, 100).unwrap().unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn detects_added_removed_changed() {
        let a = build(&[(1, 1), (2, 2), (3, 3)]);
        let b = build(&[(2, 2), (3, 9), (4, 4)]);
        let delta = a.compare(&b, 100).unwrap().unwrap();
        let added: Vec<_> = delta.added().map(|(k, _)| *k).collect();
        let removed: Vec<_> = delta.removed().map(|(k, _)| *k).collect();
        let changed: Vec<_> = delta.changed().map(|(k, _)| *k).collect();
        assert_eq!(added, vec![key(4)]);
        assert_eq!(removed, vec![key(1)]);
        assert_eq!(changed, vec![key(3)]);
    }

    #[test]
    fn budget_exhaustion_returns_none() {
        let a = build(&[]);
        let b = build(&[(1, 1), (2, 2), (3, 3), (4, 4)]);
        assert!(a.compare(&b, 2).unwrap().is_none());
        assert!(a.compare(&b, 4).unwrap().is_some());
    }
}
