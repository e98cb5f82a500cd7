//! # Key Deletion
//!
//! Deletion always removes a tuple from a leaf. A key found in an interior
//! node is first overwritten by its successor, the leftmost key of the
//! subtree to its right, and that successor is then removed from its leaf.
//!
//! ## Rebalancing
//!
//! A non-root node left with fewer than `order / 2` keys borrows from or
//! merges with a sibling under the same parent. The right sibling is
//! preferred; the left one is used only for the last child.
//!
//! ```text
//! Rotation (sibling has more than order/2 keys):
//!
//!         [ .. P .. ]                 [ .. S0 .. ]
//!         /        \        =>        /         \
//!   [a b]      [S0 S1 S2]         [a b P]     [S1 S2]
//!
//! Merge (sibling has exactly order/2 keys):
//!
//!         [ .. P .. ]                 [ .. .. ]
//!         /        \        =>            |
//!   [a b]        [S0 S1]           [a b P S0 S1]
//! ```
//!
//! A merge removes the separator from the parent, so the parent may in turn
//! underflow and the loop continues one level up. The merged node is written
//! at the address of the surviving sibling (the right one when merging with
//! a right sibling) and the other address goes onto the delete chain. When a
//! merge empties the root, the merged node becomes the new root and the tree
//! loses a level.
//!
//! ## Duplicates
//!
//! With duplicate keys the reference identifies which of the equal keys to
//! remove; the search starts at the first equal key and walks forward.

use eyre::{ensure, eyre, Result};
use tracing::debug;

use super::node::Node;
use super::tree::BTree;
use crate::error::DbError;
use crate::storage::{NodeAddr, RecordNo};

impl BTree {
    /// Removes `key`. For an index with duplicates, `reference` selects which
    /// entry to remove; otherwise it is ignored.
    pub fn delete(&mut self, key: &[u8], reference: RecordNo) -> Result<()> {
        self.check_key(key)?;
        self.cursor.clear_current();
        self.load_header()?;

        let mut node = Node::new(self.layout);
        if !self.descend(key, &mut node)? {
            return Err(DbError::NotFound.into());
        }
        if self.dups && !self.seek_reference(key, reference, &mut node)? {
            self.cursor.reset();
            return Err(DbError::NotFound.into());
        }

        let top = self.top()?;
        let (mut addr, pos) = if node.is_leaf() {
            (top.addr, top.pos)
        } else {
            self.replace_with_successor(&mut node, top.addr, top.pos)?
        };

        node.delete_tuple(pos);
        node.set_count(node.count() - 1);

        let min = self.layout.min_fill();
        let mut parent = Node::new(self.layout);
        let mut sibling = Node::new(self.layout);

        while node.count() < min && addr != NodeAddr::ROOT {
            let entry = self
                .cursor
                .ancestor(1)
                .ok_or_else(|| eyre!("node {} has no parent on the path", addr))?;
            let z = entry.addr;
            let mut zi = entry.pos;
            self.read_node(z, &mut parent)?;

            let from_right = zi < parent.count();
            let y = if from_right {
                parent.child(zi + 1)
            } else {
                ensure!(zi > 0, "node {} has no sibling under {}", addr, z);
                zi -= 1;
                parent.child(zi)
            };
            ensure!(!y.is_none(), "missing sibling of node {} under {}", addr, z);
            self.read_node(y, &mut sibling)?;

            if sibling.count() > min {
                rotate(&mut node, &mut parent, zi, &mut sibling, from_right);
                self.write_node(y, &sibling)?;
                self.write_node(z, &parent)?;
                debug!(node = %addr, sibling = %y, "rotated key through parent");
                break;
            }

            let survivor = merge(&mut node, &mut parent, zi, &sibling, from_right);
            let (survivor, freed) = if survivor { (y, addr) } else { (addr, y) };
            self.free_node(freed)?;
            self.write_node(survivor, &node)?;
            debug!(into = %survivor, freed = %freed, "merged siblings");

            if z == NodeAddr::ROOT && parent.count() == 0 {
                self.free_node(survivor)?;
                addr = NodeAddr::ROOT;
                debug!("tree shrank by one level");
            } else {
                node.copy_from(&parent);
                addr = z;
                self.cursor.pop();
            }
        }

        self.header.set_keys(self.header.keys().saturating_sub(1));
        if node.count() == 0 {
            self.file.set_len(self.layout.node_size() as u64)?;
            self.header.set_first_deleted(NodeAddr::NONE);
            self.header.set_keys(0);
        } else {
            self.write_node(addr, &node)?;
        }
        self.header.set_timestamp(self.header.timestamp().wrapping_add(1));
        self.store_header()?;
        self.cursor.reset();
        Ok(())
    }

    /// Overwrites `node[pos]` with the leftmost key of the subtree right of
    /// it and leaves that subtree's leftmost leaf in `node`.
    fn replace_with_successor(
        &mut self,
        node: &mut Node,
        addr: NodeAddr,
        pos: usize,
    ) -> Result<(NodeAddr, usize)> {
        if let Some(top) = self.cursor.top_mut() {
            top.pos += 1;
        }
        let mut leaf = Node::new(self.layout);
        self.descend_leftmost(node.child(pos + 1), &mut leaf)?;
        let leaf_addr = self.top()?.addr;

        node.copy_key_from(pos, &leaf, 0);
        self.write_node(addr, node)?;
        node.copy_from(&leaf);
        Ok((leaf_addr, 0))
    }
}

/// Moves the separator `parent[zi]` down into `node` and the nearest key of
/// `sibling` up into its place.
fn rotate(node: &mut Node, parent: &mut Node, zi: usize, sibling: &mut Node, from_right: bool) {
    let n = node.count();
    let yn = sibling.count();
    if from_right {
        node.copy_key_from(n, parent, zi);
        node.set_child(n + 1, sibling.child(0));
        parent.copy_key_from(zi, sibling, 0);
        sibling.delete_tuple(0);
    } else {
        node.insert_tuple(0, 1);
        node.copy_key_from(0, parent, zi);
        node.set_child(0, sibling.child(yn));
        parent.copy_key_from(zi, sibling, yn - 1);
    }
    sibling.set_count(yn - 1);
    node.set_count(n + 1);
}

/// Folds `sibling` and the separator `parent[zi]` into `node` and drops the
/// separator from `parent`. Returns true when the merged node belongs at the
/// sibling's address (the sibling was on the right).
fn merge(node: &mut Node, parent: &mut Node, zi: usize, sibling: &Node, from_right: bool) -> bool {
    let n = node.count();
    let yn = sibling.count();
    if from_right {
        node.copy_key_from(n, parent, zi);
        node.copy_tuples_from(n + 1, sibling, 0, yn);
        node.set_child(n + 1 + yn, sibling.child(yn));
    } else {
        node.insert_tuple(0, yn + 1);
        node.copy_key_from(yn, parent, zi);
        node.copy_tuples_from(0, sibling, 0, yn);
        node.set_child(yn, sibling.child(yn));
    }
    parent.delete_tuple(zi);
    parent.set_count(parent.count() - 1);
    node.set_count(n + 1 + yn);
    from_right
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::btree::{BTreeConfig, TreeShape};
    use crate::error::ResultExt;
    use crate::keys::{FieldType, KeyComparator};
    use crate::storage::{FileKind, HandleCache};
    use tempfile::tempdir;

    fn int_key(v: i32) -> [u8; 4] {
        v.to_le_bytes()
    }

    fn open_tree(dir: &Path, node_size: usize, dups: bool) -> BTree {
        let cache = HandleCache::new(8).unwrap();
        let file = cache.register(dir.join("d.key"), FileKind::Index, false).unwrap();
        let config = BTreeConfig::new(4, KeyComparator::Basic(FieldType::Int))
            .node_size(node_size)
            .dups(dups);
        BTree::open(file, config).unwrap()
    }

    fn collect(tree: &mut BTree) -> Vec<u32> {
        let mut out = Vec::new();
        let mut next = tree.first().optional().unwrap();
        while let Some(r) = next {
            out.push(r.get());
            next = tree.next().optional().unwrap();
        }
        out
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), 512, false);
        tree.add(&int_key(1), RecordNo::new(1)).unwrap();

        let result = tree.delete(&int_key(2), RecordNo::NONE);

        assert_eq!(result.db_error(), Some(DbError::NotFound));
    }

    #[test]
    fn add_delete_find_round_trip() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), 512, false);
        tree.add(&int_key(5), RecordNo::new(50)).unwrap();

        tree.delete(&int_key(5), RecordNo::new(50)).unwrap();

        assert_eq!(tree.find(&int_key(5)).db_error(), Some(DbError::NotFound));
        assert_eq!(tree.key_count().unwrap(), 0);
    }

    #[test]
    fn deleting_everything_truncates_the_file() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), 64, false);
        for i in 0..200 {
            tree.add(&int_key(i), RecordNo::new(i as u32)).unwrap();
        }
        assert!(tree.depth().unwrap() >= 3);

        for i in 0..200 {
            tree.delete(&int_key(i), RecordNo::NONE).unwrap();
            if i % 17 == 0 {
                tree.check().unwrap();
            }
        }

        assert_eq!(tree.check().unwrap(), TreeShape::default());
        assert_eq!(tree.file.len().unwrap(), 64);
        assert_eq!(tree.header.first_deleted(), NodeAddr::NONE);
    }

    #[test]
    fn interleaved_deletes_keep_balance_and_order() {
        let dir = tempdir().unwrap();
        // order 4 forces rotations and merges at every level
        let mut tree = open_tree(dir.path(), 64, false);
        let n = 400;
        for i in 0..n {
            let k = (i * 37) % n;
            tree.add(&int_key(k), RecordNo::new(k as u32)).unwrap();
        }

        for i in 0..n {
            let k = (i * 101) % n;
            if k % 3 != 0 {
                tree.delete(&int_key(k), RecordNo::NONE).unwrap();
            }
        }

        let shape = tree.check().unwrap();
        let expected: Vec<u32> = (0..n as u32).filter(|k| k % 3 == 0).collect();
        assert_eq!(shape.keys, expected.len() as u64);
        assert_eq!(collect(&mut tree), expected);
    }

    #[test]
    fn freed_nodes_are_reused() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), 64, false);
        for i in 0..300 {
            tree.add(&int_key(i), RecordNo::new(i as u32)).unwrap();
        }
        let full_len = tree.file.len().unwrap();
        for i in 0..250 {
            tree.delete(&int_key(i), RecordNo::NONE).unwrap();
        }
        assert!(!tree.header.first_deleted().is_none());

        for i in 0..20 {
            tree.add(&int_key(i), RecordNo::new(i as u32)).unwrap();
        }

        tree.check().unwrap();
        assert_eq!(tree.file.len().unwrap(), full_len);
    }

    #[test]
    fn duplicates_are_deleted_by_reference() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), 64, true);
        for r in 1..=60u32 {
            tree.add(&int_key(7), RecordNo::new(r)).unwrap();
        }

        tree.delete(&int_key(7), RecordNo::new(31)).unwrap();
        tree.delete(&int_key(7), RecordNo::new(1)).unwrap();
        tree.delete(&int_key(7), RecordNo::new(60)).unwrap();

        assert_eq!(
            tree.delete(&int_key(7), RecordNo::new(31)).db_error(),
            Some(DbError::NotFound)
        );
        tree.check().unwrap();
        let expected: Vec<u32> = (2..60).filter(|&r| r != 31).collect();
        assert_eq!(collect(&mut tree), expected);
    }
}
