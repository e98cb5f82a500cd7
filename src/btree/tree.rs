//! # B-Tree Index File
//!
//! One index file holds one B-tree of fixed-size keys, each paired with a
//! 32-bit reference (normally a record number). Nodes are read and written
//! directly through the file handle cache on every access; there is no page
//! cache beyond what the operating system provides.
//!
//! ## File Layout
//!
//! ```text
//! node 0   header (64 bytes, padded to node_size)
//! node 1   root
//! node n   interior nodes, leaves, or free nodes on the delete chain
//! ```
//!
//! The byte offset of node `n` is `n * node_size`. An index whose root lies
//! beyond the end of the file is empty; deleting the last key truncates the
//! file back to the header node.
//!
//! ## Insertion
//!
//! ```text
//! 1. Descend from the root to the leaf position of the new key, recording
//!    the path. A unique index fails with Duplicate on a match; an index with
//!    duplicates descends to the position after the last equal key.
//! 2. Insert the tuple. If the node still fits, write it and stop.
//! 3. Otherwise split at order/2: the left half stays in place, the middle
//!    key moves up, the right half goes to a new node (from the delete chain
//!    when possible). Repeat step 2 in the parent with the middle key.
//! 4. When the root splits, its left half moves to a new node and the root
//!    becomes a single-key node over the two halves.
//! ```
//!
//! ## Traversal
//!
//! `first`/`last` descend along the outermost children. `next`/`prev` step
//! from the remembered path: inside a leaf they move one position, from an
//! interior key they descend into the adjacent subtree, and at a leaf
//! boundary they climb until an ancestor still has a key in that direction.
//! After a failed `find` the path marks where the probe would have been, so
//! `next` yields the smallest greater key and `prev` the greatest smaller one.
//!
//! ## Shared Mode
//!
//! When several processes use the same file, every operation re-reads the
//! header first. The header timestamp is bumped by every insertion and
//! deletion; if it changed since this handle was positioned, `next`/`prev`
//! find the remembered key again before stepping.
//!
//! ## Read Policy
//!
//! A short read of the root at end of file means the tree is empty. A short
//! read anywhere else is reported as corruption instead of being treated as
//! an empty node.

use std::cmp::Ordering;
use std::path::Path;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::debug;
use zerocopy::IntoBytes;

use super::cursor::{Cursor, PathEntry};
use super::node::{Node, NodeLayout};
use crate::config::{BTREE_HEADER_SIZE, DEFAULT_NODE_SIZE, MAX_TREE_DEPTH};
use crate::error::DbError;
use crate::keys::KeyComparator;
use crate::storage::{BTreeHeader, CachedFile, NodeAddr, RecordNo};

/// Parameters for opening an index file. `node_size` is only used when the
/// file is created; an existing file keeps the geometry in its header.
#[derive(Debug, Clone)]
pub struct BTreeConfig {
    pub key_size: usize,
    pub node_size: usize,
    pub comparator: KeyComparator,
    pub dups: bool,
    pub shared: bool,
}

impl BTreeConfig {
    pub fn new(key_size: usize, comparator: KeyComparator) -> Self {
        Self {
            key_size,
            node_size: DEFAULT_NODE_SIZE,
            comparator,
            dups: false,
            shared: false,
        }
    }

    pub fn node_size(mut self, node_size: usize) -> Self {
        self.node_size = node_size;
        self
    }

    pub fn dups(mut self, dups: bool) -> Self {
        self.dups = dups;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }
}

/// Shape of a tree as found by [`BTree::check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeShape {
    pub depth: usize,
    pub nodes: usize,
    pub keys: u64,
}

#[derive(Debug)]
pub struct BTree {
    pub(super) file: CachedFile,
    pub(super) header: BTreeHeader,
    pub(super) layout: NodeLayout,
    pub(super) comparator: KeyComparator,
    pub(super) dups: bool,
    pub(super) shared: bool,
    pub(super) cursor: Cursor,
}

impl BTree {
    /// Opens the index in `file`, initializing it when the file is empty.
    pub fn open(file: CachedFile, config: BTreeConfig) -> Result<Self> {
        let len = file.len()?;
        let (header, layout) = if len == 0 {
            let layout = NodeLayout::new(config.node_size, config.key_size)?;
            let header = BTreeHeader::new(
                layout.node_size() as u16,
                layout.key_size() as u16,
                layout.order() as u16,
                config.dups,
            );
            let mut image = vec![0u8; layout.node_size()];
            image[..BTREE_HEADER_SIZE].copy_from_slice(header.as_bytes());
            file.write_at(0, &image)?;
            debug!(
                path = %file.path().display(),
                order = layout.order(),
                dups = config.dups,
                "created index"
            );
            (header, layout)
        } else {
            let header = read_header(&file)?;
            ensure!(
                header.key_size() as usize == config.key_size,
                "index '{}' has {}-byte keys, expected {}",
                file.path().display(),
                header.key_size(),
                config.key_size
            );
            let layout = NodeLayout::new(header.node_size() as usize, config.key_size)?;
            ensure!(
                layout.order() == header.order() as usize,
                "index '{}' records order {} but its geometry gives {}",
                file.path().display(),
                header.order(),
                layout.order()
            );
            (header, layout)
        };

        Ok(Self {
            file,
            dups: header.dups(),
            header,
            layout,
            comparator: config.comparator,
            shared: config.shared,
            cursor: Cursor::new(config.key_size),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn key_size(&self) -> usize {
        self.layout.key_size()
    }

    pub fn order(&self) -> usize {
        self.layout.order()
    }

    pub fn allows_duplicates(&self) -> bool {
        self.dups
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    pub fn key_count(&mut self) -> Result<u32> {
        self.load_header()?;
        Ok(self.header.keys())
    }

    /// Number of levels; 0 for an empty tree.
    pub fn depth(&self) -> Result<usize> {
        let mut node = Node::new(self.layout);
        self.read_node(NodeAddr::ROOT, &mut node)?;
        if node.count() == 0 {
            return Ok(0);
        }
        let mut depth = 1;
        while !node.is_leaf() {
            ensure!(depth < MAX_TREE_DEPTH, "index deeper than {} levels", MAX_TREE_DEPTH);
            let child = node.child(0);
            self.read_node(child, &mut node)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Inserts `key` with `reference`. Fails with [`DbError::Duplicate`] if
    /// the key exists and duplicates are not allowed.
    pub fn add(&mut self, key: &[u8], reference: RecordNo) -> Result<()> {
        self.check_key(key)?;
        self.cursor.clear_current();
        self.load_header()?;

        let mut node = Node::new(self.layout);
        if self.dups {
            self.descend_after(key, &mut node)?;
        } else if self.descend(key, &mut node)? {
            return Err(DbError::Duplicate { key: None }.into());
        }

        let order = self.layout.order();
        let mut key_buf = key.to_vec();
        let mut reference = reference;
        let mut right = NodeAddr::NONE;
        let PathEntry { mut addr, mut pos } = self.top()?;

        loop {
            node.insert_tuple(pos, 1);
            node.set_key(pos, &key_buf);
            node.set_child(pos + 1, right);
            node.set_reference(pos, reference);

            let count = node.count();
            if count < order {
                node.set_count(count + 1);
                self.write_node(addr, &node)?;
                break;
            }

            let mid = order / 2;
            node.set_count(mid);
            self.write_node(addr, &node)?;

            key_buf.copy_from_slice(node.key(mid));
            reference = node.reference(mid);

            node.shift_left(mid + 1, order - mid);
            node.set_count(order - mid);
            right = self.allocate_node()?;
            self.write_node(right, &node)?;
            debug!(node = %addr, new = %right, "split node");

            self.cursor.pop();
            match self.cursor.top() {
                Some(parent) => {
                    addr = parent.addr;
                    pos = parent.pos;
                    self.read_node(addr, &mut node)?;
                }
                None => {
                    self.grow_root(&mut node, &key_buf, reference, right)?;
                    break;
                }
            }
        }

        self.header.set_keys(self.header.keys() + 1);
        self.header.set_timestamp(self.header.timestamp().wrapping_add(1));
        self.store_header()?;
        self.cursor.reset();
        Ok(())
    }

    /// The root has been split in place; move its left half out and make the
    /// root a one-key node over both halves.
    fn grow_root(
        &mut self,
        node: &mut Node,
        key: &[u8],
        reference: RecordNo,
        right: NodeAddr,
    ) -> Result<()> {
        self.read_node(NodeAddr::ROOT, node)?;
        let moved = self.allocate_node()?;
        self.write_node(moved, node)?;

        node.clear();
        node.set_key(0, key);
        node.set_reference(0, reference);
        node.set_child(0, moved);
        node.set_child(1, right);
        node.set_count(1);
        self.write_node(NodeAddr::ROOT, node)?;
        debug!(left = %moved, right = %right, "grew new root");
        Ok(())
    }

    /// Looks up `key` and makes it current. With duplicates, the first of the
    /// equal keys is found.
    pub fn find(&mut self, key: &[u8]) -> Result<RecordNo> {
        self.check_key(key)?;
        self.load_header()?;

        let mut node = Node::new(self.layout);
        if self.descend(key, &mut node)? {
            self.take_current(&node)
        } else {
            let hold = self.header.keys() > 0;
            self.cursor.set_hold(key, hold);
            Err(DbError::NotFound.into())
        }
    }

    /// The current key, or [`DbError::NoCurrent`].
    pub fn current_key(&self) -> Result<&[u8]> {
        self.cursor.key().ok_or_else(|| DbError::NoCurrent.into())
    }

    pub fn current_reference(&self) -> Result<RecordNo> {
        self.cursor.reference().ok_or_else(|| DbError::NoCurrent.into())
    }

    pub fn first(&mut self) -> Result<RecordNo> {
        self.cursor.reset();
        self.load_header()?;

        let mut node = Node::new(self.layout);
        self.read_node(NodeAddr::ROOT, &mut node)?;
        if node.count() == 0 {
            return Err(DbError::NotFound.into());
        }
        self.cursor.push(NodeAddr::ROOT, 0);
        let child = node.child(0);
        self.descend_leftmost(child, &mut node)?;
        self.take_current(&node)
    }

    pub fn last(&mut self) -> Result<RecordNo> {
        self.cursor.reset();
        self.load_header()?;

        let mut node = Node::new(self.layout);
        self.read_node(NodeAddr::ROOT, &mut node)?;
        let count = node.count();
        if count == 0 {
            return Err(DbError::NotFound.into());
        }
        self.cursor.push(NodeAddr::ROOT, count);
        let child = node.child(count);
        self.descend_rightmost(child, &mut node)?;
        self.step_top(-1)?;
        self.take_current(&node)
    }

    /// Moves to the next key in order. Without a current key this is
    /// [`first`](Self::first).
    pub fn next(&mut self) -> Result<RecordNo> {
        let mut node = Node::new(self.layout);
        if self.shared {
            self.synchronize(&mut node)?;
        }

        if self.cursor.is_hold() {
            self.reload_top(&mut node)?;
            while self.top()?.pos == node.count() && self.cursor.depth() > 1 {
                self.cursor.pop();
                self.reload_top(&mut node)?;
            }
            if self.top()?.pos >= node.count() {
                self.cursor.clear_current();
                return Err(DbError::NotFound.into());
            }
            return self.take_current(&node);
        }

        if !self.cursor.is_current() {
            return self.first();
        }

        self.reload_top(&mut node)?;
        if self.step_next(&mut node)? {
            self.take_current(&node)
        } else {
            self.cursor.clear_current();
            Err(DbError::NotFound.into())
        }
    }

    /// Moves to the previous key in order. Without a current key this is
    /// [`last`](Self::last).
    pub fn prev(&mut self) -> Result<RecordNo> {
        let mut node = Node::new(self.layout);
        if self.shared {
            self.synchronize(&mut node)?;
        }

        if self.cursor.is_hold() {
            self.reload_top(&mut node)?;
            while self.top()?.pos == 0 && self.cursor.depth() > 1 {
                self.cursor.pop();
                self.reload_top(&mut node)?;
            }
            if self.top()?.pos == 0 {
                self.cursor.clear_current();
                return Err(DbError::NotFound.into());
            }
            self.step_top(-1)?;
            return self.take_current(&node);
        }

        if !self.cursor.is_current() {
            return self.last();
        }

        self.reload_top(&mut node)?;
        if self.step_prev(&mut node)? {
            self.take_current(&node)
        } else {
            self.cursor.clear_current();
            Err(DbError::NotFound.into())
        }
    }

    /// Removes every key and shrinks the file to the header node.
    pub fn clear(&mut self) -> Result<()> {
        self.load_header()?;
        self.file.set_len(self.layout.node_size() as u64)?;
        self.header.set_first_deleted(NodeAddr::NONE);
        self.header.set_keys(0);
        self.header.set_timestamp(self.header.timestamp().wrapping_add(1));
        self.store_header()?;
        self.cursor.reset();
        debug!(path = %self.file.path().display(), "cleared index");
        Ok(())
    }

    /// Walks the whole tree and verifies node fill, key order and that all
    /// leaves sit at the same depth.
    pub fn check(&mut self) -> Result<TreeShape> {
        self.load_header()?;
        let mut shape = TreeShape::default();
        let mut node = Node::new(self.layout);
        self.read_node(NodeAddr::ROOT, &mut node)?;
        if node.count() == 0 {
            ensure!(node.is_leaf(), "empty root has children");
            return Ok(shape);
        }
        let mut leaf_depth = None;
        self.check_subtree(NodeAddr::ROOT, 1, None, None, &mut shape, &mut leaf_depth)?;
        shape.depth = leaf_depth.unwrap_or(0);
        ensure!(
            shape.keys == self.header.keys() as u64,
            "header counts {} keys, tree holds {}",
            self.header.keys(),
            shape.keys
        );
        Ok(shape)
    }

    fn check_subtree(
        &self,
        addr: NodeAddr,
        level: usize,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        shape: &mut TreeShape,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        ensure!(level <= MAX_TREE_DEPTH, "index deeper than {} levels", MAX_TREE_DEPTH);
        let mut node = Node::new(self.layout);
        self.read_node(addr, &mut node)?;
        let count = node.count();
        shape.nodes += 1;
        shape.keys += count as u64;

        ensure!(count <= self.layout.order(), "node {} holds {} keys", addr, count);
        if addr != NodeAddr::ROOT {
            ensure!(
                count >= self.layout.min_fill(),
                "node {} underfull: {} < {}",
                addr,
                count,
                self.layout.min_fill()
            );
        }

        let out_of_order = |ord: Ordering| {
            if self.dups {
                ord == Ordering::Greater
            } else {
                ord != Ordering::Less
            }
        };
        for i in 0..count {
            if i > 0 {
                let ord = self.comparator.compare(node.key(i - 1), node.key(i));
                ensure!(!out_of_order(ord), "keys {} and {} of node {} out of order", i - 1, i, addr);
            }
            if let Some(lower) = lower {
                let ord = self.comparator.compare(lower, node.key(i));
                ensure!(!out_of_order(ord), "key {} of node {} below its subtree bound", i, addr);
            }
            if let Some(upper) = upper {
                let ord = self.comparator.compare(node.key(i), upper);
                ensure!(!out_of_order(ord), "key {} of node {} above its subtree bound", i, addr);
            }
        }

        if node.is_leaf() {
            for i in 0..=count {
                ensure!(node.child(i).is_none(), "leaf {} has child pointer {}", addr, i);
            }
            match *leaf_depth {
                None => *leaf_depth = Some(level),
                Some(depth) => ensure!(depth == level, "leaf {} at depth {}, expected {}", addr, level, depth),
            }
            return Ok(());
        }

        for i in 0..=count {
            let child = node.child(i);
            ensure!(!child.is_none(), "interior node {} lacks child {}", addr, i);
            let lo = if i == 0 { lower } else { Some(node.key(i - 1)) };
            let hi = if i == count { upper } else { Some(node.key(i)) };
            self.check_subtree(child, level + 1, lo, hi, shape, leaf_depth)?;
        }
        Ok(())
    }

    // ---- searching ----

    /// Searches from the root, recording the path. Returns whether the key
    /// was found; on a miss the path ends at the leaf insertion position.
    pub(super) fn descend(&mut self, key: &[u8], node: &mut Node) -> Result<bool> {
        self.cursor.reset();
        let mut addr = NodeAddr::ROOT;
        loop {
            self.read_node(addr, node)?;
            let result = node.search(key, &self.comparator, self.dups);
            self.cursor.push(addr, result.index());
            if result.is_found() {
                if self.dups {
                    self.find_first_occurrence(key, node)?;
                }
                return Ok(true);
            }
            let child = node.child(result.index());
            if child.is_none() {
                return Ok(false);
            }
            self.check_depth()?;
            addr = child;
        }
    }

    /// Equal keys may continue into the subtree left of a match. Follow them
    /// down and settle on the deepest level that still holds the key.
    fn find_first_occurrence(&mut self, key: &[u8], node: &mut Node) -> Result<()> {
        let mut first_level = self.cursor.depth();
        let mut matched = true;
        while !node.is_leaf() {
            let child = node.child(self.top()?.pos);
            self.check_depth()?;
            self.read_node(child, node)?;
            let result = node.search(key, &self.comparator, true);
            self.cursor.push(child, result.index());
            matched = result.is_found();
            if matched {
                first_level = self.cursor.depth();
            }
        }
        if !matched {
            self.cursor.truncate(first_level);
            self.reload_top(node)?;
        }
        Ok(())
    }

    /// Descends to the leaf position just after the last key equal to `key`.
    fn descend_after(&mut self, key: &[u8], node: &mut Node) -> Result<()> {
        self.cursor.reset();
        let mut addr = NodeAddr::ROOT;
        loop {
            self.read_node(addr, node)?;
            let pos = node.upper_bound(key, &self.comparator);
            self.cursor.push(addr, pos);
            let child = node.child(pos);
            if child.is_none() {
                return Ok(());
            }
            self.check_depth()?;
            addr = child;
        }
    }

    pub(super) fn descend_leftmost(&mut self, mut addr: NodeAddr, node: &mut Node) -> Result<()> {
        while !addr.is_none() {
            self.check_depth()?;
            self.read_node(addr, node)?;
            self.cursor.push(addr, 0);
            addr = node.child(0);
        }
        Ok(())
    }

    fn descend_rightmost(&mut self, mut addr: NodeAddr, node: &mut Node) -> Result<()> {
        while !addr.is_none() {
            self.check_depth()?;
            self.read_node(addr, node)?;
            let count = node.count();
            self.cursor.push(addr, count);
            addr = node.child(count);
        }
        Ok(())
    }

    /// Steps the positioned cursor forward. `node` must hold the node at the
    /// top of the path and holds the node of the new position afterwards.
    pub(super) fn step_next(&mut self, node: &mut Node) -> Result<bool> {
        let top = self.top()?;
        if !node.is_leaf() {
            self.step_top(1)?;
            let child = node.child(top.pos + 1);
            self.descend_leftmost(child, node)?;
        } else if top.pos + 1 >= node.count() {
            if top.addr == NodeAddr::ROOT {
                return Ok(false);
            }
            loop {
                self.cursor.pop();
                self.reload_top(node)?;
                let up = self.top()?;
                if up.pos < node.count() || up.addr == NodeAddr::ROOT {
                    break;
                }
            }
            if self.top()?.pos >= node.count() {
                return Ok(false);
            }
        } else {
            self.step_top(1)?;
        }
        Ok(true)
    }

    fn step_prev(&mut self, node: &mut Node) -> Result<bool> {
        let top = self.top()?;
        if !node.is_leaf() {
            let child = node.child(top.pos);
            self.descend_rightmost(child, node)?;
        } else if top.pos == 0 {
            while self.top()?.pos == 0 && self.top()?.addr != NodeAddr::ROOT {
                self.cursor.pop();
                self.reload_top(node)?;
            }
            if self.top()?.pos == 0 {
                return Ok(false);
            }
        }
        self.step_top(-1)?;
        Ok(true)
    }

    /// Walks forward over keys equal to `key` until one carries `reference`.
    /// The cursor must be positioned on the first equal key.
    pub(super) fn seek_reference(
        &mut self,
        key: &[u8],
        reference: RecordNo,
        node: &mut Node,
    ) -> Result<bool> {
        loop {
            let pos = self.top()?.pos;
            if self.comparator.compare(key, node.key(pos)) != Ordering::Equal {
                return Ok(false);
            }
            if node.reference(pos) == reference {
                return Ok(true);
            }
            if !self.step_next(node)? {
                return Ok(false);
            }
        }
    }

    /// Re-positions on the remembered key if another process changed the
    /// tree since this handle was positioned.
    fn synchronize(&mut self, node: &mut Node) -> Result<()> {
        let before = self.header.timestamp();
        self.load_header()?;
        if before == self.header.timestamp() {
            return Ok(());
        }

        let was_current = self.cursor.is_current();
        if !was_current && !self.cursor.is_hold() {
            return Ok(());
        }
        let key = self.cursor.last_key().to_vec();
        let reference = self.cursor.last_reference();
        debug!(path = %self.file.path().display(), "index changed, re-finding position");

        if !self.descend(&key, node)? {
            let hold = self.header.keys() > 0;
            self.cursor.set_hold(&key, hold);
            return Ok(());
        }
        if self.dups && was_current && !self.seek_reference(&key, reference, node)? {
            self.descend(&key, node)?;
        }
        self.take_current(node)?;
        Ok(())
    }

    // ---- cursor helpers ----

    pub(super) fn top(&self) -> Result<PathEntry> {
        self.cursor
            .top()
            .ok_or_else(|| eyre!("index cursor is not positioned"))
    }

    fn step_top(&mut self, delta: isize) -> Result<()> {
        let top = self
            .cursor
            .top_mut()
            .ok_or_else(|| eyre!("index cursor is not positioned"))?;
        top.pos = top
            .pos
            .checked_add_signed(delta)
            .ok_or_else(|| eyre!("cursor position underflow"))?;
        Ok(())
    }

    pub(super) fn reload_top(&self, node: &mut Node) -> Result<()> {
        let top = self.top()?;
        self.read_node(top.addr, node)
    }

    fn take_current(&mut self, node: &Node) -> Result<RecordNo> {
        let pos = self.top()?.pos;
        let reference = node.reference(pos);
        self.cursor.set_current(node.key(pos), reference);
        Ok(reference)
    }

    fn check_depth(&self) -> Result<()> {
        ensure!(
            self.cursor.depth() < MAX_TREE_DEPTH,
            "index '{}' deeper than {} levels",
            self.file.path().display(),
            MAX_TREE_DEPTH
        );
        Ok(())
    }

    pub(super) fn check_key(&self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.layout.key_size(),
            "key of {} bytes given to an index of {}-byte keys",
            key.len(),
            self.layout.key_size()
        );
        Ok(())
    }

    // ---- node and header I/O ----

    pub(super) fn read_node(&self, addr: NodeAddr, node: &mut Node) -> Result<()> {
        let size = self.layout.node_size();
        node.clear();
        let read = self.file.read_at(addr.offset(size), node.disk_image_mut())?;
        if read == size || (read == 0 && addr == NodeAddr::ROOT) {
            return Ok(());
        }
        bail!(
            "short read of node {} in '{}': {} of {} bytes",
            addr,
            self.file.path().display(),
            read,
            size
        )
    }

    pub(super) fn write_node(&self, addr: NodeAddr, node: &Node) -> Result<()> {
        self.file
            .write_at(addr.offset(self.layout.node_size()), node.as_bytes())
            .wrap_err_with(|| format!("failed to write node {}", addr))
    }

    /// Takes a node from the delete chain, or the next node past the end of
    /// the file.
    pub(super) fn allocate_node(&mut self) -> Result<NodeAddr> {
        let size = self.layout.node_size();
        let free = self.header.first_deleted();
        if !free.is_none() {
            let mut next = [0u8; 4];
            if !self.file.read_exact_at(free.offset(size), &mut next)? {
                bail!("delete chain of '{}' points past the end of file", self.file.path().display());
            }
            self.header.set_first_deleted(NodeAddr::new(u32::from_le_bytes(next)));
            debug!(node = %free, "reusing deleted node");
            return Ok(free);
        }
        let len = self.file.len()?;
        let addr = len.div_ceil(size as u64);
        let addr = u32::try_from(addr).map_err(|_| eyre!("index file too large"))?;
        Ok(NodeAddr::new(addr.max(NodeAddr::ROOT.get() + 1)))
    }

    /// Pushes `addr` onto the delete chain.
    pub(super) fn free_node(&mut self, addr: NodeAddr) -> Result<()> {
        let link = self.header.first_deleted().get().to_le_bytes();
        self.file.write_at(addr.offset(self.layout.node_size()), &link)?;
        self.header.set_first_deleted(addr);
        Ok(())
    }

    /// Refreshes the header from disk when other processes may write it.
    pub(super) fn load_header(&mut self) -> Result<()> {
        if self.shared {
            self.header = read_header(&self.file)?;
        }
        Ok(())
    }

    pub(super) fn store_header(&self) -> Result<()> {
        self.file.write_at(0, self.header.as_bytes())
    }
}

fn read_header(file: &CachedFile) -> Result<BTreeHeader> {
    let mut raw = [0u8; BTREE_HEADER_SIZE];
    if !file.read_exact_at(0, &mut raw)? {
        bail!("'{}' is too short to hold an index header", file.path().display());
    }
    BTreeHeader::from_bytes(&raw)
        .wrap_err_with(|| format!("invalid index header in '{}'", file.path().display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultExt;
    use crate::keys::FieldType;
    use crate::storage::{FileKind, HandleCache};
    use tempfile::tempdir;

    fn int_key(v: i32) -> [u8; 4] {
        v.to_le_bytes()
    }

    fn open_tree(dir: &Path, dups: bool) -> BTree {
        let cache = HandleCache::new(8).unwrap();
        let file = cache.register(dir.join("t.key"), FileKind::Index, false).unwrap();
        let config = BTreeConfig::new(4, KeyComparator::Basic(FieldType::Int)).dups(dups);
        BTree::open(file, config).unwrap()
    }

    #[test]
    fn empty_tree_reports_not_found() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);

        assert_eq!(tree.first().db_error(), Some(DbError::NotFound));
        assert_eq!(tree.last().db_error(), Some(DbError::NotFound));
        assert_eq!(tree.find(&int_key(1)).db_error(), Some(DbError::NotFound));
        assert_eq!(tree.next().db_error(), Some(DbError::NotFound));
        assert_eq!(tree.depth().unwrap(), 0);
        assert_eq!(tree.current_key().db_error(), Some(DbError::NoCurrent));
    }

    #[test]
    fn add_then_find_returns_reference() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);

        tree.add(&int_key(7), RecordNo::new(70)).unwrap();

        assert_eq!(tree.find(&int_key(7)).unwrap(), RecordNo::new(70));
        assert_eq!(tree.current_key().unwrap(), &int_key(7));
        assert_eq!(tree.key_count().unwrap(), 1);
    }

    #[test]
    fn unique_index_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);
        tree.add(&int_key(7), RecordNo::new(1)).unwrap();

        let result = tree.add(&int_key(7), RecordNo::new(2));

        assert_eq!(result.db_error(), Some(DbError::Duplicate { key: None }));
        assert_eq!(tree.key_count().unwrap(), 1);
    }

    #[test]
    fn splits_keep_tree_balanced_and_sorted() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);
        for i in (0..500).rev() {
            tree.add(&int_key(i), RecordNo::new(i as u32 + 1)).unwrap();
        }

        let shape = tree.check().unwrap();

        assert_eq!(shape.keys, 500);
        assert!(shape.depth >= 2);
        let mut seen = vec![tree.first().unwrap()];
        while let Some(r) = tree.next().optional().unwrap() {
            seen.push(r);
        }
        let expected: Vec<_> = (1..=500).map(RecordNo::new).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn prev_walks_backwards() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);
        for i in 0..200 {
            tree.add(&int_key(i), RecordNo::new(i as u32 + 1)).unwrap();
        }

        let mut seen = vec![tree.last().unwrap()];
        while let Some(r) = tree.prev().optional().unwrap() {
            seen.push(r);
        }

        let expected: Vec<_> = (1..=200).rev().map(RecordNo::new).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn failed_find_resumes_at_neighbours() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);
        for i in 0..300 {
            tree.add(&int_key(i * 2), RecordNo::new(i as u32 * 2)).unwrap();
        }

        for probe in [-1, 1, 83, 85, 301, 597] {
            assert!(tree.find(&int_key(probe)).is_err());
            let next = tree.next().optional().unwrap();
            let expected = (probe + 1).max(0);
            let expected = expected + expected % 2;
            assert_eq!(next, (expected < 600).then(|| RecordNo::new(expected as u32)));

            assert!(tree.find(&int_key(probe)).is_err());
            let prev = tree.prev().optional().unwrap();
            let expected = probe - 1 - (probe - 1).rem_euclid(2);
            assert_eq!(prev, (expected >= 0).then(|| RecordNo::new(expected as u32)));
        }
    }

    #[test]
    fn duplicates_traverse_in_insertion_order() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), true);
        for i in 0..100 {
            tree.add(&int_key(i % 3), RecordNo::new(i as u32 + 1)).unwrap();
        }

        tree.check().unwrap();
        assert_eq!(tree.find(&int_key(1)).unwrap(), RecordNo::new(2));
        let mut refs = vec![RecordNo::new(2)];
        while let Ok(r) = tree.next() {
            if tree.current_key().unwrap() != int_key(1) {
                break;
            }
            refs.push(r);
        }
        let expected: Vec<_> = (0..100).filter(|i| i % 3 == 1).map(|i| RecordNo::new(i + 1)).collect();
        assert_eq!(refs, expected);
    }

    #[test]
    fn clear_truncates_to_header() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path(), false);
        for i in 0..100 {
            tree.add(&int_key(i), RecordNo::new(1)).unwrap();
        }

        tree.clear().unwrap();

        assert_eq!(tree.key_count().unwrap(), 0);
        assert_eq!(tree.file.len().unwrap(), 512);
        assert_eq!(tree.first().db_error(), Some(DbError::NotFound));
        tree.add(&int_key(1), RecordNo::new(1)).unwrap();
        assert_eq!(tree.first().unwrap(), RecordNo::new(1));
    }

    #[test]
    fn reopen_keeps_contents_and_checks_key_size() {
        let dir = tempdir().unwrap();
        {
            let mut tree = open_tree(dir.path(), false);
            for i in 0..100 {
                tree.add(&int_key(i), RecordNo::new(i as u32)).unwrap();
            }
        }

        let mut tree = open_tree(dir.path(), false);
        assert_eq!(tree.find(&int_key(64)).unwrap(), RecordNo::new(64));

        let cache = HandleCache::new(4).unwrap();
        let file = cache.register(dir.path().join("t.key"), FileKind::Index, false).unwrap();
        let config = BTreeConfig::new(8, KeyComparator::Basic(FieldType::Long));
        assert!(BTree::open(file, config).is_err());
    }

    #[test]
    fn corrupted_magic_is_a_version_mismatch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("t.key"), vec![0xAB; 512]).unwrap();
        let cache = HandleCache::new(4).unwrap();
        let file = cache.register(dir.path().join("t.key"), FileKind::Index, false).unwrap();

        let result = BTree::open(file, BTreeConfig::new(4, KeyComparator::Basic(FieldType::Int)));

        assert!(matches!(result.db_error(), Some(DbError::VersionMismatch { .. })));
    }
}
