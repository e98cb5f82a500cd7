//! # B-Tree Node Codec
//!
//! A node is a fixed-size byte buffer holding a sorted array of tuples. Every
//! tuple is a (child, key, reference) triple and the array carries one extra
//! trailing child pointer, so a node with `count` keys has `count + 1` child
//! slots.
//!
//! ## Node Layout
//!
//! ```text
//! Offset                      Size       Field
//! 0                           2          count (u16, little-endian)
//! 2 + tsize*i                 4          child(i)
//! 6 + tsize*i                 key_size   key(i)
//! 6 + tsize*i + key_size      4          reference(i)
//! 2 + tsize*count             4          child(count), the rightmost child
//! ```
//!
//! where `tsize = 4 + key_size + 4`. Child slots exist in leaf nodes too and
//! hold 0 there, which is also how a leaf is recognized.
//!
//! ## Order
//!
//! The order is the maximum number of tuples a node holds on disk:
//!
//! ```text
//! order = ((node_size - 6) / tsize) rounded down to even
//! ```
//!
//! With `node_size = 512` and a 4-byte key this gives `506 / 12 = 42`.
//!
//! ## Overflow Slot
//!
//! The in-memory buffer is one tuple larger than the on-disk node. Insertion
//! into a full node first places the new tuple (the node briefly holds
//! `order + 1` tuples) and then splits, so only the first `node_size` bytes
//! are ever written back.
//!
//! ## Free Nodes
//!
//! A node on the delete chain reuses its first four bytes as the address of
//! the next free node; see [`Node::next_free`].
//!
//! Index arguments are never checked at runtime beyond slice bounds: an
//! out-of-range index is a bug in the caller, not a data error.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::config::{
    MAX_KEY_SIZE, MIN_NODE_SIZE, NODE_ADDR_SIZE, NODE_COUNT_SIZE, NODE_REF_SIZE,
};
use crate::keys::KeyComparator;
use crate::storage::{NodeAddr, RecordNo};

/// Result of a binary search within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Key found at this index (the leftmost equal key when duplicates are
    /// allowed).
    Found(usize),
    /// Key absent; this is the index of the first greater key, which is also
    /// the child slot to descend into.
    NotFound(usize),
}

impl SearchResult {
    pub fn index(self) -> usize {
        match self {
            SearchResult::Found(i) | SearchResult::NotFound(i) => i,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, SearchResult::Found(_))
    }
}

/// Geometry shared by every node of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    node_size: usize,
    key_size: usize,
    tuple_size: usize,
    order: usize,
}

impl NodeLayout {
    pub fn new(node_size: usize, key_size: usize) -> Result<Self> {
        ensure!(
            (1..=MAX_KEY_SIZE).contains(&key_size),
            "key size {} outside 1..={}",
            key_size,
            MAX_KEY_SIZE
        );
        ensure!(
            node_size >= MIN_NODE_SIZE && node_size <= u16::MAX as usize,
            "node size {} outside {}..={}",
            node_size,
            MIN_NODE_SIZE,
            u16::MAX
        );

        let tuple_size = NODE_ADDR_SIZE + key_size + NODE_REF_SIZE;
        let overhead = NODE_COUNT_SIZE + NODE_ADDR_SIZE;
        let order = ((node_size - overhead) / tuple_size) & !1;
        ensure!(
            order >= 2,
            "node size {} too small for {}-byte keys (order {})",
            node_size,
            key_size,
            order
        );

        Ok(Self {
            node_size,
            key_size,
            tuple_size,
            order,
        })
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Fewest tuples a non-root node may hold.
    pub fn min_fill(&self) -> usize {
        self.order / 2
    }

    #[inline]
    fn child_offset(&self, i: usize) -> usize {
        NODE_COUNT_SIZE + self.tuple_size * i
    }

    #[inline]
    fn key_offset(&self, i: usize) -> usize {
        NODE_COUNT_SIZE + NODE_ADDR_SIZE + self.tuple_size * i
    }

    #[inline]
    fn ref_offset(&self, i: usize) -> usize {
        self.key_offset(i) + self.key_size
    }
}

/// An owned node buffer.
#[derive(Debug, Clone)]
pub struct Node {
    layout: NodeLayout,
    buf: Vec<u8>,
}

impl Node {
    pub fn new(layout: NodeLayout) -> Self {
        Self {
            layout,
            buf: vec![0u8; layout.node_size + layout.tuple_size],
        }
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// The on-disk image of the node.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.layout.node_size]
    }

    /// Buffer to read an on-disk image into.
    pub fn disk_image_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.layout.node_size]
    }

    pub fn clear(&mut self) {
        self.buf.fill(0);
    }

    pub fn copy_from(&mut self, other: &Node) {
        debug_assert_eq!(self.layout, other.layout);
        self.buf.copy_from_slice(&other.buf);
    }

    pub fn count(&self) -> usize {
        u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize
    }

    pub fn set_count(&mut self, count: usize) {
        debug_assert!(count <= self.layout.order + 1);
        self.buf[..NODE_COUNT_SIZE].copy_from_slice(&(count as u16).to_le_bytes());
    }

    pub fn is_leaf(&self) -> bool {
        self.child(0).is_none()
    }

    pub fn child(&self, i: usize) -> NodeAddr {
        NodeAddr::new(self.read_u32(self.layout.child_offset(i)))
    }

    pub fn set_child(&mut self, i: usize, addr: NodeAddr) {
        self.write_u32(self.layout.child_offset(i), addr.get());
    }

    pub fn key(&self, i: usize) -> &[u8] {
        let start = self.layout.key_offset(i);
        &self.buf[start..start + self.layout.key_size]
    }

    pub fn set_key(&mut self, i: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.layout.key_size);
        let start = self.layout.key_offset(i);
        self.buf[start..start + self.layout.key_size].copy_from_slice(key);
    }

    pub fn reference(&self, i: usize) -> RecordNo {
        RecordNo::new(self.read_u32(self.layout.ref_offset(i)))
    }

    pub fn set_reference(&mut self, i: usize, reference: RecordNo) {
        self.write_u32(self.layout.ref_offset(i), reference.get());
    }

    /// Address of the next node on the delete chain, valid only for freed
    /// nodes.
    pub fn next_free(&self) -> NodeAddr {
        NodeAddr::new(self.read_u32(0))
    }

    /// Opens `n` tuple slots at index `i` by moving `child(i)` and everything
    /// after it, up to and including `child(count)`, `n` tuples to the right.
    pub fn insert_tuple(&mut self, i: usize, n: usize) {
        let tsize = self.layout.tuple_size;
        let start = self.layout.child_offset(i);
        let end = self.layout.child_offset(self.count()) + NODE_ADDR_SIZE;
        debug_assert!(end + n * tsize <= self.buf.len());
        self.buf.copy_within(start..end, start + n * tsize);
    }

    /// Removes `child(i)`, `key(i)` and `reference(i)`; `child(i + 1)` takes
    /// the place of `child(i)`. The count is left for the caller to adjust.
    pub fn delete_tuple(&mut self, i: usize) {
        let tsize = self.layout.tuple_size;
        let count = self.count();
        debug_assert!(i < count);
        let dst = self.layout.child_offset(i);
        let len = tsize * (count - i - 1) + NODE_ADDR_SIZE;
        self.buf.copy_within(dst + tsize..dst + tsize + len, dst);
    }

    /// Copies key and reference (not the child pointer) of `src[j]` into
    /// slot `i`.
    pub fn copy_key_from(&mut self, i: usize, src: &Node, j: usize) {
        let len = self.layout.key_size + NODE_REF_SIZE;
        let dst = self.layout.key_offset(i);
        let from = src.layout.key_offset(j);
        self.buf[dst..dst + len].copy_from_slice(&src.buf[from..from + len]);
    }

    /// Copies `n` whole tuples `src[j..j + n]` into slots `i..i + n`.
    pub fn copy_tuples_from(&mut self, i: usize, src: &Node, j: usize, n: usize) {
        let len = self.layout.tuple_size * n;
        let dst = self.layout.child_offset(i);
        let from = src.layout.child_offset(j);
        self.buf[dst..dst + len].copy_from_slice(&src.buf[from..from + len]);
    }

    /// Moves the upper half of an overflowing node, starting at `child(from)`,
    /// to the front of the buffer. `n` tuples plus the trailing child move.
    pub fn shift_left(&mut self, from: usize, n: usize) {
        let start = self.layout.child_offset(from);
        let len = self.layout.tuple_size * n + NODE_ADDR_SIZE;
        self.buf.copy_within(start..start + len, NODE_COUNT_SIZE);
    }

    /// Binary search for `key`. With `dups`, a match is moved left to the
    /// first of the equal keys in this node.
    pub fn search(&self, key: &[u8], cmp: &KeyComparator, dups: bool) -> SearchResult {
        let count = self.count();
        let mut lo = 0usize;
        let mut hi = count;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare(key, self.key(mid)) {
                Ordering::Greater => lo = mid + 1,
                Ordering::Less => hi = mid,
                Ordering::Equal => {
                    let mut first = mid;
                    if dups {
                        while first > 0
                            && cmp.compare(key, self.key(first - 1)) == Ordering::Equal
                        {
                            first -= 1;
                        }
                    }
                    return SearchResult::Found(first);
                }
            }
        }
        SearchResult::NotFound(lo)
    }

    /// Index of the first key strictly greater than `key`, which is where a
    /// new duplicate goes so that equal keys keep their insertion order.
    pub fn upper_bound(&self, key: &[u8], cmp: &KeyComparator) -> usize {
        let mut lo = 0usize;
        let mut hi = self.count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(key, self.key(mid)) == Ordering::Less {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::FieldType;

    fn layout() -> NodeLayout {
        NodeLayout::new(512, 4).unwrap()
    }

    fn int_key(v: i32) -> [u8; 4] {
        v.to_le_bytes()
    }

    fn node_with(keys: &[i32]) -> Node {
        let mut node = Node::new(layout());
        for (i, &k) in keys.iter().enumerate() {
            node.set_key(i, &int_key(k));
            node.set_reference(i, RecordNo::new(k as u32 * 10));
        }
        node.set_count(keys.len());
        node
    }

    #[test]
    fn order_for_default_node_and_int_key_is_42() {
        let layout = layout();

        assert_eq!(layout.tuple_size(), 12);
        assert_eq!(layout.order(), 42);
        assert_eq!(layout.min_fill(), 21);
    }

    #[test]
    fn order_is_rounded_down_to_even() {
        // (100 - 6) / 10 = 9 -> 8
        let layout = NodeLayout::new(100, 2).unwrap();

        assert_eq!(layout.order(), 8);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(NodeLayout::new(512, 0).is_err());
        assert!(NodeLayout::new(512, 256).is_err());
        assert!(NodeLayout::new(32, 4).is_err());
        assert!(NodeLayout::new(64, 40).is_err());
    }

    #[test]
    fn accessors_use_tuple_offsets() {
        let mut node = Node::new(layout());
        node.set_child(0, NodeAddr::new(7));
        node.set_key(0, &int_key(5));
        node.set_reference(0, RecordNo::new(99));
        node.set_child(1, NodeAddr::new(8));
        node.set_count(1);

        let bytes = node.as_bytes();
        assert_eq!(&bytes[0..2], &1u16.to_le_bytes());
        assert_eq!(&bytes[2..6], &7u32.to_le_bytes());
        assert_eq!(&bytes[6..10], &5i32.to_le_bytes());
        assert_eq!(&bytes[10..14], &99u32.to_le_bytes());
        assert_eq!(&bytes[14..18], &8u32.to_le_bytes());
        assert!(!node.is_leaf());
    }

    #[test]
    fn insert_tuple_moves_trailing_child() {
        let mut node = node_with(&[10, 30]);
        node.set_child(2, NodeAddr::new(42));

        node.insert_tuple(1, 1);
        node.set_key(1, &int_key(20));
        node.set_reference(1, RecordNo::new(200));
        node.set_count(3);

        assert_eq!(node.key(0), int_key(10));
        assert_eq!(node.key(1), int_key(20));
        assert_eq!(node.key(2), int_key(30));
        assert_eq!(node.reference(2), RecordNo::new(300));
        assert_eq!(node.child(3), NodeAddr::new(42));
    }

    #[test]
    fn delete_tuple_keeps_following_child() {
        let mut node = node_with(&[10, 20, 30]);
        for i in 0..=3 {
            node.set_child(i, NodeAddr::new(100 + i as u32));
        }

        node.delete_tuple(1);
        node.set_count(2);

        assert_eq!(node.key(0), int_key(10));
        assert_eq!(node.key(1), int_key(30));
        assert_eq!(node.child(0), NodeAddr::new(100));
        assert_eq!(node.child(1), NodeAddr::new(102));
        assert_eq!(node.child(2), NodeAddr::new(103));
    }

    #[test]
    fn copy_key_leaves_child_alone() {
        let src = node_with(&[5]);
        let mut dst = node_with(&[1, 2]);
        dst.set_child(1, NodeAddr::new(9));

        dst.copy_key_from(1, &src, 0);

        assert_eq!(dst.key(1), int_key(5));
        assert_eq!(dst.reference(1), RecordNo::new(50));
        assert_eq!(dst.child(1), NodeAddr::new(9));
    }

    #[test]
    fn overflow_slot_holds_order_plus_one() {
        let order = layout().order();
        let keys: Vec<i32> = (0..order as i32).collect();
        let mut node = node_with(&keys);

        node.insert_tuple(order, 1);
        node.set_key(order, &int_key(1000));
        node.set_count(order + 1);

        assert_eq!(node.key(order), int_key(1000));
        assert_eq!(node.key(order - 1), int_key(order as i32 - 1));
    }

    #[test]
    fn search_finds_insertion_points() {
        let node = node_with(&[10, 20, 30]);
        let cmp = KeyComparator::Basic(FieldType::Int);

        assert_eq!(node.search(&int_key(20), &cmp, false), SearchResult::Found(1));
        assert_eq!(node.search(&int_key(5), &cmp, false), SearchResult::NotFound(0));
        assert_eq!(node.search(&int_key(25), &cmp, false), SearchResult::NotFound(2));
        assert_eq!(node.search(&int_key(99), &cmp, false), SearchResult::NotFound(3));
    }

    #[test]
    fn search_with_dups_returns_leftmost_match() {
        let node = node_with(&[1, 7, 7, 7, 7, 9]);
        let cmp = KeyComparator::Basic(FieldType::Int);

        assert_eq!(node.search(&int_key(7), &cmp, true), SearchResult::Found(1));
    }

    #[test]
    fn upper_bound_skips_equal_keys() {
        let node = node_with(&[1, 7, 7, 7, 9]);
        let cmp = KeyComparator::Basic(FieldType::Int);

        assert_eq!(node.upper_bound(&int_key(7), &cmp), 4);
        assert_eq!(node.upper_bound(&int_key(0), &cmp), 0);
        assert_eq!(node.upper_bound(&int_key(9), &cmp), 5);
    }

    #[test]
    fn empty_node_search() {
        let node = Node::new(layout());
        let cmp = KeyComparator::Basic(FieldType::Int);

        assert_eq!(node.search(&int_key(1), &cmp, false), SearchResult::NotFound(0));
        assert!(node.is_leaf());
    }
}
