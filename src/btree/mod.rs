//! # B-Tree Index
//!
//! On-disk B-tree of fixed-size keys, each paired with a 32-bit reference.
//! Every index file holds exactly one tree; the record layer keeps one file
//! per key of a table plus one reference-entry file per table that foreign
//! keys point at.
//!
//! ## Architecture Overview
//!
//! ```text
//! BTree (tree.rs, delete.rs)        open/add/find/delete/first/last/next/prev
//!   │   uses
//!   ├── Cursor (cursor.rs)          root-to-leaf path, current/hold state
//!   ├── Node (node.rs)              tuple codec over an owned byte buffer
//!   └── CachedFile (storage)        positioned reads and writes
//! ```
//!
//! Unlike a B+tree, keys live in interior nodes too: every key is stored
//! exactly once, and an interior key separates the subtree to its left
//! (smaller or equal keys) from the subtree to its right.
//!
//! ## Balance
//!
//! Every node except the root holds between `order / 2` and `order` keys;
//! all leaves are at the same depth. Insertion keeps this by splitting full
//! nodes bottom-up, deletion by rotating keys through the parent or merging
//! siblings. [`BTree::check`] verifies the invariant on a whole tree.
//!
//! ## Node Reuse
//!
//! Nodes freed by merges form a delete chain rooted in the header and are
//! handed out again before the file grows.
//!
//! ## Module Overview
//!
//! - [`node`]: `NodeLayout` geometry and the `Node` tuple codec
//! - [`cursor`]: traversal state
//! - `tree`: opening, insertion, lookup and traversal
//! - `delete`: deletion and rebalancing

pub mod cursor;
mod delete;
pub mod node;
mod tree;

pub use node::{Node, NodeLayout, SearchResult};
pub use tree::{BTree, BTreeConfig, TreeShape};
