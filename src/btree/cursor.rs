//! # Traversal State
//!
//! An open index remembers where it is positioned so that `next`/`prev` can
//! continue without searching from the root again. The state is:
//!
//! - `path`: the (node address, position) pairs from the root down to the
//!   node holding the current key. The last entry is the current level.
//! - `current`: a key is current; its bytes and reference are cached.
//! - `hold`: the last `find` failed on a non-empty tree. The path then points
//!   at the insertion position of the probe, which is where a following
//!   `next`/`prev` resumes.
//!
//! `current` and `hold` are never both set.
//!
//! ## Positions
//!
//! In the node at the current level, `pos` is the index of the current key.
//! In every ancestor, `pos` is the index of the child that was descended into,
//! so `key(pos)` of an ancestor is the separator right of the subtree below.

use smallvec::SmallVec;

use crate::config::MAX_TREE_DEPTH;
use crate::storage::{NodeAddr, RecordNo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEntry {
    pub addr: NodeAddr,
    pub pos: usize,
}

#[derive(Debug, Default)]
pub struct Cursor {
    path: SmallVec<[PathEntry; MAX_TREE_DEPTH]>,
    current: bool,
    hold: bool,
    key: Vec<u8>,
    reference: RecordNo,
}

impl Cursor {
    pub fn new(key_size: usize) -> Self {
        Self {
            key: vec![0u8; key_size],
            ..Self::default()
        }
    }

    /// Forgets the position entirely.
    pub fn reset(&mut self) {
        self.path.clear();
        self.current = false;
        self.hold = false;
    }

    pub fn is_current(&self) -> bool {
        self.current
    }

    pub fn is_hold(&self) -> bool {
        self.hold
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.then_some(self.key.as_slice())
    }

    pub fn reference(&self) -> Option<RecordNo> {
        self.current.then_some(self.reference)
    }

    pub fn set_current(&mut self, key: &[u8], reference: RecordNo) {
        self.key.copy_from_slice(key);
        self.reference = reference;
        self.current = true;
        self.hold = false;
    }

    /// Records a failed lookup of `probe`. The probe is kept so the position
    /// can be found again after the tree changed underneath.
    pub fn set_hold(&mut self, probe: &[u8], hold: bool) {
        self.key.copy_from_slice(probe);
        self.hold = hold;
        self.current = false;
    }

    pub fn clear_current(&mut self) {
        self.current = false;
        self.hold = false;
    }

    pub fn push(&mut self, addr: NodeAddr, pos: usize) {
        self.path.push(PathEntry { addr, pos });
    }

    pub fn pop(&mut self) -> Option<PathEntry> {
        self.path.pop()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.path.truncate(depth);
    }

    /// Number of levels on the path; the root is level 1.
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn top(&self) -> Option<PathEntry> {
        self.path.last().copied()
    }

    pub fn top_mut(&mut self) -> Option<&mut PathEntry> {
        self.path.last_mut()
    }

    /// Entry `levels` above the current one.
    pub fn ancestor(&self, levels: usize) -> Option<PathEntry> {
        let len = self.path.len();
        len.checked_sub(levels + 1).map(|i| self.path[i])
    }

    /// The last current key, or the probe of a failed lookup. Readable while
    /// not current.
    pub fn last_key(&self) -> &[u8] {
        &self.key
    }

    pub fn last_reference(&self) -> RecordNo {
        self.reference
    }
}
