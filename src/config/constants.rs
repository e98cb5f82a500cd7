//! # Typhoon Configuration Constants
//!
//! This module centralizes the numeric configuration of the engine, grouping
//! interdependent values together and documenting their relationships.
//! Constants that depend on each other are co-located and checked with
//! compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! BTREE_HEADER_SIZE (64 bytes)
//!       │
//!       └─> MIN_NODE_SIZE (node 0 holds the header, so a node must fit it)
//!
//! NODE_COUNT_SIZE (2) + NODE_ADDR_SIZE (4) + NODE_REF_SIZE (4)
//!       │
//!       └─> tuple size = NODE_ADDR_SIZE + key size + NODE_REF_SIZE
//!           order      = ((node size - NODE_COUNT_SIZE - NODE_ADDR_SIZE)
//!                          / tuple size) rounded down to even
//!
//! MAX_KEY_SIZE (255)
//!       │
//!       └─> MIN_NODE_SIZE must still give order >= 2 for the largest key
//!
//! DEFAULT_MAX_OPEN_FILES (20)
//!       │
//!       └─> MIN_MAX_OPEN_FILES (2): eviction needs a victim besides the
//!           file being reopened
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use crate::config::{DEFAULT_NODE_SIZE, REC_FACTOR};
//! ```

// ============================================================================
// B-TREE LAYOUT
// ============================================================================

/// Size of the B-tree file header. The header lives at offset 0 inside
/// node 0, which is never used for tuples.
pub const BTREE_HEADER_SIZE: usize = 64;

/// Bytes used by the tuple count at the start of every node.
pub const NODE_COUNT_SIZE: usize = 2;

/// Bytes used by a child address inside a node.
pub const NODE_ADDR_SIZE: usize = 4;

/// Bytes used by a reference inside a node.
pub const NODE_REF_SIZE: usize = 4;

/// Default node size for new index files.
pub const DEFAULT_NODE_SIZE: usize = 512;

/// Smallest node size accepted when creating an index file.
pub const MIN_NODE_SIZE: usize = 64;

/// Largest key, in bytes, that an index can hold.
pub const MAX_KEY_SIZE: usize = 255;

/// Deepest tree accepted when walking an index; anything deeper is treated
/// as a corrupt (cyclic) file.
pub const MAX_TREE_DEPTH: usize = 32;

const _: () = assert!(
    BTREE_HEADER_SIZE <= MIN_NODE_SIZE,
    "node 0 must be able to hold the B-tree header"
);

const _: () = assert!(
    (MIN_NODE_SIZE - NODE_COUNT_SIZE - NODE_ADDR_SIZE)
        / (NODE_ADDR_SIZE + 1 + NODE_REF_SIZE)
        >= 2,
    "the smallest node must give order >= 2 for one-byte keys"
);

// ============================================================================
// RECORD FILES
// ============================================================================

/// Size of the fixed record file header.
pub const RECORD_HEADER_SIZE: usize = 48;

/// Per-record preamble: prev (4) + next (4) + flags (1).
pub const RECORD_PREAMBLE_SIZE: usize = 9;

/// Size of the variable-length record file header.
pub const VLR_HEADER_SIZE: usize = 64;

/// Per-block preamble: next block (4) + record size (4).
pub const VLR_BLOCK_PREAMBLE_SIZE: usize = 8;

/// Default block size for variable-length record files.
pub const DEFAULT_VLR_BLOCK_SIZE: usize = 256;

/// Smallest usable block size; anything smaller wastes most of each block
/// on the preamble.
pub const MIN_VLR_BLOCK_SIZE: usize = 32;

const _: () = assert!(
    MIN_VLR_BLOCK_SIZE > VLR_BLOCK_PREAMBLE_SIZE,
    "a VLR block must carry at least one data byte"
);

// ============================================================================
// FILE HANDLE CACHE
// ============================================================================

/// Default ceiling of simultaneously open OS descriptors across every open
/// database in the process.
pub const DEFAULT_MAX_OPEN_FILES: usize = 20;

/// Minimum allowed ceiling.
pub const MIN_MAX_OPEN_FILES: usize = 2;

const _: () = assert!(
    MIN_MAX_OPEN_FILES <= DEFAULT_MAX_OPEN_FILES,
    "default handle ceiling below the minimum"
);

// ============================================================================
// SCHEMA IDS
// ============================================================================

/// Multiplier turning a table index into its public code:
/// `(index + 1) * REC_FACTOR`. Field codes add `field index + 1`.
pub const REC_FACTOR: u32 = 1000;

/// Maximum number of keys (including foreign keys) per table.
pub const MAX_KEYS_PER_TABLE: usize = 32;
