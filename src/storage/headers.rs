//! # File Header Definitions
//!
//! This module provides type-safe, zerocopy-based layouts for every
//! fixed-format structure the engine writes to disk: the header at offset 0 of
//! each of the three file kinds, and the small preambles that prefix every
//! record slot and every VLR block.
//!
//! ## File Types
//!
//! 1. **B-tree index** (`BTreeHeader`, 64 bytes inside node 0)
//!    - node size, key size, order, duplicates flag
//!    - delete-chain head, key count, modification timestamp
//!
//! 2. **Fixed record file** (`RecordFileHeader`, 48 bytes)
//!    - delete-chain head, first/last active record, record count
//!    - data size and full slot size
//!
//! 3. **Variable-length record file** (`VlrHeader`, 64 bytes)
//!    - block size, first free block, record count, user id string
//!
//! ## Header Layouts
//!
//! ```text
//! BTreeHeader                      RecordFileHeader
//! Offset Size Field                Offset Size Field
//! 0      16   magic                0      16   magic
//! 16     2    version              16     2    version
//! 18     1    dups                 18     2    reserved
//! 19     1    reserved             20     4    first_deleted
//! 20     2    node_size            24     4    first
//! 22     2    key_size             28     4    last
//! 24     2    order                32     4    records
//! 26     2    reserved             36     4    data_size
//! 28     4    first_deleted        40     4    record_size
//! 32     4    keys                 44     4    reserved
//! 36     4    timestamp
//! 40     24   reserved
//!
//! VlrHeader                        RecordPreamble      BlockPreamble
//! 0      16   magic                0  4  prev          0  4  next
//! 16     2    version              4  4  next          4  4  size
//! 18     2    reserved             8  1  flags
//! 20     4    block_size
//! 24     4    first_free
//! 28     4    records
//! 32     32   user id
//! ```
//!
//! ## Versioning
//!
//! Opening a file whose magic or version does not match fails with
//! [`DbError::VersionMismatch`] instead of reinterpreting foreign bytes.
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian through zerocopy's `U16`/`U32`
//! wrappers, and every struct is `Unaligned` so it can be read straight out
//! of a byte buffer at any offset.

use eyre::{eyre, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::address::{BlockAddr, NodeAddr, RecordNo};
use crate::config::{
    BTREE_HEADER_SIZE, RECORD_HEADER_SIZE, RECORD_PREAMBLE_SIZE, VLR_BLOCK_PREAMBLE_SIZE,
    VLR_HEADER_SIZE,
};
use crate::error::DbError;

pub const BTREE_MAGIC: &[u8; 16] = b"Typhoon Index\x00\x00\x00";
pub const RECORD_MAGIC: &[u8; 16] = b"Typhoon Data\x00\x00\x00\x00";
pub const VLR_MAGIC: &[u8; 16] = b"Typhoon VLR\x00\x00\x00\x00\x00";

pub const BTREE_VERSION: u16 = 121;
pub const RECORD_VERSION: u16 = 120;
pub const VLR_VERSION: u16 = 100;

pub const VLR_USER_ID_LEN: usize = 32;

/// Record preamble flag: the slot is on the delete chain.
pub const RECORD_DELETED: u8 = 0x01;

fn check_version(
    magic: &[u8; 16],
    expected_magic: &[u8; 16],
    version: u16,
    expected: u16,
) -> Result<()> {
    if magic != expected_magic {
        return Err(DbError::VersionMismatch { expected, found: 0 }.into());
    }
    if version != expected {
        return Err(DbError::VersionMismatch { expected, found: version }.into());
    }
    Ok(())
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BTreeHeader {
    magic: [u8; 16],
    version: U16,
    dups: u8,
    reserved0: u8,
    node_size: U16,
    key_size: U16,
    order: U16,
    reserved1: [u8; 2],
    first_deleted: U32,
    keys: U32,
    timestamp: U32,
    reserved2: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<BTreeHeader>() == BTREE_HEADER_SIZE);

impl BTreeHeader {
    pub fn new(node_size: u16, key_size: u16, order: u16, dups: bool) -> Self {
        Self {
            magic: *BTREE_MAGIC,
            version: U16::new(BTREE_VERSION),
            dups: dups as u8,
            reserved0: 0,
            node_size: U16::new(node_size),
            key_size: U16::new(key_size),
            order: U16::new(order),
            reserved1: [0; 2],
            first_deleted: U32::new(0),
            keys: U32::new(0),
            timestamp: U32::new(0),
            reserved2: [0; 24],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::read_from_bytes(bytes.get(..BTREE_HEADER_SIZE).unwrap_or(bytes))
            .map_err(|e| eyre!("failed to parse BTreeHeader: {:?}", e))?;
        check_version(&header.magic, BTREE_MAGIC, header.version(), BTREE_VERSION)?;
        Ok(header)
    }

    pub fn dups(&self) -> bool {
        self.dups != 0
    }

    zerocopy_accessors! {
        version: u16,
        node_size: u16,
        key_size: u16,
        order: u16,
        first_deleted: NodeAddr,
        keys: u32,
        timestamp: u32,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordFileHeader {
    magic: [u8; 16],
    version: U16,
    reserved0: [u8; 2],
    first_deleted: U32,
    first: U32,
    last: U32,
    records: U32,
    data_size: U32,
    record_size: U32,
    reserved1: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RecordFileHeader>() == RECORD_HEADER_SIZE);

impl RecordFileHeader {
    pub fn new(data_size: u32) -> Self {
        Self {
            magic: *RECORD_MAGIC,
            version: U16::new(RECORD_VERSION),
            reserved0: [0; 2],
            first_deleted: U32::new(0),
            first: U32::new(0),
            last: U32::new(0),
            records: U32::new(0),
            data_size: U32::new(data_size),
            record_size: U32::new(data_size + RECORD_PREAMBLE_SIZE as u32),
            reserved1: [0; 4],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::read_from_bytes(bytes.get(..RECORD_HEADER_SIZE).unwrap_or(bytes))
            .map_err(|e| eyre!("failed to parse RecordFileHeader: {:?}", e))?;
        check_version(&header.magic, RECORD_MAGIC, header.version(), RECORD_VERSION)?;
        Ok(header)
    }

    zerocopy_accessors! {
        version: u16,
        first_deleted: RecordNo,
        first: RecordNo,
        last: RecordNo,
        records: u32,
        data_size: u32,
        record_size: u32,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordPreamble {
    prev: U32,
    next: U32,
    flags: u8,
}

const _: () = assert!(std::mem::size_of::<RecordPreamble>() == RECORD_PREAMBLE_SIZE);

impl RecordPreamble {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes.get(..RECORD_PREAMBLE_SIZE).unwrap_or(bytes))
            .map_err(|e| eyre!("failed to parse RecordPreamble: {:?}", e))
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & RECORD_DELETED != 0
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        if deleted {
            self.flags |= RECORD_DELETED;
        } else {
            self.flags &= !RECORD_DELETED;
        }
    }

    zerocopy_accessors! {
        prev: RecordNo,
        next: RecordNo,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct VlrHeader {
    magic: [u8; 16],
    version: U16,
    reserved0: [u8; 2],
    block_size: U32,
    first_free: U32,
    records: U32,
    user_id: [u8; VLR_USER_ID_LEN],
}

const _: () = assert!(std::mem::size_of::<VlrHeader>() == VLR_HEADER_SIZE);

impl VlrHeader {
    /// `user_id` is truncated to 31 bytes so the stored id stays
    /// NUL-terminated.
    pub fn new(block_size: u32, first_free: BlockAddr, user_id: &str) -> Self {
        let mut id = [0u8; VLR_USER_ID_LEN];
        let len = user_id.len().min(VLR_USER_ID_LEN - 1);
        id[..len].copy_from_slice(&user_id.as_bytes()[..len]);
        Self {
            magic: *VLR_MAGIC,
            version: U16::new(VLR_VERSION),
            reserved0: [0; 2],
            block_size: U32::new(block_size),
            first_free: U32::new(first_free.get()),
            records: U32::new(0),
            user_id: id,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::read_from_bytes(bytes.get(..VLR_HEADER_SIZE).unwrap_or(bytes))
            .map_err(|e| eyre!("failed to parse VlrHeader: {:?}", e))?;
        check_version(&header.magic, VLR_MAGIC, header.version(), VLR_VERSION)?;
        Ok(header)
    }

    pub fn user_id(&self) -> &str {
        let end = self.user_id.iter().position(|&b| b == 0).unwrap_or(VLR_USER_ID_LEN);
        std::str::from_utf8(&self.user_id[..end]).unwrap_or("")
    }

    zerocopy_accessors! {
        version: u16,
        block_size: u32,
        first_free: BlockAddr,
        records: u32,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockPreamble {
    next: U32,
    size: U32,
}

const _: () = assert!(std::mem::size_of::<BlockPreamble>() == VLR_BLOCK_PREAMBLE_SIZE);

impl BlockPreamble {
    pub fn new(next: BlockAddr, size: u32) -> Self {
        Self {
            next: U32::new(next.get()),
            size: U32::new(size),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes.get(..VLR_BLOCK_PREAMBLE_SIZE).unwrap_or(bytes))
            .map_err(|e| eyre!("failed to parse BlockPreamble: {:?}", e))
    }

    zerocopy_accessors! {
        next: BlockAddr,
        size: u32,
    }
}
