//! # Keys
//!
//! Field types, key comparators and the reference entry stored in the
//! reference-entry indexes that back referential integrity.
//!
//! ## Reference Entries
//!
//! A table that other tables point at through foreign keys gets a
//! reference-entry index. For every dependent row it holds one entry:
//!
//! ```text
//! Offset  Size  Field
//! 0       4     parent       record number of the referenced row
//! 4       4     table        code of the dependent table
//! 8       4     dependent    record number of the dependent row
//! ```
//!
//! Entries sort by all three fields, so the dependents of one parent form a
//! contiguous run starting at `(parent, 0, 0)`.

pub mod compare;

pub use compare::{compare_field, KeyComparator, KeySegment};

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::storage::RecordNo;

/// Primitive type of a record field, which determines how key values of
/// that field are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Char,
    UChar,
    /// NUL-terminated character string; the width comes from the field.
    Str,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl FieldType {
    /// Width of one element, or `None` for strings whose width is declared
    /// per field.
    pub fn scalar_size(self) -> Option<usize> {
        match self {
            FieldType::Char | FieldType::UChar => Some(1),
            FieldType::Str => None,
            FieldType::Short | FieldType::UShort => Some(2),
            FieldType::Int | FieldType::UInt | FieldType::Float => Some(4),
            FieldType::Long | FieldType::ULong | FieldType::Double => Some(8),
        }
    }
}

pub const REF_ENTRY_SIZE: usize = 12;

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct RefEntry {
    parent: U32,
    table: U32,
    dependent: U32,
}

const _: () = assert!(std::mem::size_of::<RefEntry>() == REF_ENTRY_SIZE);

impl RefEntry {
    pub fn new(parent: u32, table: u32, dependent: u32) -> Self {
        Self {
            parent: U32::new(parent),
            table: U32::new(table),
            dependent: U32::new(dependent),
        }
    }

    /// Smallest possible entry for `parent`; every dependent of `parent`
    /// sorts at or after it.
    pub fn first_for(parent: RecordNo) -> Self {
        Self::new(parent.get(), 0, 0)
    }

    /// Decodes an entry, zero-filling a short buffer.
    pub fn read(bytes: &[u8]) -> Self {
        let mut raw = [0u8; REF_ENTRY_SIZE];
        let len = bytes.len().min(REF_ENTRY_SIZE);
        raw[..len].copy_from_slice(&bytes[..len]);
        Self::read_from_bytes(&raw[..]).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> [u8; REF_ENTRY_SIZE] {
        let mut out = [0u8; REF_ENTRY_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    pub fn parent(&self) -> RecordNo {
        RecordNo::new(self.parent.get())
    }

    /// Code of the dependent table.
    pub fn table(&self) -> u32 {
        self.table.get()
    }

    pub fn dependent(&self) -> RecordNo {
        RecordNo::new(self.dependent.get())
    }

    fn sort_key(&self) -> (u32, u32, u32) {
        (self.parent.get(), self.table.get(), self.dependent.get())
    }
}

impl PartialOrd for RefEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RefEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
