//! # Table, Field and Key Definitions
//!
//! These types describe the binary layout of a table's records and the keys
//! built from them. They are produced by [`SchemaBuilder`](super::SchemaBuilder)
//! and never change while a database is open.
//!
//! ## Record Layout
//!
//! Fields are packed back to back in declaration order without padding. A
//! record buffer handed to the database is exactly `TableDef::size` bytes.
//! Numeric fields are little-endian; string fields are NUL-terminated inside
//! their declared width.
//!
//! ```text
//! struct customer {           offset  size
//!     int   id;               0       4
//!     char  name[20];         4       20
//!     short n_phones;         24      2
//!     int   phones[8];        26      32   variable, count = n_phones
//! }
//! ```
//!
//! ## Keys
//!
//! A key is the concatenation of one or more fields copied out of the record.
//! Keys of a table are ordered primary, alternates, foreign. Primary and
//! alternate keys have an index file each; foreign keys have none, they are
//! resolved through the parent table's primary key.
//!
//! An optional key has a null indicator: a one-byte field which, when zero,
//! marks the key as null. Null keys are not indexed and null foreign keys
//! are not checked.
//!
//! ## Stored Records
//!
//! In the data file every record is prefixed by one 4-byte parent record
//! number per foreign key, so that the reference entries of a dependent row
//! can be removed without looking its parents up again.

use std::cmp::Ordering;

use super::{FieldId, KeyId, TableId};
use crate::keys::{FieldType, KeyComparator, KeySegment};

/// Size of one parent reference in the stored record prefix.
pub const PARENT_REF_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub table: TableId,
    pub offset: usize,
    /// Total width in bytes (capacity for variable fields).
    pub size: usize,
    /// Width of one element: `size` for scalars, 1 for strings.
    pub elem_size: usize,
    pub ty: FieldType,
    /// Field holding the element count of a variable-length field.
    pub count_field: Option<FieldId>,
    /// Key that consists of exactly this field, if any.
    pub key: Option<KeyId>,
}

impl FieldDef {
    pub fn is_variable(&self) -> bool {
        self.count_field.is_some()
    }

    pub fn bytes<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.offset..self.offset + self.size]
    }

    /// Reads an integer field as an unsigned count. Negative values read as
    /// zero.
    pub fn read_count(&self, record: &[u8]) -> usize {
        let raw = self.bytes(record);
        let mut le = [0u8; 8];
        le[..raw.len().min(8)].copy_from_slice(&raw[..raw.len().min(8)]);
        match self.ty {
            FieldType::Char => (raw[0] as i8).max(0) as usize,
            FieldType::UChar => raw[0] as usize,
            FieldType::Short => i16::from_le_bytes([le[0], le[1]]).max(0) as usize,
            FieldType::UShort => u16::from_le_bytes([le[0], le[1]]) as usize,
            FieldType::Int => i32::from_le_bytes([le[0], le[1], le[2], le[3]]).max(0) as usize,
            FieldType::UInt => u32::from_le_bytes([le[0], le[1], le[2], le[3]]) as usize,
            FieldType::Long => i64::from_le_bytes(le).max(0) as usize,
            FieldType::ULong => u64::from_le_bytes(le) as usize,
            FieldType::Str | FieldType::Float | FieldType::Double => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Primary,
    Alternate,
    Foreign { parent: TableId },
}

/// One field of a key: where it is read from in the record and where it is
/// placed in the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPart {
    pub field: FieldId,
    pub record_offset: usize,
    pub key_offset: usize,
    pub size: usize,
    pub ty: FieldType,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDef {
    pub name: String,
    pub table: TableId,
    pub kind: KeyKind,
    pub parts: Vec<KeyPart>,
    pub size: usize,
    pub unique: bool,
    pub null_indicator: Option<usize>,
}

impl KeyDef {
    pub fn is_foreign(&self) -> bool {
        matches!(self.kind, KeyKind::Foreign { .. })
    }

    pub fn parent(&self) -> Option<TableId> {
        match self.kind {
            KeyKind::Foreign { parent } => Some(parent),
            _ => None,
        }
    }

    /// Copies the key fields of `record` into a key value.
    pub fn make_key(&self, record: &[u8]) -> Vec<u8> {
        let mut key = vec![0u8; self.size];
        for part in &self.parts {
            key[part.key_offset..part.key_offset + part.size]
                .copy_from_slice(&record[part.record_offset..part.record_offset + part.size]);
        }
        key
    }

    /// True when the key of `record` is null. Keys without a null indicator
    /// are never null.
    pub fn is_null(&self, record: &[u8]) -> bool {
        self.null_indicator.is_some_and(|offset| record[offset] == 0)
    }

    pub fn segments(&self) -> Vec<KeySegment> {
        self.parts
            .iter()
            .map(|part| KeySegment {
                offset: part.key_offset,
                size: part.size,
                ty: part.ty,
                descending: part.descending,
            })
            .collect()
    }

    pub fn comparator(&self) -> KeyComparator {
        KeyComparator::for_segments(&self.segments())
    }

    /// True when the key differs between two versions of a record. A change
    /// between null and non-null counts as a difference.
    pub fn differs(&self, a: &[u8], b: &[u8]) -> bool {
        let (a_null, b_null) = (self.is_null(a), self.is_null(b));
        if a_null || b_null {
            return a_null != b_null;
        }
        self.comparator().compare(&self.make_key(a), &self.make_key(b)) != Ordering::Equal
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub id: TableId,
    /// Size of the uncompressed record buffer.
    pub size: usize,
    pub fields: Vec<FieldId>,
    /// Primary key first, then alternate keys, then foreign keys.
    pub keys: Vec<KeyId>,
    pub variable_length: bool,
    /// First variable-length field; everything from here on is variable.
    pub first_variable: Option<FieldId>,
    pub node_size: usize,
    pub block_size: usize,
    /// Tables with a foreign key referencing this one.
    pub dependents: Vec<TableId>,
    pub(super) primary: Option<KeyId>,
    pub(super) foreign_count: usize,
}

impl TableDef {
    pub fn primary_key(&self) -> Option<KeyId> {
        self.primary
    }

    /// Keys with an index file of their own.
    pub fn indexed_keys(&self) -> &[KeyId] {
        &self.keys[..self.keys.len() - self.foreign_count]
    }

    pub fn foreign_keys(&self) -> &[KeyId] {
        &self.keys[self.keys.len() - self.foreign_count..]
    }

    pub fn has_dependents(&self) -> bool {
        !self.dependents.is_empty()
    }

    /// Bytes of parent references stored in front of each record.
    pub fn preamble_size(&self) -> usize {
        self.foreign_count * PARENT_REF_SIZE
    }

    /// Size of a stored fixed-length record, preamble included.
    pub fn stored_size(&self) -> usize {
        self.preamble_size() + self.size
    }

    pub fn data_file_name(&self) -> String {
        if self.variable_length {
            format!("{}.vlr", self.name)
        } else {
            format!("{}.dat", self.name)
        }
    }

    pub fn ref_file_name(&self) -> String {
        format!("{}.ref", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDef {
    pub name: String,
    pub start: u64,
    pub step: u64,
    pub ascending: bool,
}

impl SequenceDef {
    /// The value following `value`, wrapping on overflow.
    pub fn advance(&self, value: u64) -> u64 {
        if self.ascending {
            value.wrapping_add(self.step)
        } else {
            value.wrapping_sub(self.step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(field: usize, record_offset: usize, key_offset: usize, size: usize, ty: FieldType) -> KeyPart {
        KeyPart {
            field: FieldId::new(field),
            record_offset,
            key_offset,
            size,
            ty,
            descending: false,
        }
    }

    fn compound_key() -> KeyDef {
        KeyDef {
            name: "by_name_age".into(),
            table: TableId::new(0),
            kind: KeyKind::Alternate,
            parts: vec![part(1, 4, 0, 8, FieldType::Str), part(2, 12, 8, 2, FieldType::Short)],
            size: 10,
            unique: false,
            null_indicator: Some(14),
        }
    }

    fn record(name: &[u8], age: i16, present: bool) -> Vec<u8> {
        let mut rec = vec![0u8; 15];
        rec[4..4 + name.len()].copy_from_slice(name);
        rec[12..14].copy_from_slice(&age.to_le_bytes());
        rec[14] = present as u8;
        rec
    }

    #[test]
    fn make_key_concatenates_parts() {
        let key = compound_key().make_key(&record(b"ann", 31, true));

        assert_eq!(&key[..3], b"ann");
        assert_eq!(&key[8..], &31i16.to_le_bytes());
    }

    #[test]
    fn zero_indicator_means_null() {
        let key = compound_key();

        assert!(key.is_null(&record(b"ann", 31, false)));
        assert!(!key.is_null(&record(b"ann", 31, true)));
    }

    #[test]
    fn differs_ignores_bytes_after_terminator() {
        let key = compound_key();
        let mut a = record(b"ann", 31, true);
        let b = record(b"ann", 31, true);
        a[9] = b'x';

        assert!(!key.differs(&a, &b));
        assert!(key.differs(&record(b"ann", 32, true), &b));
        assert!(key.differs(&record(b"ann", 31, false), &b));
    }

    #[test]
    fn count_fields_read_as_unsigned() {
        let field = FieldDef {
            name: "n".into(),
            table: TableId::new(0),
            offset: 2,
            size: 2,
            elem_size: 2,
            ty: FieldType::Short,
            count_field: None,
            key: None,
        };
        let mut rec = [0u8; 4];
        rec[2..4].copy_from_slice(&7i16.to_le_bytes());
        assert_eq!(field.read_count(&rec), 7);

        rec[2..4].copy_from_slice(&(-3i16).to_le_bytes());
        assert_eq!(field.read_count(&rec), 0);
    }

    #[test]
    fn descending_sequence_counts_down() {
        let seq = SequenceDef { name: "s".into(), start: 100, step: 5, ascending: false };

        assert_eq!(seq.advance(100), 95);
    }
}
