//! # Key Comparison Dispatch
//!
//! A B-tree only sees keys as byte strings of a fixed size; ordering them is
//! the job of a [`KeyComparator`] chosen when the index is opened:
//!
//! - `Basic(ty)` for a single ascending field, dispatching on [`FieldType`]
//! - `Compound(segments)` for keys made of several fields, or of one
//!   descending field. Segments are compared in order and the first unequal
//!   segment decides; a descending segment inverts its own result.
//! - `RefEntry` for the reference-entry indexes used by referential
//!   integrity, ordering by (parent, dependent table, dependent record).
//!
//! Each comparator owns the description of the key it orders, so there is no
//! "current key" context to set up before comparing.
//!
//! ## Value Encoding
//!
//! Numeric fields are stored little-endian at their natural width. Strings are
//! NUL-terminated within the field and compared as unsigned bytes; bytes after
//! the terminator are ignored. Floats are ordered with `total_cmp`, so NaN
//! sorts consistently instead of comparing equal to everything.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{FieldType, RefEntry};

/// One field of a compound key: where it lives inside the key bytes, how wide
/// it is, how to order it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySegment {
    pub offset: usize,
    pub size: usize,
    pub ty: FieldType,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyComparator {
    Basic(FieldType),
    Compound(Arc<[KeySegment]>),
    RefEntry,
}

impl KeyComparator {
    /// Picks the cheapest comparator that orders keys made of `segments`.
    pub fn for_segments(segments: &[KeySegment]) -> Self {
        match segments {
            [only] if !only.descending && only.offset == 0 => KeyComparator::Basic(only.ty),
            _ => KeyComparator::Compound(segments.into()),
        }
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyComparator::Basic(ty) => compare_field(*ty, a, b),
            KeyComparator::Compound(segments) => compare_compound(segments, a, b),
            KeyComparator::RefEntry => RefEntry::read(a).cmp(&RefEntry::read(b)),
        }
    }
}

fn compare_compound(segments: &[KeySegment], a: &[u8], b: &[u8]) -> Ordering {
    for segment in segments {
        let range = segment.offset..segment.offset + segment.size;
        let (Some(lhs), Some(rhs)) = (a.get(range.clone()), b.get(range)) else {
            return a.len().cmp(&b.len());
        };
        let ord = compare_field(segment.ty, lhs, rhs);
        if ord != Ordering::Equal {
            return if segment.descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

/// Copies up to `N` leading bytes, zero-padding a short slice.
#[inline]
fn head<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn nul_terminated(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// Compares two encoded values of one field type.
pub fn compare_field(ty: FieldType, a: &[u8], b: &[u8]) -> Ordering {
    match ty {
        FieldType::Char => (head::<1>(a)[0] as i8).cmp(&(head::<1>(b)[0] as i8)),
        FieldType::UChar => head::<1>(a)[0].cmp(&head::<1>(b)[0]),
        FieldType::Str => nul_terminated(a).cmp(nul_terminated(b)),
        FieldType::Short => i16::from_le_bytes(head(a)).cmp(&i16::from_le_bytes(head(b))),
        FieldType::UShort => u16::from_le_bytes(head(a)).cmp(&u16::from_le_bytes(head(b))),
        FieldType::Int => i32::from_le_bytes(head(a)).cmp(&i32::from_le_bytes(head(b))),
        FieldType::UInt => u32::from_le_bytes(head(a)).cmp(&u32::from_le_bytes(head(b))),
        FieldType::Long => i64::from_le_bytes(head(a)).cmp(&i64::from_le_bytes(head(b))),
        FieldType::ULong => u64::from_le_bytes(head(a)).cmp(&u64::from_le_bytes(head(b))),
        FieldType::Float => f32::from_le_bytes(head(a)).total_cmp(&f32::from_le_bytes(head(b))),
        FieldType::Double => f64::from_le_bytes(head(a)).total_cmp(&f64::from_le_bytes(head(b))),
    }
}
