//! # Error Kinds
//!
//! Every operation in the crate returns `eyre::Result`. Outcomes a caller is
//! expected to branch on (a key that is not there, a duplicate, a restrict
//! violation) are raised as a [`DbError`] inside the report, so the usual `?`
//! propagation works while callers can still recover the kind:
//!
//! ```ignore
//! match db.key_find(key, &value) {
//!     Ok(()) => { /* positioned */ }
//!     Err(e) if DbError::of(&e) == Some(&DbError::NotFound) => { /* absent */ }
//!     Err(e) => return Err(e),
//! }
//!
//! // or, more compactly
//! let reference = tree.find(&key).optional()?;
//! ```
//!
//! Plain I/O failures are `std::io::Error`s wrapped with path and offset
//! context; they never appear as a `DbError`.
//!
//! ## Subcodes
//!
//! Errors that name a culprit carry it as a field: `Duplicate` names the key,
//! `Foreign` the parent table, `Restrict` the dependent table and
//! `RecordSize` the element-count field.

use std::fmt;

use eyre::Report;

use crate::schema::{FieldId, KeyId, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbError {
    /// The key or record does not exist, or traversal ran off either end.
    NotFound,
    /// A unique key already holds this value. `key` is set when the database
    /// layer knows which key of the record collided.
    Duplicate { key: Option<KeyId> },
    /// The record has been deleted.
    Deleted,
    /// There is no current record or key.
    NoCurrent,
    /// The address lies inside the header region of the file.
    InvalidAddress,
    /// A foreign key refers to a parent row that does not exist.
    Foreign { parent: TableId },
    /// A dependent row still refers to the record being deleted or re-keyed.
    Restrict { dependent: TableId },
    /// The file was written by an incompatible format version.
    VersionMismatch { expected: u16, found: u16 },
    /// The file is locked by another non-shared opener.
    NotAvailable,
    /// The handle ceiling is reached and no open handle can be evicted.
    NoEvictableHandle,
    InvalidRecord,
    InvalidField,
    NotKey,
    InvalidSequence,
    /// A variable-length field's element count exceeds its capacity.
    RecordSize { field: FieldId },
    InvalidParameter,
}

impl DbError {
    /// Returns the `DbError` carried by `report`, if any.
    pub fn of(report: &Report) -> Option<&DbError> {
        report.downcast_ref::<DbError>()
    }

    pub fn is(report: &Report, kind: DbError) -> bool {
        Self::of(report) == Some(&kind)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::NotFound => write!(f, "not found"),
            DbError::Duplicate { key: Some(key) } => write!(f, "duplicate value for key {}", key),
            DbError::Duplicate { key: None } => write!(f, "duplicate key"),
            DbError::Deleted => write!(f, "record has been deleted"),
            DbError::NoCurrent => write!(f, "no current record"),
            DbError::InvalidAddress => write!(f, "invalid record address"),
            DbError::Foreign { parent } => {
                write!(f, "foreign key has no parent row in table {}", parent.code())
            }
            DbError::Restrict { dependent } => write!(
                f,
                "restrict rule violated: rows in table {} depend on this record",
                dependent.code()
            ),
            DbError::VersionMismatch { expected, found } => write!(
                f,
                "file format version mismatch: found {} (expected {})",
                found, expected
            ),
            DbError::NotAvailable => write!(f, "file is locked by another user"),
            DbError::NoEvictableHandle => {
                write!(f, "open file ceiling reached and no handle can be closed")
            }
            DbError::InvalidRecord => write!(f, "invalid record id"),
            DbError::InvalidField => write!(f, "invalid field id"),
            DbError::NotKey => write!(f, "field is not a key"),
            DbError::InvalidSequence => write!(f, "invalid sequence id"),
            DbError::RecordSize { field } => {
                write!(f, "element count in field {} exceeds its capacity", field)
            }
            DbError::InvalidParameter => write!(f, "invalid parameter"),
        }
    }
}

impl std::error::Error for DbError {}

/// Helpers for branching on [`DbError`] kinds without matching on reports.
pub trait ResultExt<T> {
    /// Maps a `NotFound` error to `Ok(None)`.
    fn optional(self) -> eyre::Result<Option<T>>;

    /// Returns the `DbError` kind of a failure, or `None` on success or for
    /// non-logical errors.
    fn db_error(&self) -> Option<DbError>;
}

impl<T> ResultExt<T> for eyre::Result<T> {
    fn optional(self) -> eyre::Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if DbError::is(&e, DbError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn db_error(&self) -> Option<DbError> {
        match self {
            Ok(_) => None,
            Err(e) => DbError::of(e).copied(),
        }
    }
}
