//! # Record Modification
//!
//! `fill_new`, `rec_write` and `delete` keep a table's data file, its key
//! indexes and the reference entries of its foreign keys consistent with
//! each other. Each runs under the database lock and performs every check
//! before the first write, so a refused operation leaves no trace.
//!
//! ```text
//!   fill_new               rec_write                delete
//!      │                      │                        │
//!      ▼                      ▼                        ▼
//!   foreign keys           foreign keys (changed)   restrict check
//!      │                   restrict check (pk)          │
//!      ▼                      ▼                         │
//!   unique keys            unique keys (changed)        │
//!      │                      │                         │
//!      ▼                      ▼                         ▼
//!   encode + add           encode, re-key, write    delete record, keys
//!      │                      │                         │
//!      ▼                      ▼                         ▼
//!   index keys,            reference entries        reference entries
//!   reference entries
//! ```
//!
//! Null optional keys are skipped everywhere: they are neither checked for
//! uniqueness nor stored in their index.
//!
//! ## Module Overview
//!
//! - `insert`: `fill_new`
//! - `update`: `rec_write`
//! - `delete`: `delete`

mod delete;
mod insert;
mod update;

use eyre::Report;

use crate::error::DbError;
use crate::schema::KeyId;

/// Names `key` in a duplicate error raised by its index.
pub(super) fn tag_duplicate(report: Report, key: KeyId) -> Report {
    match DbError::of(&report) {
        Some(DbError::Duplicate { key: None }) => DbError::Duplicate { key: Some(key) }.into(),
        _ => report,
    }
}
