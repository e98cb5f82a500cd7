//! # Database Module
//!
//! This module provides the record-oriented database API: a [`Database`]
//! opened on a directory for a [`Schema`](crate::schema::Schema), combining
//! the record engines, the key indexes, referential integrity and sequences
//! into one handle.
//!
//! ## Architecture
//!
//! ```text
//! Database
//!   │
//!   ├── DataFile per table ───────── RecordFile (.dat) or VlrFile (.vlr)
//!   ├── BTree per primary/alternate key (.key)
//!   ├── BTree per referenced table (.ref) ─── reference entries
//!   ├── SequenceFile (.seq)
//!   └── Arc<dyn Lock> ─────────────── one acquire/release per operation
//!           │
//!           ▼
//!   HandleCache (shared with other databases) ─── OS descriptors
//! ```
//!
//! ## Operation Overview
//!
//! | Group        | Operations                                                  |
//! |--------------|-------------------------------------------------------------|
//! | lifecycle    | `open`, `builder`, `sync`, `close`, `destroy`               |
//! | modification | `fill_new`, `rec_write`, `delete`                           |
//! | keys         | `key_find`, `key_first`, `key_last`, `key_next`, `key_prev`, `key_read` |
//! | data files   | `rec_first`, `rec_last`, `rec_next`, `rec_prev`, `record_count` |
//! | current      | `current`, `set_current`, `rec_read`, `field_read`, `dependents` |
//! | misc         | `next_sequence`, `make_key`, `key_size`, `record_size`      |
//!
//! ## Usage Example
//!
//! ```ignore
//! let mut db = Database::open("./shop", &schema)?;
//! let customer = schema.table_id("customer")?;
//! let by_id = schema.key_id(customer, "id")?;
//!
//! db.fill_new(customer, &record)?;
//! db.key_find(by_id, &42i32.to_le_bytes())?;
//! let stored = db.rec_read()?;
//! db.close()?;
//! ```
//!
//! ## Thread Safety
//!
//! A `Database` is used through `&mut self` and is not shared between
//! threads. Several handles, in this or other processes, may work on the
//! same directory in [`OpenMode::Shared`]; their operations are serialized
//! by the lock.

mod builder;
mod convert;
#[allow(clippy::module_inception)]
mod database;
mod dml;
mod lifecycle;
mod sequence;

pub use builder::DatabaseBuilder;
pub use database::Database;
pub use sequence::SequenceFile;

/// How a database's files are shared with other openers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Several processes use the files at once; operations are serialized
    /// by a lock file and the engines re-read headers on every operation.
    Shared,
    /// Files are locked against other openers.
    #[default]
    Exclusive,
    /// Single-user access; locks files like `Exclusive`.
    OneUser,
}

impl OpenMode {
    pub fn is_shared(self) -> bool {
        self == OpenMode::Shared
    }
}
