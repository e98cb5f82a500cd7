//! # Typhoon - Embedded Record Database
//!
//! Typhoon is an embedded, schema-driven record database. Tables of
//! fixed-layout records live in their own files, every key has an on-disk
//! B-tree index, and foreign keys between tables are enforced under the
//! restrict rule. There is no query language and no page cache: every
//! logical read or write is a positioned read or write on a file.
//!
//! ## Quick Start
//!
//! ```ignore
//! use typhoon::{Database, FieldType, Schema};
//!
//! let schema = Schema::builder("shop")
//!     .table("customer", |t| {
//!         t.field("id", FieldType::Int)
//!             .array_field("name", FieldType::Str, 20)
//!             .primary_key("id", &["id"])
//!     })
//!     .build()?;
//!
//! let mut db = Database::open("./shop", &schema)?;
//! let customer = schema.table_id("customer")?;
//! db.fill_new(customer, &record)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        Public API (database)             │
//! ├──────────────────────────────────────────┤
//! │  Referential integrity (constraints)     │
//! ├────────────────────┬─────────────────────┤
//! │  B-tree (btree)    │  Records (records)  │
//! │  keys: comparators │  fixed + VLR files  │
//! ├────────────────────┴─────────────────────┤
//! │  Storage: handle cache, headers, locks   │
//! ├──────────────────────────────────────────┤
//! │  OS files (seek + read / write)          │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! database_dir/
//! ├── customer.dat        # fixed-length records
//! ├── note.vlr            # variable-length records
//! ├── customer_id.key     # B-tree index of a key
//! ├── customer.ref        # reference entries of dependent rows
//! ├── shop.seq            # sequence counters
//! └── shop.lck            # lock file (shared mode)
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: tunables and file-format constants
//! - [`error`]: `DbError` kinds carried inside `eyre::Report`
//! - [`storage`]: addresses, headers, the file handle cache, locks
//! - [`keys`]: field types and key comparison
//! - [`btree`]: the on-disk B-tree
//! - [`records`]: fixed-length and variable-length record files
//! - [`schema`]: tables, fields, keys, sequences
//! - [`constraints`]: foreign keys and the restrict rule
//! - [`database`]: the database handle

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod constraints;
pub mod database;
pub mod error;
pub mod keys;
pub mod records;
pub mod schema;
pub mod storage;

pub use database::{Database, DatabaseBuilder, OpenMode};
pub use error::{DbError, ResultExt};
pub use keys::FieldType;
pub use schema::{FieldId, KeyId, Schema, SequenceId, TableId};
pub use storage::{HandleCache, Lock, RecordNo};
