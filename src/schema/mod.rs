//! # Schema Description
//!
//! A [`Schema`] describes a database: its tables with their field layouts,
//! the keys built from those fields, the foreign-key links between tables and
//! the sequences. It is built once with [`Schema::builder`], validated, and
//! then shared read-only by every database opened with it.
//!
//! ## Identifiers
//!
//! | Type         | Indexes into        | Public form            |
//! |--------------|---------------------|------------------------|
//! | `TableId`    | `Schema::tables`    | `(index + 1) * 1000`   |
//! | `FieldId`    | `Schema::fields`    | field index            |
//! | `KeyId`      | `Schema::keys`      | key index              |
//! | `SequenceId` | `Schema::sequences` | sequence index         |
//!
//! Table codes (1000, 2000, ...) are what errors report as the table that
//! caused a foreign-key or restrict violation.
//!
//! ## Files
//!
//! A database directory holds, for a schema named `shop`:
//!
//! ```text
//! customer.dat          fixed-length records of table customer
//! note.vlr              variable-length records of table note
//! customer_id.key       index of key "id" of table customer
//! customer.ref          reference entries of rows depending on customer
//! shop.seq              sequence counters
//! shop.lck              lock file of databases opened in shared mode
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let schema = Schema::builder("shop")
//!     .table("customer", |t| {
//!         t.field("id", FieldType::Int)
//!             .array_field("name", FieldType::Str, 20)
//!             .primary_key("id", &["id"])
//!     })
//!     .table("order", |t| {
//!         t.field("no", FieldType::Int)
//!             .field("customer", FieldType::Int)
//!             .primary_key("no", &["no"])
//!             .foreign_key("customer", "customer", &["customer"])
//!     })
//!     .sequence("order_no", 1, 1, true)
//!     .build()?;
//! ```

mod builder;
pub mod table;

pub use builder::{SchemaBuilder, TableBuilder};
pub use table::{FieldDef, KeyDef, KeyKind, KeyPart, SequenceDef, TableDef, PARENT_REF_SIZE};

use std::fmt;

use eyre::Result;

use crate::config::REC_FACTOR;
use crate::error::DbError;

macro_rules! schema_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(usize);

        impl $name {
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            pub const fn index(self) -> usize {
                self.0
            }
        }
    };
}

schema_id! {
    /// A table of the schema.
    TableId
}

schema_id! {
    /// A field of any table; field ids are unique across the schema.
    FieldId
}

schema_id! {
    /// A key of any table; key ids are unique across the schema.
    KeyId
}

schema_id! {
    SequenceId
}

impl TableId {
    /// The public table code, `(index + 1) * 1000`.
    pub fn code(self) -> u32 {
        (self.0 as u32 + 1) * REC_FACTOR
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u32) -> Option<Self> {
        (code >= REC_FACTOR && code % REC_FACTOR == 0).then(|| Self((code / REC_FACTOR - 1) as usize))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    tables: Vec<TableDef>,
    fields: Vec<FieldDef>,
    keys: Vec<KeyDef>,
    sequences: Vec<SequenceDef>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn keys(&self) -> &[KeyDef] {
        &self.keys
    }

    pub fn sequences(&self) -> &[SequenceDef] {
        &self.sequences
    }

    pub fn table(&self, id: TableId) -> Result<&TableDef> {
        self.tables.get(id.0).ok_or_else(|| DbError::InvalidRecord.into())
    }

    pub fn field(&self, id: FieldId) -> Result<&FieldDef> {
        self.fields.get(id.0).ok_or_else(|| DbError::InvalidField.into())
    }

    pub fn key(&self, id: KeyId) -> Result<&KeyDef> {
        self.keys.get(id.0).ok_or_else(|| DbError::NotKey.into())
    }

    pub fn sequence(&self, id: SequenceId) -> Result<&SequenceDef> {
        self.sequences.get(id.0).ok_or_else(|| DbError::InvalidSequence.into())
    }

    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.tables
            .iter()
            .position(|t| t.name == name)
            .map(TableId)
            .ok_or_else(|| DbError::InvalidRecord.into())
    }

    pub fn field_id(&self, table: TableId, name: &str) -> Result<FieldId> {
        self.table(table)?
            .fields
            .iter()
            .copied()
            .find(|&id| self.fields[id.0].name == name)
            .ok_or_else(|| DbError::InvalidField.into())
    }

    pub fn key_id(&self, table: TableId, name: &str) -> Result<KeyId> {
        self.table(table)?
            .keys
            .iter()
            .copied()
            .find(|&id| self.keys[id.0].name == name)
            .ok_or_else(|| DbError::NotKey.into())
    }

    pub fn sequence_id(&self, name: &str) -> Result<SequenceId> {
        self.sequences
            .iter()
            .position(|s| s.name == name)
            .map(SequenceId)
            .ok_or_else(|| DbError::InvalidSequence.into())
    }

    /// The key whose only field is `field`, for looking keys up by field.
    pub fn field_key(&self, field: FieldId) -> Result<KeyId> {
        self.field(field)?.key.ok_or_else(|| DbError::NotKey.into())
    }

    /// The foreign key of `table` that references `parent`.
    pub fn foreign_key_to(&self, table: TableId, parent: TableId) -> Result<KeyId> {
        self.table(table)?
            .foreign_keys()
            .iter()
            .copied()
            .find(|&id| self.keys[id.0].parent() == Some(parent))
            .ok_or_else(|| DbError::NotFound.into())
    }

    pub fn key_file_name(&self, key: KeyId) -> Result<String> {
        let def = self.key(key)?;
        Ok(format!("{}_{}.key", self.tables[def.table.0].name, def.name))
    }

    pub fn sequence_file_name(&self) -> String {
        format!("{}.seq", self.name)
    }

    pub fn lock_file_name(&self) -> String {
        format!("{}.lck", self.name)
    }

    /// Every file a database of this schema may create, lock file included.
    pub fn file_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for table in &self.tables {
            names.push(table.data_file_name());
            if table.has_dependents() {
                names.push(table.ref_file_name());
            }
            for &key in table.indexed_keys() {
                let def = &self.keys[key.0];
                names.push(format!("{}_{}.key", table.name, def.name));
            }
        }
        names.push(self.sequence_file_name());
        names.push(self.lock_file_name());
        names
    }
}
