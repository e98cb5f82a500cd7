//! # Record Insertion
//!
//! `fill_new` stores a new record and makes it current:
//!
//! 1. Resolve every non-null foreign key to its parent row
//!    ([`DbError::Foreign`] if one is missing).
//! 2. Probe every unique, non-null key ([`DbError::Duplicate`] naming the
//!    key on a hit).
//! 3. Encode the stored image (parent references, then the record or its
//!    compressed form) and add it to the data file.
//! 4. Index every non-null key and add the reference entries.

use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use super::tag_duplicate;
use crate::constraints::{self, IndexSet, ParentRefs};
use crate::database::{convert, Database};
use crate::error::{DbError, ResultExt};
use crate::schema::TableId;
use crate::storage::RecordNo;

impl Database {
    /// Adds `record` to `table` and returns its record number.
    pub fn fill_new(&mut self, table: TableId, record: &[u8]) -> Result<RecordNo> {
        self.locked(|db| db.insert_record(table, record))
    }

    fn insert_record(&mut self, table: TableId, record: &[u8]) -> Result<RecordNo> {
        let schema = Arc::clone(&self.schema);
        let def = schema.table(table)?;
        convert::check_size(def, record)?;
        self.current = None;

        let mut parents = ParentRefs::new(def.foreign_keys().len());
        let changes =
            constraints::check_foreign_keys(&schema, &mut self.indexes, table, record, None, &mut parents)?;

        for &key_id in def.indexed_keys() {
            let key = schema.key(key_id)?;
            if !key.unique || key.is_null(record) {
                continue;
            }
            let value = key.make_key(record);
            if self.indexes.index(key_id)?.find(&value).optional()?.is_some() {
                return Err(DbError::Duplicate { key: Some(key_id) }.into());
            }
        }

        let image = convert::encode(&schema, def, &parents, record)?;
        let recno = self.data_file(table)?.add(&image)?;
        self.current = Some((table, recno));

        for &key_id in def.indexed_keys() {
            let key = schema.key(key_id)?;
            if key.is_null(record) {
                continue;
            }
            self.indexes
                .index(key_id)?
                .add(&key.make_key(record), recno)
                .map_err(|e| tag_duplicate(e, key_id))?;
        }

        constraints::update_foreign_keys(&mut self.indexes, table, recno, &changes)?;
        debug!(table = %def.name, recno = %recno, "added record");
        Ok(recno)
    }
}
