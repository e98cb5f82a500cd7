//! # Record Deletion
//!
//! `delete` removes the current record after the restrict check: if any
//! row of a dependent table still points at it, the delete fails with
//! [`DbError::Restrict`] naming that table and nothing is changed.
//!
//! Once the record is gone from the data file its key entries and the
//! reference entries of its foreign keys are removed. A key entry that
//! cannot be removed is logged and skipped, so one damaged index does not
//! leave the remaining indexes pointing at a deleted record.

use std::sync::Arc;

use eyre::Result;
use tracing::{debug, warn};

use crate::constraints::{self, IndexSet};
use crate::database::Database;

impl Database {
    /// Deletes the current record. No record is current afterwards.
    pub fn delete(&mut self) -> Result<()> {
        self.locked(|db| db.delete_record())
    }

    fn delete_record(&mut self) -> Result<()> {
        let record = self.load_current()?;
        let schema = Arc::clone(&self.schema);
        let def = schema.table(record.table)?;

        constraints::check_dependent_tables(&schema, &mut self.indexes, record.table, record.recno, None)?;
        self.data_file(record.table)?.delete(record.recno)?;

        for &key_id in def.indexed_keys() {
            let key = schema.key(key_id)?;
            if key.is_null(&record.data) {
                continue;
            }
            let value = key.make_key(&record.data);
            if let Err(e) = self.indexes.index(key_id).and_then(|tree| tree.delete(&value, record.recno)) {
                warn!(
                    table = %def.name,
                    key = %key.name,
                    recno = %record.recno,
                    "could not delete key: {:#}",
                    e
                );
            }
        }

        constraints::delete_foreign_keys(
            &schema,
            &mut self.indexes,
            record.table,
            &record.data,
            &record.parents,
            record.recno,
        )?;
        self.current = None;
        debug!(table = %def.name, recno = %record.recno, "deleted record");
        Ok(())
    }
}
