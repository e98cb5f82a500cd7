//! # Record Update
//!
//! `rec_write` replaces the current record. Only what changed is checked
//! and re-indexed:
//!
//! - foreign keys whose value changed are resolved again;
//! - if the primary key changed, no dependent row may still point at the
//!   record ([`DbError::Restrict`]);
//! - unique keys whose value changed are probed for duplicates;
//! - every changed key loses its old entry (unless it was null) and gains
//!   the new one (unless it is now null).
//!
//! The record keeps its record number. For variable-length tables the
//! rewritten chain starts at the same first block.

use std::sync::Arc;

use eyre::Result;
use smallvec::SmallVec;
use tracing::{debug, warn};

use super::tag_duplicate;
use crate::constraints::{self, IndexSet, OldRecord};
use crate::database::{convert, Database};
use crate::error::{DbError, ResultExt};
use crate::schema::KeyId;

impl Database {
    /// Overwrites the current record with `record`.
    pub fn rec_write(&mut self, record: &[u8]) -> Result<()> {
        self.locked(|db| db.update_record(record))
    }

    fn update_record(&mut self, record: &[u8]) -> Result<()> {
        let old = self.load_current()?;
        let schema = Arc::clone(&self.schema);
        let def = schema.table(old.table)?;
        convert::check_size(def, record)?;

        let mut parents = old.parents.clone();
        let changes = constraints::check_foreign_keys(
            &schema,
            &mut self.indexes,
            old.table,
            record,
            Some(OldRecord {
                data: &old.data,
                parents: &old.parents,
            }),
            &mut parents,
        )?;
        constraints::check_dependent_tables(
            &schema,
            &mut self.indexes,
            old.table,
            old.recno,
            Some((record, &old.data)),
        )?;

        let mut changed: SmallVec<[KeyId; 8]> = SmallVec::new();
        for &key_id in def.indexed_keys() {
            let key = schema.key(key_id)?;
            if !key.differs(record, &old.data) {
                continue;
            }
            changed.push(key_id);
            if key.unique && !key.is_null(record) {
                let value = key.make_key(record);
                if self.indexes.index(key_id)?.find(&value).optional()?.is_some() {
                    return Err(DbError::Duplicate { key: Some(key_id) }.into());
                }
            }
        }

        let image = convert::encode(&schema, def, &parents, record)?;

        for &key_id in &changed {
            let key = schema.key(key_id)?;
            let tree = self.indexes.index(key_id)?;
            if !key.is_null(&old.data) && tree.delete(&key.make_key(&old.data), old.recno).optional()?.is_none() {
                warn!(table = %def.name, key = %key.name, recno = %old.recno, "old key value was not indexed");
            }
            if !key.is_null(record) {
                tree.add(&key.make_key(record), old.recno)
                    .map_err(|e| tag_duplicate(e, key_id))?;
            }
        }

        self.data_file(old.table)?.write(old.recno, &image)?;
        constraints::update_foreign_keys(&mut self.indexes, old.table, old.recno, &changes)?;
        debug!(table = %def.name, recno = %old.recno, rekeyed = changed.len(), "rewrote record");
        Ok(())
    }
}
