//! # Database Handle
//!
//! [`Database`] composes the storage engines of one schema into the
//! record-oriented API: one data file per table, one B-tree per primary or
//! alternate key, one reference-entry B-tree per table that foreign keys
//! point at, and the sequence file.
//!
//! ## Current Record
//!
//! The handle keeps one current record, a `(table, record number)` pair.
//! Key operations, data-file traversal, `fill_new` and `set_current`
//! position it; `rec_read`, `rec_write`, `field_read` and `delete` act on it.
//! Records are read from disk by every operation that needs them; there is
//! no record buffer that could go stale when another process writes.
//!
//! | Operation           | On success           | On failure           |
//! |---------------------|----------------------|----------------------|
//! | `key_*`             | record of the key    | unchanged            |
//! | `rec_first/.../prev`| record reached       | cleared              |
//! | `fill_new`          | the new record       | cleared              |
//! | `delete`            | cleared              | unchanged            |
//!
//! ## Locking
//!
//! Every public operation that touches files runs between one acquire and
//! one release of the injected [`Lock`]. Operations never call each other
//! through the public surface, so the lock is never taken twice.
//!
//! ## Variable-Length Tables
//!
//! A variable-length table lives in a VLR file and is addressed by the first
//! block of each record. Such files have no record chain, so `rec_first` and
//! friends fail with [`DbError::InvalidRecord`] for them; they are reached
//! through their keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};

use super::convert;
use super::sequence::SequenceFile;
use super::OpenMode;
use crate::btree::BTree;
use crate::constraints::{self, IndexSet, ParentRefs};
use crate::error::DbError;
use crate::records::{RecordFile, VlrFile};
use crate::schema::{FieldId, KeyId, Schema, SequenceId, TableId};
use crate::storage::{BlockAddr, HandleCache, Lock, LockGuard, RecordNo};

/// The data file of one table.
#[derive(Debug)]
pub(super) enum DataFile {
    Fixed(RecordFile),
    Vlr(VlrFile),
}

impl DataFile {
    pub(super) fn add(&mut self, image: &[u8]) -> Result<RecordNo> {
        match self {
            DataFile::Fixed(file) => file.add(image),
            DataFile::Vlr(file) => file.add(image).map(RecordNo::from),
        }
    }

    /// Reads the stored image of `recno`. A VLR record whose first block
    /// is on the free chain reads as [`DbError::Deleted`].
    pub(super) fn read(&mut self, recno: RecordNo) -> Result<Vec<u8>> {
        match self {
            DataFile::Fixed(file) => file.read(recno),
            DataFile::Vlr(file) => {
                let image = file.read(BlockAddr::from(recno))?;
                if image.is_empty() {
                    return Err(DbError::Deleted.into());
                }
                Ok(image)
            }
        }
    }

    pub(super) fn write(&mut self, recno: RecordNo, image: &[u8]) -> Result<()> {
        match self {
            DataFile::Fixed(file) => file.write(recno, image),
            DataFile::Vlr(file) => {
                let addr = file.write(BlockAddr::from(recno), image)?;
                ensure!(
                    RecordNo::from(addr) == recno,
                    "rewritten record {} of '{}' moved to block {}",
                    recno,
                    file.path().display(),
                    addr
                );
                Ok(())
            }
        }
    }

    pub(super) fn delete(&mut self, recno: RecordNo) -> Result<()> {
        match self {
            DataFile::Fixed(file) => file.delete(recno),
            DataFile::Vlr(file) => file.delete(BlockAddr::from(recno)),
        }
    }

    pub(super) fn count(&mut self) -> Result<u32> {
        match self {
            DataFile::Fixed(file) => file.count(),
            DataFile::Vlr(file) => file.count(),
        }
    }

    pub(super) fn sync(&self) -> Result<()> {
        match self {
            DataFile::Fixed(file) => file.sync(),
            DataFile::Vlr(file) => file.sync(),
        }
    }
}

/// The open indexes of a database, by key and by referenced table.
#[derive(Debug, Default)]
pub(super) struct Indexes {
    pub(super) keys: Vec<Option<BTree>>,
    pub(super) refs: Vec<Option<BTree>>,
}

impl IndexSet for Indexes {
    fn index(&mut self, key: KeyId) -> Result<&mut BTree> {
        self.keys
            .get_mut(key.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| DbError::NotKey.into())
    }

    fn ref_index(&mut self, table: TableId) -> Result<&mut BTree> {
        self.refs
            .get_mut(table.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| DbError::InvalidRecord.into())
    }
}

/// The current record as read from disk.
#[derive(Debug)]
pub(super) struct LoadedRecord {
    pub(super) table: TableId,
    pub(super) recno: RecordNo,
    pub(super) parents: ParentRefs,
    pub(super) data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    First,
    Last,
    Next,
    Prev,
}

pub struct Database {
    pub(super) dir: PathBuf,
    pub(super) schema: Arc<Schema>,
    pub(super) mode: OpenMode,
    pub(super) cache: Arc<HandleCache>,
    pub(super) lock: Arc<dyn Lock>,
    pub(super) data: Vec<DataFile>,
    pub(super) indexes: Indexes,
    pub(super) sequences: SequenceFile,
    pub(super) current: Option<(TableId, RecordNo)>,
    pub(super) current_key: Option<KeyId>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("schema", &self.schema.name())
            .field("mode", &self.mode)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn handle_cache(&self) -> &Arc<HandleCache> {
        &self.cache
    }

    /// The current record as `(table, record number)`.
    pub fn current(&self) -> Option<(TableId, RecordNo)> {
        self.current
    }

    /// Makes `recno` of `table` the current record. The record itself is not
    /// read; a bad record number surfaces on the next `rec_read`.
    pub fn set_current(&mut self, table: TableId, recno: RecordNo) -> Result<()> {
        self.schema.table(table)?;
        self.current = recno.non_zero().map(|recno| (table, recno));
        Ok(())
    }

    pub fn record_size(&self, table: TableId) -> Result<usize> {
        Ok(self.schema.table(table)?.size)
    }

    pub fn key_size(&self, key: KeyId) -> Result<usize> {
        Ok(self.schema.key(key)?.size)
    }

    /// Builds the value of `key` from a record buffer of its table.
    pub fn make_key(&self, key: KeyId, record: &[u8]) -> Result<Vec<u8>> {
        let def = self.schema.key(key)?;
        convert::check_size(self.schema.table(def.table)?, record)?;
        Ok(def.make_key(record))
    }

    pub fn record_count(&mut self, table: TableId) -> Result<u32> {
        self.locked(|db| db.data_file(table)?.count())
    }

    /// Positions on the record holding `value` in `key` and returns its
    /// record number.
    pub fn key_find(&mut self, key: KeyId, value: &[u8]) -> Result<RecordNo> {
        self.locked(|db| {
            let def = db.schema.key(key)?;
            if def.is_foreign() {
                return Err(DbError::NotKey).wrap_err_with(|| {
                    format!("foreign key '{}' has no index of its own", def.name)
                });
            }
            if value.len() != def.size {
                return Err(DbError::InvalidParameter).wrap_err_with(|| {
                    format!("{}-byte value for {}-byte key '{}'", value.len(), def.size, def.name)
                });
            }
            let table = def.table;
            db.current_key = Some(key);
            let recno = db.indexes.index(key)?.find(value)?;
            db.current = Some((table, recno));
            Ok(recno)
        })
    }

    pub fn key_first(&mut self, key: KeyId) -> Result<RecordNo> {
        self.key_move(key, Move::First)
    }

    pub fn key_last(&mut self, key: KeyId) -> Result<RecordNo> {
        self.key_move(key, Move::Last)
    }

    /// Steps to the next key in `key`'s order. After a failed `key_find`
    /// this is the smallest key above the probe.
    pub fn key_next(&mut self, key: KeyId) -> Result<RecordNo> {
        self.key_move(key, Move::Next)
    }

    pub fn key_prev(&mut self, key: KeyId) -> Result<RecordNo> {
        self.key_move(key, Move::Prev)
    }

    /// The value of the key last positioned on.
    pub fn key_read(&mut self) -> Result<Vec<u8>> {
        let key = self.current_key.ok_or(DbError::NoCurrent)?;
        let tree = self.indexes.index(key)?;
        Ok(tree.current_key()?.to_vec())
    }

    pub fn rec_first(&mut self, table: TableId) -> Result<RecordNo> {
        self.rec_move(table, Move::First)
    }

    pub fn rec_last(&mut self, table: TableId) -> Result<RecordNo> {
        self.rec_move(table, Move::Last)
    }

    /// Follows the data file's record chain. Starts at the first record
    /// when no record of `table` is current.
    pub fn rec_next(&mut self, table: TableId) -> Result<RecordNo> {
        self.rec_move(table, Move::Next)
    }

    pub fn rec_prev(&mut self, table: TableId) -> Result<RecordNo> {
        self.rec_move(table, Move::Prev)
    }

    /// Reads the current record into a buffer of the table's record size.
    pub fn rec_read(&mut self) -> Result<Vec<u8>> {
        self.locked(|db| db.load_current().map(|record| record.data))
    }

    /// Reads one field of the current record. Variable-length fields yield
    /// only their used elements.
    pub fn field_read(&mut self, field: FieldId) -> Result<Vec<u8>> {
        let schema = Arc::clone(&self.schema);
        let def = schema.field(field)?;
        self.locked(|db| {
            let record = db.load_current()?;
            if def.table != record.table {
                return Err(DbError::InvalidField).wrap_err_with(|| {
                    format!("field '{}' is not part of the current record's table", def.name)
                });
            }
            let len = match def.count_field {
                Some(count) => schema.field(count)?.read_count(&record.data) * def.elem_size,
                None => def.size,
            };
            Ok(record.data[def.offset..def.offset + len.min(def.size)].to_vec())
        })
    }

    /// Allocates the next number of sequence `id`.
    pub fn next_sequence(&mut self, id: SequenceId) -> Result<u64> {
        self.locked(|db| db.sequences.next(id))
    }

    /// Rows of other tables whose foreign keys point at the current record.
    pub fn dependents(&mut self) -> Result<Vec<(TableId, RecordNo)>> {
        let (table, recno) = self.current.ok_or(DbError::NoCurrent)?;
        if !self.schema.table(table)?.has_dependents() {
            return Ok(Vec::new());
        }
        self.locked(|db| constraints::dependents(&mut db.indexes, table, recno))
    }

    /// Runs `op` while holding the database lock.
    pub(super) fn locked<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let lock = Arc::clone(&self.lock);
        let _guard = LockGuard::acquire(lock.as_ref())?;
        op(self)
    }

    pub(super) fn data_file(&mut self, table: TableId) -> Result<&mut DataFile> {
        self.data
            .get_mut(table.index())
            .ok_or_else(|| DbError::InvalidRecord.into())
    }

    /// Reads and decodes the current record.
    pub(super) fn load_current(&mut self) -> Result<LoadedRecord> {
        let (table, recno) = self.current.ok_or(DbError::NoCurrent)?;
        let schema = Arc::clone(&self.schema);
        let stored = self.data_file(table)?.read(recno)?;
        let (parents, data) = convert::decode(&schema, schema.table(table)?, &stored)?;
        Ok(LoadedRecord {
            table,
            recno,
            parents,
            data,
        })
    }

    fn key_move(&mut self, key: KeyId, direction: Move) -> Result<RecordNo> {
        self.locked(|db| {
            let def = db.schema.key(key)?;
            if def.is_foreign() {
                return Err(DbError::NotKey.into());
            }
            let table = def.table;
            db.current_key = Some(key);
            let tree = db.indexes.index(key)?;
            let recno = match direction {
                Move::First => tree.first()?,
                Move::Last => tree.last()?,
                Move::Next => tree.next()?,
                Move::Prev => tree.prev()?,
            };
            db.current = Some((table, recno));
            Ok(recno)
        })
    }

    fn rec_move(&mut self, table: TableId, direction: Move) -> Result<RecordNo> {
        self.locked(|db| {
            let current = db.current.filter(|&(t, _)| t == table).map(|(_, recno)| recno);
            let result = match db.data_file(table)? {
                DataFile::Fixed(file) => step(file, current, direction),
                DataFile::Vlr(file) => Err(DbError::InvalidRecord).wrap_err_with(|| {
                    format!("'{}' holds variable-length records and has no record chain", file.path().display())
                }),
            };
            match result {
                Ok(recno) => {
                    db.current = Some((table, recno));
                    Ok(recno)
                }
                Err(e) => {
                    db.current = None;
                    Err(e)
                }
            }
        })
    }
}

/// Moves the record file's position, first re-aligning it with the
/// database's current record when that lies in the same table.
fn step(file: &mut RecordFile, current: Option<RecordNo>, direction: Move) -> Result<RecordNo> {
    if matches!(direction, Move::Next | Move::Prev) {
        if let Some(recno) = current {
            if file.current() != Some(recno) {
                file.set_current(recno)?;
            }
        }
    }
    let (recno, _) = match direction {
        Move::First => file.first()?,
        Move::Last => file.last()?,
        Move::Next => file.next()?,
        Move::Prev => file.prev()?,
    };
    Ok(recno)
}

impl Drop for Database {
    fn drop(&mut self) {
        tracing::info!(path = %self.dir.display(), schema = %self.schema.name(), "closed database");
    }
}
