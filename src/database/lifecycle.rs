//! # Database Lifecycle
//!
//! Opening a database registers every file of the schema with the handle
//! cache and opens the engine on top of it:
//!
//! ```text
//! <table>.dat / <table>.vlr     RecordFile / VlrFile     one per table
//! <table>_<key>.key             BTree (key comparator)   one per primary/alternate key
//! <table>.ref                   BTree (RefEntry order)   one per table with dependents
//! <schema>.seq                  SequenceFile
//! ```
//!
//! Missing files are created with their headers. The whole open runs under
//! the database lock, so a process that opens a shared database while
//! another one creates it never sees half-written headers.
//!
//! ## Open Modes
//!
//! In `Exclusive` and `OneUser` mode every file is registered as exclusive
//! and holds an advisory lock for as long as its descriptor is open; a
//! second opener fails with [`DbError::NotAvailable`](crate::DbError). In
//! `Shared` mode files are not locked individually and the engines re-read
//! their headers on every operation instead.
//!
//! ## Close
//!
//! There is nothing to write back on close: every operation went straight
//! to the files. [`Database::close`] syncs them to stable storage; dropping
//! the handle without closing just releases the descriptors.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::{debug, info};

use super::database::{DataFile, Indexes};
use super::sequence::SequenceFile;
use super::{Database, OpenMode};
use crate::btree::{BTree, BTreeConfig};
use crate::keys::{KeyComparator, REF_ENTRY_SIZE};
use crate::records::{RecordFile, VlrFile};
use crate::schema::Schema;
use crate::storage::{FileKind, FileLock, HandleCache, Lock, LockGuard, ProcessLock};

impl Database {
    /// Opens (creating if needed) the database of `schema` in `dir` in
    /// exclusive mode with the process-wide handle cache.
    pub fn open<P: AsRef<Path>>(dir: P, schema: &Schema) -> Result<Self> {
        Self::builder().path(dir).open(schema)
    }

    pub(super) fn open_with(
        dir: &Path,
        schema: &Schema,
        mode: OpenMode,
        cache: Arc<HandleCache>,
        lock: Option<Arc<dyn Lock>>,
    ) -> Result<Self> {
        fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create database directory '{}'", dir.display()))?;
        let schema = Arc::new(schema.clone());

        let lock: Arc<dyn Lock> = match lock {
            Some(lock) => lock,
            None if mode.is_shared() => Arc::new(FileLock::open(dir.join(schema.lock_file_name()))?),
            None => Arc::new(ProcessLock::new()),
        };

        let (data, indexes, sequences) = {
            let _guard = LockGuard::acquire(lock.as_ref())?;
            open_files(dir, &schema, mode, &cache)
                .wrap_err_with(|| format!("failed to open database '{}' in '{}'", schema.name(), dir.display()))?
        };

        info!(
            path = %dir.display(),
            schema = %schema.name(),
            mode = ?mode,
            tables = schema.tables().len(),
            "opened database"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            schema,
            mode,
            cache,
            lock,
            data,
            indexes,
            sequences,
            current: None,
            current_key: None,
        })
    }

    /// Flushes every file of the database to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.locked(|db| {
            for file in &db.data {
                file.sync()?;
            }
            for tree in db.indexes.keys.iter().chain(&db.indexes.refs).flatten() {
                tree.sync()?;
            }
            db.sequences.sync()
        })
    }

    /// Syncs and closes the database.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }

    /// Removes every file a database of `schema` keeps in `dir`, and `dir`
    /// itself when that leaves it empty. The database must not be open.
    pub fn destroy<P: AsRef<Path>>(dir: P, schema: &Schema) -> Result<()> {
        let dir = dir.as_ref();
        let mut removed = 0;
        for name in schema.file_names() {
            let path = dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).wrap_err_with(|| format!("failed to remove '{}'", path.display()));
                }
            }
        }
        if fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none()) {
            fs::remove_dir(dir).wrap_err_with(|| format!("failed to remove '{}'", dir.display()))?;
        }
        info!(path = %dir.display(), schema = %schema.name(), files = removed, "destroyed database");
        Ok(())
    }
}

fn open_files(
    dir: &Path,
    schema: &Schema,
    mode: OpenMode,
    cache: &Arc<HandleCache>,
) -> Result<(Vec<DataFile>, Indexes, SequenceFile)> {
    let shared = mode.is_shared();
    let exclusive = !shared;

    let mut data = Vec::with_capacity(schema.tables().len());
    for table in schema.tables() {
        let path = dir.join(table.data_file_name());
        let file = if table.variable_length {
            let file = cache.register(&path, FileKind::Vlr, exclusive)?;
            DataFile::Vlr(VlrFile::open(file, table.block_size, schema.name(), shared)?)
        } else {
            let file = cache.register(&path, FileKind::Data, exclusive)?;
            DataFile::Fixed(RecordFile::open(file, table.stored_size(), shared)?)
        };
        data.push(file);
    }

    let mut indexes = Indexes {
        keys: schema.keys().iter().map(|_| None).collect(),
        refs: schema.tables().iter().map(|_| None).collect(),
    };
    for table in schema.tables() {
        for &key_id in table.indexed_keys() {
            let key = schema.key(key_id)?;
            let file = cache.register(dir.join(schema.key_file_name(key_id)?), FileKind::Index, exclusive)?;
            let config = BTreeConfig::new(key.size, key.comparator())
                .node_size(table.node_size)
                .dups(!key.unique)
                .shared(shared);
            indexes.keys[key_id.index()] = Some(BTree::open(file, config)?);
        }
        if table.has_dependents() {
            let file = cache.register(dir.join(table.ref_file_name()), FileKind::RefIndex, exclusive)?;
            let config = BTreeConfig::new(REF_ENTRY_SIZE, KeyComparator::RefEntry)
                .node_size(table.node_size)
                .shared(shared);
            indexes.refs[table.id.index()] = Some(BTree::open(file, config)?);
        }
        debug!(table = %table.name, keys = table.indexed_keys().len(), "opened table");
    }

    let file = cache.register(dir.join(schema.sequence_file_name()), FileKind::Sequence, exclusive)?;
    let sequences = SequenceFile::open(file, schema.sequences())?;
    Ok((data, indexes, sequences))
}
