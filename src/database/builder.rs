//! # Database Builder
//!
//! `DatabaseBuilder` configures how a database directory is opened. Every
//! setting has a default, so the shortest form is
//! `Database::builder().path(dir).open(&schema)`.
//!
//! ## Configuration Options
//!
//! | Option         | Default                                   | Description                         |
//! |----------------|-------------------------------------------|-------------------------------------|
//! | `path`         | current directory                         | directory holding the files         |
//! | `mode`         | `OpenMode::Exclusive`                     | shared or exclusive file access     |
//! | `handle_cache` | `HandleCache::shared()` (20 descriptors)  | descriptor ceiling and LRU state    |
//! | `lock`         | `FileLock` on `<schema>.lck` when shared, `ProcessLock` otherwise | whole-database lock |
//!
//! ## Usage Examples
//!
//! ```ignore
//! // Two databases bounded by one small descriptor budget.
//! let cache = HandleCache::new(4)?;
//! let orders = Database::builder()
//!     .path("./orders")
//!     .handle_cache(Arc::clone(&cache))
//!     .open(&schema)?;
//! let archive = Database::builder()
//!     .path("./archive")
//!     .handle_cache(cache)
//!     .open(&schema)?;
//!
//! // Several processes working on the same files.
//! let db = Database::builder().path("./shop").mode(OpenMode::Shared).open(&schema)?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Result;

use super::{Database, OpenMode};
use crate::schema::Schema;
use crate::storage::{HandleCache, Lock};

pub struct DatabaseBuilder {
    path: PathBuf,
    mode: OpenMode,
    cache: Option<Arc<HandleCache>>,
    lock: Option<Arc<dyn Lock>>,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("."),
            mode: OpenMode::Exclusive,
            cache: None,
            lock: None,
        }
    }

    /// Directory of the database; created on open if missing.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Registers the database's files with `cache` instead of the
    /// process-wide one.
    pub fn handle_cache(mut self, cache: Arc<HandleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Serializes operations through `lock` instead of the mode's default.
    pub fn lock(mut self, lock: Arc<dyn Lock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn open(self, schema: &Schema) -> Result<Database> {
        let cache = self.cache.unwrap_or_else(HandleCache::shared);
        Database::open_with(&self.path, schema, self.mode, cache, self.lock)
    }
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }
}
