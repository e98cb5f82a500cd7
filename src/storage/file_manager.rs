//! # Dynamic File Handle Cache
//!
//! Every physical file of every open database (index files, reference-entry
//! index files, fixed record files, VLR files, the sequence file) is
//! registered with a [`HandleCache`]. The cache bounds the number of OS
//! descriptors that are open at the same time to a ceiling shared by all
//! databases using it, closing the least-recently-used descriptor under
//! pressure and transparently reopening files on demand.
//!
//! ## Lifecycle of a Handle
//!
//! ```text
//!   register ──> open ──(evicted)──> closed ──(next access)──> open ...
//!                  │                                              │
//!                  └──────────────────── drop ◄──────────────────┘
//! ```
//!
//! A [`CachedFile`] is created when a database opens its files and lives
//! until the database closes. Its descriptor may be closed and reopened many
//! times in between. Dropping it deregisters the handle.
//!
//! ## LRU Across Databases
//!
//! Each access stamps the handle with a fresh value of a monotonic sequence
//! counter. When a closed handle must be reopened and the ceiling is reached,
//! the open handle with the smallest stamp, in any database sharing the
//! cache, is closed first. If nothing can be closed the access fails with
//! [`DbError::NoEvictableHandle`].
//!
//! ## Sharing
//!
//! [`HandleCache::shared`] returns the process-wide instance with the default
//! ceiling of 20 descriptors. Databases built with an explicit cache share
//! only that cache, which tests use to observe the ceiling in isolation.
//!
//! ## I/O Model
//!
//! There is no page cache: every logical read or write is a seek followed by
//! a read or write on the descriptor, performed while the cache mutex is held
//! so that the descriptor cannot be evicted mid-operation.
//!
//! ## Exclusive Handles
//!
//! Files of a database opened in a non-shared mode are registered as
//! exclusive and hold an advisory `flock` on their descriptor. The lock is
//! dropped together with the descriptor on eviction and re-taken on reopen;
//! if another opener grabbed the file in between, the access fails with
//! [`DbError::NotAvailable`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::lock::try_lock_exclusive;
use crate::config::{DEFAULT_MAX_OPEN_FILES, MIN_MAX_OPEN_FILES};
use crate::error::DbError;

static SHARED_CACHE: OnceLock<Arc<HandleCache>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// B-tree index over a table key.
    Index,
    /// B-tree of reference entries for a table referenced by foreign keys.
    RefIndex,
    /// Fixed-length record file.
    Data,
    /// Variable-length record file.
    Vlr,
    /// Sequence counters.
    Sequence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Descriptors opened, including reopens after eviction.
    pub opens: u64,
    /// Descriptors closed, including evictions.
    pub closes: u64,
    pub evictions: u64,
    pub open_now: usize,
    /// Highest number of simultaneously open descriptors observed.
    pub peak_open: usize,
    pub registered: usize,
}

#[derive(Debug)]
struct Slot {
    path: PathBuf,
    kind: FileKind,
    file: Option<File>,
    stamp: u64,
    exclusive: bool,
}

#[derive(Debug)]
struct CacheState {
    max_open: usize,
    open_count: usize,
    clock: u64,
    next_id: u64,
    slots: HashMap<u64, Slot>,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) -> Result<()> {
        let victim = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.file.is_some())
            .min_by_key(|(_, slot)| slot.stamp)
            .map(|(id, _)| *id);

        let Some(victim) = victim else {
            warn!(
                open = self.open_count,
                max = self.max_open,
                "no open file handle to evict"
            );
            return Err(DbError::NoEvictableHandle.into());
        };

        if let Some(slot) = self.slots.get_mut(&victim) {
            slot.file = None;
            debug!(path = %slot.path.display(), kind = ?slot.kind, "evicted file handle");
        }
        self.open_count -= 1;
        self.stats.closes += 1;
        self.stats.evictions += 1;
        Ok(())
    }

    /// Makes sure the descriptor of `id` is open and marks it most recently
    /// used.
    fn check_file(&mut self, id: u64) -> Result<&mut File> {
        let stamp = self.tick();

        let needs_open = match self.slots.get(&id) {
            Some(slot) => slot.file.is_none(),
            None => eyre::bail!("file handle {} is not registered", id),
        };

        if needs_open {
            while self.open_count >= self.max_open {
                self.evict_lru()?;
            }

            let (path, exclusive) = match self.slots.get(&id) {
                Some(slot) => (slot.path.clone(), slot.exclusive),
                None => eyre::bail!("file handle {} is not registered", id),
            };
            let file = open_file(&path)?;
            if exclusive {
                try_lock_exclusive(&file, &path)?;
            }

            self.open_count += 1;
            self.stats.opens += 1;
            self.stats.peak_open = self.stats.peak_open.max(self.open_count);
            debug!(path = %path.display(), open = self.open_count, "opened file handle");

            if let Some(slot) = self.slots.get_mut(&id) {
                slot.file = Some(file);
            }
        }

        match self.slots.get_mut(&id) {
            Some(Slot {
                file: Some(file),
                stamp: slot_stamp,
                ..
            }) => {
                *slot_stamp = stamp;
                Ok(file)
            }
            _ => eyre::bail!("file handle {} vanished while opening", id),
        }
    }
}

fn open_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .wrap_err_with(|| format!("failed to open '{}'", path.display()))
}

/// Bounded set of OS descriptors shared by the files of one or more
/// databases.
#[derive(Debug)]
pub struct HandleCache {
    state: Mutex<CacheState>,
}

impl HandleCache {
    /// Creates a cache with the given descriptor ceiling. Ceilings below 2
    /// are rejected with [`DbError::InvalidParameter`].
    pub fn new(max_open: usize) -> Result<Arc<Self>> {
        if max_open < MIN_MAX_OPEN_FILES {
            return Err(DbError::InvalidParameter).wrap_err_with(|| {
                format!("max open files must be at least {}", MIN_MAX_OPEN_FILES)
            });
        }
        Ok(Arc::new(Self {
            state: Mutex::new(CacheState {
                max_open,
                open_count: 0,
                clock: 0,
                next_id: 1,
                slots: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }))
    }

    /// The process-wide cache used by databases that are not given one.
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED_CACHE.get_or_init(|| {
            Arc::new(Self {
                state: Mutex::new(CacheState {
                    max_open: DEFAULT_MAX_OPEN_FILES,
                    open_count: 0,
                    clock: 0,
                    next_id: 1,
                    slots: HashMap::new(),
                    stats: CacheStats::default(),
                }),
            })
        }))
    }

    pub fn max_open(&self) -> usize {
        self.state.lock().max_open
    }

    /// Changes the ceiling. Lowering it below the number of open descriptors
    /// closes least-recently-used descriptors right away.
    pub fn set_max_open(&self, max_open: usize) -> Result<()> {
        if max_open < MIN_MAX_OPEN_FILES {
            return Err(DbError::InvalidParameter).wrap_err_with(|| {
                format!("max open files must be at least {}", MIN_MAX_OPEN_FILES)
            });
        }
        let mut state = self.state.lock();
        while state.open_count > max_open {
            state.evict_lru().wrap_err("cannot shrink the open file ceiling")?;
        }
        info!(from = state.max_open, to = max_open, "changed open file ceiling");
        state.max_open = max_open;
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            open_now: state.open_count,
            registered: state.slots.len(),
            ..state.stats
        }
    }

    /// Registers `path` (creating the file if needed) and opens it. An
    /// exclusive registration fails with [`DbError::NotAvailable`] if another
    /// descriptor holds the file's lock.
    pub fn register(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
        kind: FileKind,
        exclusive: bool,
    ) -> Result<CachedFile> {
        let path = path.as_ref().to_path_buf();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.slots.insert(
                id,
                Slot {
                    path: path.clone(),
                    kind,
                    file: None,
                    stamp: 0,
                    exclusive,
                },
            );
            id
        };

        let handle = CachedFile {
            cache: Arc::clone(self),
            id,
            kind,
            path,
        };
        // Dropping `handle` on failure deregisters the slot again.
        handle.with_file(|_| Ok(()))?;
        Ok(handle)
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.remove(&id) {
            if slot.file.is_some() {
                state.open_count -= 1;
                state.stats.closes += 1;
            }
        }
    }
}

/// A file registered with a [`HandleCache`]. All I/O goes through the cache so
/// the descriptor can be closed and reopened behind the caller's back.
#[derive(Debug)]
pub struct CachedFile {
    cache: Arc<HandleCache>,
    id: u64,
    kind: FileKind,
    path: PathBuf,
}

impl CachedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Whether the descriptor is currently open (not evicted).
    pub fn is_open(&self) -> bool {
        let state = self.cache.state.lock();
        state
            .slots
            .get(&self.id)
            .map(|slot| slot.file.is_some())
            .unwrap_or(false)
    }

    fn with_file<R>(&self, op: impl FnOnce(&mut File) -> io::Result<R>) -> Result<R> {
        let mut state = self.cache.state.lock();
        let file = state.check_file(self.id)?;
        op(file).wrap_err_with(|| format!("I/O error on '{}'", self.path.display()))
    }

    /// Reads into `buf` starting at `offset`, stopping early only at end of
    /// file. Returns the number of bytes read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut filled = 0;
            while filled < buf.len() {
                match file.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(filled)
        })
        .wrap_err_with(|| format!("failed to read {} bytes at offset {}", buf.len(), offset))
    }

    /// Reads exactly `buf.len()` bytes, returning `false` when the range lies
    /// (partly) beyond the end of the file.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
        Ok(self.read_at(offset, buf)? == buf.len())
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)
        })
        .wrap_err_with(|| format!("failed to write {} bytes at offset {}", buf.len(), offset))
    }

    pub fn len(&self) -> Result<u64> {
        self.with_file(|file| file.seek(SeekFrom::End(0)))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn set_len(&self, len: u64) -> Result<()> {
        self.with_file(|file| file.set_len(len))
    }

    pub fn sync(&self) -> Result<()> {
        self.with_file(|file| file.sync_all())
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultExt;
    use tempfile::tempdir;

    #[test]
    fn ceiling_below_two_is_rejected() {
        assert_eq!(HandleCache::new(1).db_error(), Some(DbError::InvalidParameter));
        assert!(HandleCache::new(2).is_ok());
    }

    #[test]
    fn register_opens_and_drop_closes() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(4).unwrap();

        let file = cache.register(dir.path().join("a.dat"), FileKind::Data, false).unwrap();
        assert!(file.is_open());
        assert_eq!(cache.open_count(), 1);

        drop(file);
        assert_eq!(cache.open_count(), 0);
        assert_eq!(cache.stats().registered, 0);
    }

    #[test]
    fn least_recently_used_handle_is_evicted() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(2).unwrap();

        let a = cache.register(dir.path().join("a"), FileKind::Data, false).unwrap();
        let b = cache.register(dir.path().join("b"), FileKind::Index, false).unwrap();
        a.write_at(0, b"touch a").unwrap();

        let c = cache.register(dir.path().join("c"), FileKind::Vlr, false).unwrap();

        assert!(a.is_open());
        assert!(!b.is_open());
        assert!(c.is_open());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn evicted_handle_reopens_transparently() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(2).unwrap();

        let a = cache.register(dir.path().join("a"), FileKind::Data, false).unwrap();
        a.write_at(0, b"hello").unwrap();
        let _b = cache.register(dir.path().join("b"), FileKind::Data, false).unwrap();
        let _c = cache.register(dir.path().join("c"), FileKind::Data, false).unwrap();
        assert!(!a.is_open());

        let mut buf = [0u8; 5];
        assert!(a.read_exact_at(0, &mut buf).unwrap());

        assert_eq!(&buf, b"hello");
        assert!(a.is_open());
    }

    #[test]
    fn open_descriptors_never_exceed_ceiling() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(3).unwrap();

        let files: Vec<_> = (0..10)
            .map(|i| {
                cache
                    .register(dir.path().join(format!("f{}", i)), FileKind::Data, false)
                    .unwrap()
            })
            .collect();
        for round in 0..5u8 {
            for file in &files {
                file.write_at(0, &[round]).unwrap();
            }
        }

        let stats = cache.stats();
        assert!(stats.peak_open <= 3, "peak {}", stats.peak_open);
        assert_eq!(stats.open_now, 3);
        assert_eq!(stats.opens - stats.closes, 3);
    }

    #[test]
    fn shrinking_ceiling_closes_files() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(5).unwrap();
        let _files: Vec<_> = (0..5)
            .map(|i| {
                cache
                    .register(dir.path().join(format!("f{}", i)), FileKind::Index, false)
                    .unwrap()
            })
            .collect();

        cache.set_max_open(2).unwrap();

        assert_eq!(cache.open_count(), 2);
        assert_eq!(cache.max_open(), 2);
    }

    #[test]
    fn read_past_end_reports_short_read() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(2).unwrap();
        let file = cache.register(dir.path().join("a"), FileKind::Data, false).unwrap();
        file.write_at(0, b"abc").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(1, &mut buf).unwrap(), 2);
        assert!(!file.read_exact_at(0, &mut buf).unwrap());
        assert_eq!(file.len().unwrap(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn exclusive_registration_conflicts() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(4).unwrap();
        let path = dir.path().join("x.key");

        let _first = cache.register(&path, FileKind::Index, true).unwrap();
        let second = cache.register(&path, FileKind::Index, true);

        assert_eq!(second.db_error(), Some(DbError::NotAvailable));
        assert_eq!(cache.stats().registered, 1);
    }
}
