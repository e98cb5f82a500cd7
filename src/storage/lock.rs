//! # Database Lock Capability
//!
//! Every logical database operation (add, find, delete, traversal, sequence
//! allocation) runs between exactly one `acquire` and one `release` of the
//! database's [`Lock`]. The discipline is strictly "acquire, do one
//! operation, release"; locks are never nested and there is no deadlock
//! detection.
//!
//! ## Implementations
//!
//! | Type          | Scope                | Mechanism                           |
//! |---------------|----------------------|-------------------------------------|
//! | `ProcessLock` | threads of a process | `parking_lot::Mutex` + `Condvar`    |
//! | `FileLock`    | processes on a host  | advisory `flock` on a lock file     |
//!
//! `FileLock` is what a database opened in shared mode uses by default, so
//! that several processes working on the same files serialize their
//! operations. A process that dies while holding it releases it implicitly.
//!
//! ## Exclusive File Locks
//!
//! Non-shared opens additionally take a non-blocking exclusive `flock` on each
//! data and index file descriptor ([`try_lock_exclusive`]); a second opener
//! gets [`DbError::NotAvailable`].

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use parking_lot::{Condvar, Mutex};

use crate::error::DbError;

/// Whole-database mutual exclusion injected into a database handle.
pub trait Lock: Send + Sync {
    /// Blocks until the lock is held by the caller.
    fn acquire(&self) -> Result<()>;

    fn release(&self) -> Result<()>;
}

/// Holds a [`Lock`] for the duration of one operation.
pub struct LockGuard<'a> {
    lock: &'a dyn Lock,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(lock: &'a dyn Lock) -> Result<Self> {
        lock.acquire()?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            tracing::warn!("failed to release database lock: {:#}", e);
        }
    }
}

/// In-process lock for databases that are only used from one process.
#[derive(Debug, Default)]
pub struct ProcessLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lock for ProcessLock {
    fn acquire(&self) -> Result<()> {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut held = self.held.lock();
        *held = false;
        self.released.notify_one();
        Ok(())
    }
}

/// Advisory whole-file lock shared between processes.
///
/// The lock file stays open for the life of the `FileLock` and is not counted
/// against the handle cache ceiling. `flock` excludes other open file
/// descriptions, so threads of the same process are additionally serialized
/// through an inner [`ProcessLock`].
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
    local: ProcessLock,
}

impl FileLock {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open lock file '{}'", path.display()))?;
        Ok(Self {
            path,
            file,
            local: ProcessLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Lock for FileLock {
    fn acquire(&self) -> Result<()> {
        self.local.acquire()?;
        if let Err(e) = flock(&self.file, FlockOp::Exclusive) {
            self.local.release()?;
            return Err(e)
                .wrap_err_with(|| format!("failed to lock '{}'", self.path.display()));
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let result = flock(&self.file, FlockOp::Unlock)
            .wrap_err_with(|| format!("failed to unlock '{}'", self.path.display()));
        self.local.release()?;
        result
    }
}

enum FlockOp {
    Exclusive,
    ExclusiveNonBlocking,
    Unlock,
}

#[cfg(unix)]
fn flock(file: &File, op: FlockOp) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match op {
        FlockOp::Exclusive => libc::LOCK_EX,
        FlockOp::ExclusiveNonBlocking => libc::LOCK_EX | libc::LOCK_NB,
        FlockOp::Unlock => libc::LOCK_UN,
    };
    loop {
        // SAFETY: the descriptor belongs to `file`, which is borrowed for the
        // whole call, and flock does not touch memory.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _op: FlockOp) -> io::Result<()> {
    Ok(())
}

/// Takes an exclusive advisory lock on `file` without waiting. Fails with
/// [`DbError::NotAvailable`] when another descriptor holds it.
pub fn try_lock_exclusive(file: &File, path: &Path) -> Result<()> {
    match flock(file, FlockOp::ExclusiveNonBlocking) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(DbError::NotAvailable.into()),
        Err(e) => Err(e).wrap_err_with(|| format!("failed to lock '{}'", path.display())),
    }
}
