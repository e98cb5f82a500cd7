//! # Storage Layer
//!
//! The storage layer is everything below the B-tree and record engines:
//! typed on-disk addresses, the fixed-layout file headers, the dynamic file
//! handle cache through which every physical read and write passes, and the
//! locking primitives.
//!
//! ## Control Flow
//!
//! ```text
//! constraints / database
//!        │
//!        ▼
//! btree, records::fixed, records::vlr      (logical structures)
//!        │  read_at / write_at / len / set_len
//!        ▼
//! storage::file_manager::CachedFile        (reopens on demand, LRU stamps)
//!        │  seek + read / write
//!        ▼
//! OS file descriptors                      (bounded by the cache ceiling)
//! ```
//!
//! ## Module Overview
//!
//! - [`address`]: `NodeAddr`, `RecordNo`, `BlockAddr` newtypes
//! - [`headers`]: zerocopy header and preamble layouts with version checks
//! - [`file_manager`]: `HandleCache` and `CachedFile`
//! - [`lock`]: the `Lock` capability, `ProcessLock`, `FileLock`

pub mod address;
pub mod file_manager;
pub mod headers;
pub mod lock;

pub use address::{BlockAddr, NodeAddr, RecordNo};
pub use file_manager::{CacheStats, CachedFile, FileKind, HandleCache};
pub use headers::{BTreeHeader, BlockPreamble, RecordFileHeader, RecordPreamble, VlrHeader};
pub use lock::{FileLock, Lock, LockGuard, ProcessLock};
