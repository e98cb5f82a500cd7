//! # Record Storage
//!
//! Two file formats hold table rows. Which one a table uses is decided by
//! its schema:
//!
//! | Table kind      | File     | Type        | Record id            |
//! |-----------------|----------|-------------|----------------------|
//! | fixed length    | `.dat`   | `RecordFile`| slot number          |
//! | variable length | `.vlr`   | `VlrFile`   | first block address  |
//!
//! Both ids travel through the indexes as an opaque [`RecordNo`], so the key
//! layer never needs to know which format a table uses.
//!
//! ## Fixed Records
//!
//! Every slot has the same size. Active records are chained in insertion
//! order for sequential traversal, and deleted slots are kept on a free list
//! that `add` consumes before growing the file.
//!
//! ## Variable-Length Records
//!
//! Records are split across chains of fixed-size blocks. Only the block
//! chain is stored; a VLR file has no notion of "current record" or
//! sequential order, so traversal of such tables goes through an index.
//!
//! [`RecordNo`]: crate::storage::RecordNo

pub mod fixed;
pub mod vlr;

pub use fixed::RecordFile;
pub use vlr::VlrFile;
