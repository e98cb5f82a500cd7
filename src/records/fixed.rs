//! # Fixed-Length Record File
//!
//! Records of one table all have the same size and live in numbered slots.
//! The byte offset of record `n` is `n * record_size`, where every slot is a
//! 9-byte preamble followed by the record data:
//!
//! ```text
//! Offset  Size       Field
//! 0       4          prev     previous active record, or next free slot
//! 4       4          next     next active record, or next deleted record
//! 8       1          flags    bit 0: deleted
//! 9       data_size  data
//! ```
//!
//! ## Chains
//!
//! Active records form a doubly linked list in insertion order, anchored in
//! the header's `first` and `last`. Deleted records form a singly linked
//! free list through `next`, anchored in `first_deleted`; their `prev` is 0.
//! Adding a record pops the free list before growing the file, so a slot
//! freed by a delete is reused by the next add.
//!
//! ## Header Region
//!
//! The 48-byte header sits at offset 0 and occupies whole slots: the first
//! valid record number is `ceil(48 / record_size)`. Record number 0 is never
//! valid and means "no record".

use std::path::Path;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::debug;
use zerocopy::IntoBytes;

use crate::config::{RECORD_HEADER_SIZE, RECORD_PREAMBLE_SIZE};
use crate::error::DbError;
use crate::storage::{CachedFile, RecordFileHeader, RecordNo, RecordPreamble};

const NEXT_FIELD: u64 = 4;

#[derive(Debug)]
pub struct RecordFile {
    file: CachedFile,
    header: RecordFileHeader,
    data_size: usize,
    record_size: usize,
    first_possible: u32,
    shared: bool,
    current: RecordNo,
    links: RecordPreamble,
}

impl RecordFile {
    /// Opens the record file, creating the header when the file is empty.
    pub fn open(file: CachedFile, data_size: usize, shared: bool) -> Result<Self> {
        ensure!(data_size > 0, "record data size must be positive");
        let record_size = data_size + RECORD_PREAMBLE_SIZE;
        let first_possible = RECORD_HEADER_SIZE.div_ceil(record_size);

        let header = if file.len()? == 0 {
            let header = RecordFileHeader::new(data_size as u32);
            let mut image = vec![0u8; first_possible * record_size];
            image[..RECORD_HEADER_SIZE].copy_from_slice(header.as_bytes());
            file.write_at(0, &image)?;
            header
        } else {
            let header = read_header(&file)?;
            ensure!(
                header.data_size() as usize == data_size,
                "record file '{}' holds {}-byte records, expected {}",
                file.path().display(),
                header.data_size(),
                data_size
            );
            header
        };

        Ok(Self {
            file,
            header,
            data_size,
            record_size,
            first_possible: first_possible as u32,
            shared,
            current: RecordNo::NONE,
            links: RecordPreamble::default(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    /// Lowest record number that can hold a record.
    pub fn first_possible(&self) -> RecordNo {
        RecordNo::new(self.first_possible)
    }

    pub fn count(&mut self) -> Result<u32> {
        self.load_header()?;
        Ok(self.header.records())
    }

    /// The record last read, if any.
    pub fn current(&self) -> Option<RecordNo> {
        self.current.non_zero()
    }

    /// Makes `recno` current, failing like [`read`](Self::read) if it does not
    /// hold a live record.
    pub fn set_current(&mut self, recno: RecordNo) -> Result<()> {
        self.read(recno).map(|_| ())
    }

    pub fn clear_current(&mut self) {
        self.current = RecordNo::NONE;
    }

    /// Stores `data` in a free slot and appends it to the active chain.
    pub fn add(&mut self, data: &[u8]) -> Result<RecordNo> {
        self.check_data(data)?;
        self.load_header()?;

        let free = self.header.first_deleted();
        let recno = if !free.is_none() {
            let links = self
                .read_links(free)?
                .ok_or_else(|| eyre!("free list of '{}' points past end of file", self.path().display()))?;
            self.header.set_first_deleted(links.next());
            debug!(recno = %free, "reusing deleted record slot");
            free
        } else {
            let slots = self.file.len()?.div_ceil(self.record_size as u64);
            let slots = u32::try_from(slots).map_err(|_| eyre!("record file too large"))?;
            RecordNo::new(slots.max(self.first_possible))
        };

        let mut links = RecordPreamble::default();
        if self.header.records() > 0 {
            let last = self.header.last();
            self.file
                .write_at(last.offset(self.record_size) + NEXT_FIELD, &recno.get().to_le_bytes())?;
            links.set_prev(last);
        } else {
            self.header.set_first(recno);
        }
        links.set_next(RecordNo::NONE);

        let mut slot = Vec::with_capacity(self.record_size);
        slot.extend_from_slice(links.as_bytes());
        slot.extend_from_slice(data);
        self.file
            .write_at(recno.offset(self.record_size), &slot)
            .wrap_err_with(|| format!("failed to write record {}", recno))?;

        self.header.set_last(recno);
        self.header.set_records(self.header.records() + 1);
        self.store_header()?;

        self.current = recno;
        self.links = links;
        Ok(recno)
    }

    /// Overwrites the data of `recno` in place; the chains are not touched.
    pub fn write(&mut self, recno: RecordNo, data: &[u8]) -> Result<()> {
        self.check_address(recno)?;
        self.check_data(data)?;
        self.file
            .write_at(recno.offset(self.record_size) + RECORD_PREAMBLE_SIZE as u64, data)
    }

    /// Reads `recno` and makes it current.
    pub fn read(&mut self, recno: RecordNo) -> Result<Vec<u8>> {
        self.check_address(recno)?;
        let mut slot = vec![0u8; self.record_size];
        if !self.file.read_exact_at(recno.offset(self.record_size), &mut slot)? {
            return Err(DbError::NotFound.into());
        }
        let links = RecordPreamble::from_bytes(&slot)?;
        if links.is_deleted() {
            return Err(DbError::Deleted.into());
        }
        self.current = recno;
        self.links = links;
        slot.drain(..RECORD_PREAMBLE_SIZE);
        Ok(slot)
    }

    /// Unlinks `recno` from the active chain and pushes it on the free list.
    pub fn delete(&mut self, recno: RecordNo) -> Result<()> {
        self.check_address(recno)?;
        self.load_header()?;

        let mut links = self.read_links(recno)?.ok_or(DbError::NotFound)?;
        if links.is_deleted() {
            return Err(DbError::Deleted.into());
        }

        if self.header.first() == recno {
            self.header.set_first(links.next());
        } else {
            self.file.write_at(
                links.prev().offset(self.record_size) + NEXT_FIELD,
                &links.next().get().to_le_bytes(),
            )?;
        }
        if self.header.last() == recno {
            self.header.set_last(links.prev());
        } else {
            self.file
                .write_at(links.next().offset(self.record_size), &links.prev().get().to_le_bytes())?;
        }

        links.set_deleted(true);
        links.set_next(self.header.first_deleted());
        links.set_prev(RecordNo::NONE);
        self.file.write_at(recno.offset(self.record_size), links.as_bytes())?;

        self.header.set_first_deleted(recno);
        self.header.set_records(self.header.records().saturating_sub(1));
        self.store_header()?;

        if self.current == recno {
            self.current = RecordNo::NONE;
        }
        Ok(())
    }

    pub fn first(&mut self) -> Result<(RecordNo, Vec<u8>)> {
        self.load_header()?;
        let first = self.header.first();
        self.read_at_chain(first)
    }

    pub fn last(&mut self) -> Result<(RecordNo, Vec<u8>)> {
        self.load_header()?;
        let last = self.header.last();
        self.read_at_chain(last)
    }

    /// Follows the active chain forward from the current record, or starts
    /// at the first record when none is current.
    pub fn next(&mut self) -> Result<(RecordNo, Vec<u8>)> {
        if self.current.is_none() {
            return self.first();
        }
        let next = self.links.next();
        self.read_at_chain(next)
    }

    pub fn prev(&mut self) -> Result<(RecordNo, Vec<u8>)> {
        if self.current.is_none() {
            return self.last();
        }
        let prev = self.links.prev();
        self.read_at_chain(prev)
    }

    /// Reads a chain neighbour; the end of the chain is `NotFound` and leaves
    /// no record current.
    fn read_at_chain(&mut self, recno: RecordNo) -> Result<(RecordNo, Vec<u8>)> {
        if recno.is_none() {
            self.current = RecordNo::NONE;
            return Err(DbError::NotFound.into());
        }
        let data = self.read(recno)?;
        Ok((recno, data))
    }

    fn read_links(&self, recno: RecordNo) -> Result<Option<RecordPreamble>> {
        let mut raw = [0u8; RECORD_PREAMBLE_SIZE];
        if !self.file.read_exact_at(recno.offset(self.record_size), &mut raw)? {
            return Ok(None);
        }
        RecordPreamble::from_bytes(&raw).map(Some)
    }

    fn check_address(&self, recno: RecordNo) -> Result<()> {
        if recno.get() < self.first_possible {
            return Err(DbError::InvalidAddress.into());
        }
        Ok(())
    }

    fn check_data(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.data_size {
            bail!(
                "record of {} bytes given to '{}' with {}-byte records",
                data.len(),
                self.path().display(),
                self.data_size
            );
        }
        Ok(())
    }

    fn load_header(&mut self) -> Result<()> {
        if self.shared {
            self.header = read_header(&self.file)?;
        }
        Ok(())
    }

    fn store_header(&self) -> Result<()> {
        self.file.write_at(0, self.header.as_bytes())
    }
}

fn read_header(file: &CachedFile) -> Result<RecordFileHeader> {
    let mut raw = [0u8; RECORD_HEADER_SIZE];
    if !file.read_exact_at(0, &mut raw)? {
        bail!("'{}' is too short to hold a record file header", file.path().display());
    }
    RecordFileHeader::from_bytes(&raw)
        .wrap_err_with(|| format!("invalid record file header in '{}'", file.path().display()))
}
