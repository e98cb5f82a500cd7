//! # Variable-Length Record File
//!
//! Tables with variable-length fields keep their records in a block file.
//! A record is stored in a chain of fixed-size blocks and is identified by
//! the address of its first block.
//!
//! ```text
//! Block layout (block_size bytes)
//! Offset  Size              Field
//! 0       4                 next   next block of the record, 0 for the last
//! 4       4                 size   total record size, first block only
//! 8       block_size - 8    payload
//! ```
//!
//! The 64-byte header occupies the first `ceil(64 / block_size)` blocks, so
//! block numbers below that are invalid.
//!
//! ## Free Chain
//!
//! Deleted blocks are linked through `next` starting at the header's
//! `first_free`. The chain always ends at the block just past the end of the
//! file: a fresh file starts with `first_free` pointing there, and deleting a
//! record splices its whole chain in front of the current head. Allocation
//! therefore consumes freed blocks first and grows the file only once the
//! chain reaches end of file.

use std::path::Path;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::debug;
use zerocopy::IntoBytes;

use crate::config::{MIN_VLR_BLOCK_SIZE, VLR_BLOCK_PREAMBLE_SIZE, VLR_HEADER_SIZE};
use crate::error::DbError;
use crate::storage::{BlockAddr, BlockPreamble, CachedFile, VlrHeader};

#[derive(Debug)]
pub struct VlrFile {
    file: CachedFile,
    header: VlrHeader,
    block_size: usize,
    first_block: u32,
    shared: bool,
}

impl VlrFile {
    /// Opens the block file. `block_size` and `user_id` are only used when
    /// the file is created; an existing file keeps its own block size.
    pub fn open(file: CachedFile, block_size: usize, user_id: &str, shared: bool) -> Result<Self> {
        let header = if file.len()? == 0 {
            ensure!(
                block_size >= MIN_VLR_BLOCK_SIZE && block_size <= u32::MAX as usize,
                "VLR block size {} is below the minimum of {}",
                block_size,
                MIN_VLR_BLOCK_SIZE
            );
            let first_block = VLR_HEADER_SIZE.div_ceil(block_size);
            let header = VlrHeader::new(block_size as u32, BlockAddr::new(first_block as u32), user_id);
            let mut image = vec![0u8; first_block * block_size];
            image[..VLR_HEADER_SIZE].copy_from_slice(header.as_bytes());
            file.write_at(0, &image)?;
            header
        } else {
            let header = read_header(&file)?;
            ensure!(
                header.block_size() as usize >= MIN_VLR_BLOCK_SIZE,
                "'{}' declares an invalid block size {}",
                file.path().display(),
                header.block_size()
            );
            if header.block_size() as usize != block_size {
                debug!(
                    path = %file.path().display(),
                    stored = header.block_size(),
                    requested = block_size,
                    "using stored VLR block size"
                );
            }
            header
        };

        let block_size = header.block_size() as usize;
        Ok(Self {
            file,
            header,
            block_size,
            first_block: VLR_HEADER_SIZE.div_ceil(block_size) as u32,
            shared,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn user_id(&self) -> &str {
        self.header.user_id()
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    pub fn count(&mut self) -> Result<u32> {
        self.load_header()?;
        Ok(self.header.records())
    }

    fn payload_size(&self) -> usize {
        self.block_size - VLR_BLOCK_PREAMBLE_SIZE
    }

    /// Stores `data` in a chain of blocks and returns the first block.
    /// Empty data still occupies one block.
    pub fn add(&mut self, data: &[u8]) -> Result<BlockAddr> {
        let size = u32::try_from(data.len()).map_err(|_| eyre!("VLR record too large"))?;
        self.load_header()?;

        let payload = self.payload_size();
        let first = self.header.first_free();
        let mut addr = first;
        let mut remaining = data;
        let mut block = vec![0u8; self.block_size];

        loop {
            let take = remaining.len().min(payload);
            let more = remaining.len() > payload;
            let eof_block = self.file.len()?.div_ceil(self.block_size as u64);

            let next_free = if addr.get() as u64 >= eof_block {
                BlockAddr::new(addr.get() + 1)
            } else {
                let stored = self.read_preamble(addr)?.ok_or_else(|| {
                    eyre!("free chain of '{}' points past end of file", self.path().display())
                })?;
                match stored.next().non_zero() {
                    Some(next) => next,
                    None => BlockAddr::new(eof_block as u32),
                }
            };
            let next = if more { next_free } else { BlockAddr::NONE };
            let stored_size = if addr == first { size } else { 0 };

            block.fill(0);
            block[..VLR_BLOCK_PREAMBLE_SIZE]
                .copy_from_slice(BlockPreamble::new(next, stored_size).as_bytes());
            block[VLR_BLOCK_PREAMBLE_SIZE..VLR_BLOCK_PREAMBLE_SIZE + take]
                .copy_from_slice(&remaining[..take]);
            self.file
                .write_at(addr.offset(self.block_size), &block)
                .wrap_err_with(|| format!("failed to write VLR block {}", addr))?;

            self.header.set_first_free(next_free);
            remaining = &remaining[take..];
            if !more {
                break;
            }
            addr = next;
        }

        self.header.set_records(self.header.records() + 1);
        self.store_header()?;
        Ok(first)
    }

    /// Reads the record whose first block is `addr`.
    pub fn read(&mut self, addr: BlockAddr) -> Result<Vec<u8>> {
        self.check_address(addr)?;
        if (addr.get() as u64 + 1) * self.block_size as u64 > self.file.len()? {
            return Err(DbError::NotFound.into());
        }

        let payload = self.payload_size();
        let mut block = vec![0u8; self.block_size];
        let mut at = addr;
        let mut out = Vec::new();
        let mut size = None;

        loop {
            if !self.file.read_exact_at(at.offset(self.block_size), &mut block)? {
                bail!("VLR record {} in '{}' is truncated", addr, self.path().display());
            }
            let preamble = BlockPreamble::from_bytes(&block)?;
            let total = *size.get_or_insert(preamble.size() as usize);
            if out.capacity() == 0 {
                out.reserve_exact(total);
            }
            let take = (total - out.len()).min(payload);
            out.extend_from_slice(&block[VLR_BLOCK_PREAMBLE_SIZE..VLR_BLOCK_PREAMBLE_SIZE + take]);

            if out.len() == total {
                return Ok(out);
            }
            at = preamble.next();
            if at.is_none() {
                bail!(
                    "VLR record {} in '{}' ends after {} of {} bytes",
                    addr,
                    self.path().display(),
                    out.len(),
                    total
                );
            }
        }
    }

    /// Size in bytes of the record at `addr`, from its first block.
    pub fn data_size(&mut self, addr: BlockAddr) -> Result<usize> {
        self.check_address(addr)?;
        let preamble = self.read_preamble(addr)?.ok_or(DbError::NotFound)?;
        Ok(preamble.size() as usize)
    }

    /// Replaces the record at `addr` and returns where the new contents
    /// live. Deleting puts `addr` at the head of the free chain and adding
    /// starts there, so the address stays the same.
    pub fn write(&mut self, addr: BlockAddr, data: &[u8]) -> Result<BlockAddr> {
        self.delete(addr)?;
        self.add(data)
    }

    /// Returns every block of the record at `addr` to the free chain.
    pub fn delete(&mut self, addr: BlockAddr) -> Result<()> {
        self.check_address(addr)?;
        self.load_header()?;

        let mut preamble = self.read_preamble(addr)?.ok_or(DbError::NotFound)?;
        preamble.set_size(0);
        self.write_preamble(addr, &preamble)?;

        let mut tail = addr;
        let mut steps = 0u64;
        let limit = self.file.len()? / self.block_size as u64;
        while !preamble.next().is_none() {
            tail = preamble.next();
            preamble = self
                .read_preamble(tail)?
                .ok_or_else(|| eyre!("VLR chain of {} runs past end of file", addr))?;
            steps += 1;
            ensure!(steps <= limit, "VLR chain of {} in '{}' is cyclic", addr, self.path().display());
        }

        preamble.set_next(self.header.first_free());
        self.write_preamble(tail, &preamble)?;

        self.header.set_first_free(addr);
        self.header.set_records(self.header.records().saturating_sub(1));
        self.store_header()
    }

    fn check_address(&self, addr: BlockAddr) -> Result<()> {
        if addr.get() < self.first_block {
            return Err(DbError::InvalidAddress.into());
        }
        Ok(())
    }

    fn read_preamble(&self, addr: BlockAddr) -> Result<Option<BlockPreamble>> {
        let mut raw = [0u8; VLR_BLOCK_PREAMBLE_SIZE];
        if !self.file.read_exact_at(addr.offset(self.block_size), &mut raw)? {
            return Ok(None);
        }
        BlockPreamble::from_bytes(&raw).map(Some)
    }

    fn write_preamble(&self, addr: BlockAddr, preamble: &BlockPreamble) -> Result<()> {
        self.file.write_at(addr.offset(self.block_size), preamble.as_bytes())
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

fn read_header(file: &CachedFile) -> Result<VlrHeader> {
    let mut raw = [0u8; VLR_HEADER_SIZE];
    if !file.read_exact_at(0, &mut raw)? {
        bail!("'{}' is too short to hold a VLR header", file.path().display());
    }
    VlrHeader::from_bytes(&raw)
        .wrap_err_with(|| format!("invalid VLR header in '{}'", file.path().display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultExt;
    use crate::storage::{FileKind, HandleCache};
    use tempfile::tempdir;

    fn open(dir: &Path, block_size: usize) -> VlrFile {
        let cache = HandleCache::new(4).unwrap();
        let file = cache.register(dir.join("t.vlr"), FileKind::Vlr, false).unwrap();
        VlrFile::open(file, block_size, "test", false).unwrap()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn header_occupies_leading_blocks() {
        let dir = tempdir().unwrap();
        let mut vlr = open(dir.path(), 32);

        let addr = vlr.add(b"abc").unwrap();

        assert_eq!(addr, BlockAddr::new(2));
        assert_eq!(vlr.read(BlockAddr::new(1)).db_error(), Some(DbError::InvalidAddress));
        assert_eq!(vlr.user_id(), "test");
    }

    #[test]
    fn multi_block_record_round_trip() {
        let dir = tempdir().unwrap();
        let mut vlr = open(dir.path(), 32);
        let data = pattern(500, 3);

        let addr = vlr.add(&data).unwrap();

        assert_eq!(vlr.read(addr).unwrap(), data);
        assert_eq!(vlr.data_size(addr).unwrap(), 500);
        // 24 payload bytes per block
        assert_eq!(vlr.file.len().unwrap(), (2 + 21) * 32);
    }

    #[test]
    fn empty_record_takes_one_block() {
        let dir = tempdir().unwrap();
        let mut vlr = open(dir.path(), 64);

        let a = vlr.add(&[]).unwrap();
        let b = vlr.add(b"x").unwrap();

        assert_eq!(b.get(), a.get() + 1);
        assert!(vlr.read(a).unwrap().is_empty());
        assert_eq!(vlr.count().unwrap(), 2);
    }

    #[test]
    fn read_past_end_is_not_found() {
        let dir = tempdir().unwrap();
        let mut vlr = open(dir.path(), 64);
        vlr.add(b"one").unwrap();

        assert_eq!(vlr.read(BlockAddr::new(50)).db_error(), Some(DbError::NotFound));
    }

    #[test]
    fn freed_blocks_are_reused_before_growing() {
        let dir = tempdir().unwrap();
        let mut vlr = open(dir.path(), 32);
        let big = vlr.add(&pattern(200, 1)).unwrap();
        let keep = vlr.add(&pattern(40, 2)).unwrap();
        let len = vlr.file.len().unwrap();

        vlr.delete(big).unwrap();
        let a = vlr.add(&pattern(100, 4)).unwrap();
        let b = vlr.add(&pattern(90, 5)).unwrap();

        assert_eq!(a, big);
        assert_eq!(vlr.file.len().unwrap(), len);
        assert_eq!(vlr.read(a).unwrap(), pattern(100, 4));
        assert_eq!(vlr.read(b).unwrap(), pattern(90, 5));
        assert_eq!(vlr.read(keep).unwrap(), pattern(40, 2));
        assert_eq!(vlr.count().unwrap(), 3);
    }

    #[test]
    fn write_replaces_contents() {
        let dir = tempdir().unwrap();
        let mut vlr = open(dir.path(), 32);
        let addr = vlr.add(&pattern(60, 1)).unwrap();

        let moved = vlr.write(addr, &pattern(30, 9)).unwrap();

        assert_eq!(moved, addr);
        assert_eq!(vlr.read(moved).unwrap(), pattern(30, 9));
        assert_eq!(vlr.count().unwrap(), 1);
    }

    #[test]
    fn reopen_keeps_stored_block_size() {
        let dir = tempdir().unwrap();
        let addr = {
            let mut vlr = open(dir.path(), 48);
            vlr.add(&pattern(100, 7)).unwrap()
        };

        let mut vlr = open(dir.path(), 256);

        assert_eq!(vlr.block_size(), 48);
        assert_eq!(vlr.read(addr).unwrap(), pattern(100, 7));
    }
}
