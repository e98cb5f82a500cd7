//! # Sequence File
//!
//! Sequence counters live in `<schema>.seq`, one little-endian `u64` per
//! sequence in schema order. Allocating a number reads the counter, writes
//! back the advanced value and returns the value read; the database lock
//! makes that read-modify-write atomic across processes.
//!
//! Counters missing from the file (a new file, or a schema that gained
//! sequences) are initialized to their start values when the file is opened.

use eyre::{Result, WrapErr};
use tracing::debug;

use crate::error::DbError;
use crate::schema::{SequenceDef, SequenceId};
use crate::storage::CachedFile;

const SLOT_SIZE: usize = 8;

#[derive(Debug)]
pub struct SequenceFile {
    file: CachedFile,
    defs: Vec<SequenceDef>,
}

impl SequenceFile {
    pub fn open(file: CachedFile, defs: &[SequenceDef]) -> Result<Self> {
        let present = (file.len()? / SLOT_SIZE as u64) as usize;
        if present < defs.len() {
            let mut image = Vec::with_capacity((defs.len() - present) * SLOT_SIZE);
            for def in &defs[present..] {
                image.extend_from_slice(&def.start.to_le_bytes());
            }
            file.write_at((present * SLOT_SIZE) as u64, &image)
                .wrap_err("failed to initialize sequence counters")?;
            debug!(path = %file.path().display(), added = defs.len() - present, "initialized sequences");
        }
        Ok(Self { file, defs: defs.to_vec() })
    }

    /// Returns the next number of sequence `id` and advances the counter.
    pub fn next(&mut self, id: SequenceId) -> Result<u64> {
        let def = self
            .defs
            .get(id.index())
            .ok_or(DbError::InvalidSequence)?;
        let offset = (id.index() * SLOT_SIZE) as u64;

        let mut raw = [0u8; SLOT_SIZE];
        let value = if self.file.read_exact_at(offset, &mut raw)? {
            u64::from_le_bytes(raw)
        } else {
            def.start
        };
        self.file.write_at(offset, &def.advance(value).to_le_bytes())?;
        Ok(value)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}
