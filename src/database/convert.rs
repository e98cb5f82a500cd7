//! # Record Image Conversion
//!
//! Converts between the record buffer callers work with and the image
//! stored in a data file.
//!
//! ```text
//! stored image = parent refs (4 bytes per foreign key) ++ body
//!
//! fixed table:     body = record buffer, unchanged
//! variable table:  body = static prefix ++ used part of each variable field
//! ```
//!
//! ## Compression of Variable-Length Tables
//!
//! Everything before the first variable field is copied as is. Each
//! variable field then contributes `count * element size` bytes, where the
//! count is read from its count field. A count above the field's capacity
//! fails with [`DbError::RecordSize`] naming the variable field.
//!
//! Expanding reverses this into a zeroed buffer of the full record size, so
//! the unused tail of every variable field reads back as zeros. Count fields
//! always sit in the static prefix, which is why variable fields must come
//! last.

use eyre::{bail, Result, WrapErr};

use crate::constraints::ParentRefs;
use crate::error::DbError;
use crate::schema::{Schema, TableDef};

/// Builds the stored image of `record`.
pub(super) fn encode(schema: &Schema, table: &TableDef, parents: &ParentRefs, record: &[u8]) -> Result<Vec<u8>> {
    check_size(table, record)?;
    let mut out = Vec::with_capacity(table.stored_size());
    parents.write_to(&mut out);
    if table.variable_length {
        compress(schema, table, record, &mut out)?;
    } else {
        out.extend_from_slice(record);
    }
    Ok(out)
}

/// Splits a stored image into parent refs and the record buffer.
pub(super) fn decode(schema: &Schema, table: &TableDef, stored: &[u8]) -> Result<(ParentRefs, Vec<u8>)> {
    let preamble = table.preamble_size();
    if stored.len() < preamble {
        bail!("stored record of table '{}' is only {} bytes", table.name, stored.len());
    }
    let parents = ParentRefs::read(&stored[..preamble], table.foreign_keys().len());
    let body = &stored[preamble..];
    let record = if table.variable_length {
        expand(schema, table, body)?
    } else {
        body.to_vec()
    };
    Ok((parents, record))
}

pub(super) fn check_size(table: &TableDef, record: &[u8]) -> Result<()> {
    if record.len() != table.size {
        return Err(DbError::InvalidParameter).wrap_err_with(|| {
            format!(
                "record buffer of {} bytes for table '{}' of {} bytes",
                record.len(),
                table.name,
                table.size
            )
        });
    }
    Ok(())
}

fn compress(schema: &Schema, table: &TableDef, record: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let Some(first) = table.first_variable else {
        out.extend_from_slice(record);
        return Ok(());
    };
    let prefix = schema.field(first)?.offset;
    out.extend_from_slice(&record[..prefix]);

    for &id in &table.fields[table.fields.iter().position(|&f| f == first).unwrap_or(0)..] {
        let field = schema.field(id)?;
        let Some(count_field) = field.count_field else { continue };
        let used = schema.field(count_field)?.read_count(record) * field.elem_size;
        if used > field.size {
            return Err(DbError::RecordSize { field: id }.into());
        }
        out.extend_from_slice(&record[field.offset..field.offset + used]);
    }
    Ok(())
}

fn expand(schema: &Schema, table: &TableDef, body: &[u8]) -> Result<Vec<u8>> {
    let mut record = vec![0u8; table.size];
    let Some(first) = table.first_variable else {
        let len = body.len().min(table.size);
        record[..len].copy_from_slice(&body[..len]);
        return Ok(record);
    };
    let prefix = schema.field(first)?.offset;
    if body.len() < prefix {
        bail!("stored record of table '{}' is shorter than its static part", table.name);
    }
    record[..prefix].copy_from_slice(&body[..prefix]);

    let mut at = prefix;
    for &id in &table.fields[table.fields.iter().position(|&f| f == first).unwrap_or(0)..] {
        let field = schema.field(id)?;
        let Some(count_field) = field.count_field else { continue };
        let used = schema.field(count_field)?.read_count(&record) * field.elem_size;
        if used > field.size || at + used > body.len() {
            return Err(DbError::RecordSize { field: id })
                .wrap_err_with(|| format!("stored record of table '{}' is inconsistent", table.name));
        }
        record[field.offset..field.offset + used].copy_from_slice(&body[at..at + used]);
        at += used;
    }
    Ok(record)
}
