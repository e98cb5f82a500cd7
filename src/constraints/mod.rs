//! # Referential Integrity
//!
//! Foreign keys link a dependent row to a row of its parent table through
//! the parent's primary key. Every link is enforced under the restrict rule:
//! a parent row cannot be deleted, nor its primary key changed, while a
//! dependent row still points at it.
//!
//! ## Bookkeeping
//!
//! Two structures keep the links cheap to check:
//!
//! 1. **Parent references.** Each stored record starts with one record
//!    number per foreign key ([`ParentRefs`]): the parent row the key
//!    resolved to when it was last written, or 0 for a null key.
//!
//! 2. **Reference entries.** A table with dependents owns a `.ref` index of
//!    [`RefEntry`] values `(parent, dependent table, dependent row)`. The
//!    dependents of one parent row form a contiguous run in that index, so
//!    the restrict check is one positioned lookup.
//!
//! ## Write Protocol
//!
//! ```text
//! fill_new / rec_write                    delete
//!   check_foreign_keys   -> RefChanges      check_dependent_tables
//!   (rec_write) check_dependent_tables      remove record and keys
//!   store record and keys                   delete_foreign_keys
//!   update_foreign_keys(RefChanges)
//! ```
//!
//! `check_foreign_keys` only reads. It resolves every foreign key that is new
//! or changed, fills in the new parent references, and returns the list of
//! reference-entry changes that `update_foreign_keys` applies once the
//! record itself has been stored. Null optional keys are neither checked
//! nor referenced.

use eyre::Result;
use smallvec::SmallVec;
use tracing::debug;

use crate::btree::BTree;
use crate::error::{DbError, ResultExt};
use crate::keys::RefEntry;
use crate::schema::{KeyId, Schema, TableId, PARENT_REF_SIZE};
use crate::storage::RecordNo;

/// Access to the indexes of an open database.
pub trait IndexSet {
    /// The index file of a primary or alternate key.
    fn index(&mut self, key: KeyId) -> Result<&mut BTree>;

    /// The reference-entry index of a table with dependents.
    fn ref_index(&mut self, table: TableId) -> Result<&mut BTree>;
}

/// Parent record numbers stored in front of a record, one per foreign key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentRefs(SmallVec<[RecordNo; 4]>);

impl ParentRefs {
    pub fn new(count: usize) -> Self {
        Self(SmallVec::from_elem(RecordNo::NONE, count))
    }

    pub fn read(bytes: &[u8], count: usize) -> Self {
        let mut refs: SmallVec<[RecordNo; 4]> = bytes
            .chunks_exact(PARENT_REF_SIZE)
            .take(count)
            .map(|chunk| RecordNo::new(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect();
        refs.resize(count, RecordNo::NONE);
        Self(refs)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for parent in &self.0 {
            out.extend_from_slice(&parent.get().to_le_bytes());
        }
    }

    pub fn get(&self, n: usize) -> RecordNo {
        self.0.get(n).copied().unwrap_or(RecordNo::NONE)
    }

    pub fn set(&mut self, n: usize, parent: RecordNo) {
        self.0[n] = parent;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One pending update of a parent's reference-entry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefChange {
    pub parent_table: TableId,
    /// Entry to remove, if the key pointed at a parent before.
    pub old_parent: RecordNo,
    /// Entry to add, unless the key is now null.
    pub new_parent: Option<RecordNo>,
}

/// The previous version of a record being rewritten.
#[derive(Debug, Clone, Copy)]
pub struct OldRecord<'a> {
    pub data: &'a [u8],
    pub parents: &'a ParentRefs,
}

/// Verifies that every new or changed foreign key of `record` has a parent
/// row and stores the parents in `parents`. Fails with
/// [`DbError::Foreign`] naming the parent table otherwise.
pub fn check_foreign_keys(
    schema: &Schema,
    indexes: &mut dyn IndexSet,
    table: TableId,
    record: &[u8],
    old: Option<OldRecord<'_>>,
    parents: &mut ParentRefs,
) -> Result<SmallVec<[RefChange; 4]>> {
    let def = schema.table(table)?;
    let mut changes = SmallVec::new();

    for (n, &key_id) in def.foreign_keys().iter().enumerate() {
        let key = schema.key(key_id)?;
        let Some(parent_table) = key.parent() else { continue };

        if let Some(old) = old {
            if !key.differs(record, old.data) {
                continue;
            }
        }

        let old_parent = match old {
            Some(old) if !key.is_null(old.data) => old.parents.get(n),
            _ => RecordNo::NONE,
        };

        if key.is_null(record) {
            parents.set(n, RecordNo::NONE);
            changes.push(RefChange { parent_table, old_parent, new_parent: None });
            continue;
        }

        let primary = schema
            .table(parent_table)?
            .primary_key()
            .ok_or(DbError::Foreign { parent: parent_table })?;
        let value = key.make_key(record);
        let found = indexes.index(primary)?.find(&value).optional()?;
        let Some(parent) = found else {
            return Err(DbError::Foreign { parent: parent_table }.into());
        };

        parents.set(n, parent);
        changes.push(RefChange { parent_table, old_parent, new_parent: Some(parent) });
    }
    Ok(changes)
}

/// Applies the reference-entry changes computed by [`check_foreign_keys`]
/// for the dependent row `dependent` of `table`.
pub fn update_foreign_keys(
    indexes: &mut dyn IndexSet,
    table: TableId,
    dependent: RecordNo,
    changes: &[RefChange],
) -> Result<()> {
    for change in changes {
        let refs = indexes.ref_index(change.parent_table)?;
        if !change.old_parent.is_none() {
            let entry = RefEntry::new(change.old_parent.get(), table.code(), dependent.get());
            refs.delete(&entry.to_bytes(), dependent).optional()?;
        }
        if let Some(parent) = change.new_parent {
            let entry = RefEntry::new(parent.get(), table.code(), dependent.get());
            refs.add(&entry.to_bytes(), dependent)?;
        }
    }
    Ok(())
}

/// Removes every reference entry of the dependent row `dependent`.
pub fn delete_foreign_keys(
    schema: &Schema,
    indexes: &mut dyn IndexSet,
    table: TableId,
    record: &[u8],
    parents: &ParentRefs,
    dependent: RecordNo,
) -> Result<()> {
    let def = schema.table(table)?;
    for (n, &key_id) in def.foreign_keys().iter().enumerate() {
        let key = schema.key(key_id)?;
        let Some(parent_table) = key.parent() else { continue };
        let parent = parents.get(n);
        if key.is_null(record) || parent.is_none() {
            continue;
        }
        let entry = RefEntry::new(parent.get(), table.code(), dependent.get());
        if indexes
            .ref_index(parent_table)?
            .delete(&entry.to_bytes(), dependent)
            .optional()?
            .is_none()
        {
            debug!(table = %table, parent = %parent, "reference entry already gone");
        }
    }
    Ok(())
}

/// Fails with [`DbError::Restrict`] if any row depends on row `current` of
/// `table`. For an update (`changed` holds the new and old record) the
/// check only applies when the primary key changes.
pub fn check_dependent_tables(
    schema: &Schema,
    indexes: &mut dyn IndexSet,
    table: TableId,
    current: RecordNo,
    changed: Option<(&[u8], &[u8])>,
) -> Result<()> {
    let def = schema.table(table)?;
    if !def.has_dependents() {
        return Ok(());
    }
    if let Some((new, old)) = changed {
        let Some(primary) = def.primary_key() else { return Ok(()) };
        if !schema.key(primary)?.differs(new, old) {
            return Ok(());
        }
    }

    if let Some((dependent, _)) = first_dependent(indexes, table, current)? {
        return Err(DbError::Restrict { dependent }.into());
    }
    Ok(())
}

/// Every row that depends on row `parent` of `table`, as (table, row).
pub fn dependents(
    indexes: &mut dyn IndexSet,
    table: TableId,
    parent: RecordNo,
) -> Result<Vec<(TableId, RecordNo)>> {
    let mut out = Vec::new();
    let Some(first) = first_dependent(indexes, table, parent)? else {
        return Ok(out);
    };
    out.push(first);

    let refs = indexes.ref_index(table)?;
    while refs.next().optional()?.is_some() {
        let entry = RefEntry::read(refs.current_key()?);
        if entry.parent() != parent {
            break;
        }
        if let Some(dependent) = TableId::from_code(entry.table()) {
            out.push((dependent, entry.dependent()));
        }
    }
    Ok(out)
}

fn first_dependent(
    indexes: &mut dyn IndexSet,
    table: TableId,
    parent: RecordNo,
) -> Result<Option<(TableId, RecordNo)>> {
    let refs = indexes.ref_index(table)?;
    let probe = RefEntry::first_for(parent).to_bytes();
    if refs.find(&probe).optional()?.is_none() && refs.next().optional()?.is_none() {
        return Ok(None);
    }
    let entry = RefEntry::read(refs.current_key()?);
    if entry.parent() != parent {
        return Ok(None);
    }
    let dependent = TableId::from_code(entry.table()).ok_or(DbError::InvalidRecord)?;
    Ok(Some((dependent, entry.dependent())))
}
