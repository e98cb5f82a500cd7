//! # Schema Builder
//!
//! Fluent construction of a [`Schema`]. Tables are declared with a closure
//! that receives a [`TableBuilder`]; names are resolved and every rule is
//! checked in [`SchemaBuilder::build`], so declaration order between tables
//! does not matter.
//!
//! ## Rules Checked by `build`
//!
//! - table, field, key and sequence names are unique where they must be
//! - string fields declare a width; key fields are scalars or strings
//! - a key is 1 to 255 bytes and fits the table's node size
//! - at most one primary key and at most 32 keys per table
//! - variable-length fields come last and name an integer count field
//! - a foreign key's fields match the parent's primary key field for field,
//!   and the parent is a fixed-length table with a primary key
//!
//! Modifiers such as [`optional`](TableBuilder::optional) and
//! [`descending`](TableBuilder::descending) apply to the key declared last.

use eyre::{bail, ensure, eyre, Result};
use hashbrown::{HashMap, HashSet};

use super::table::{FieldDef, KeyDef, KeyKind, KeyPart, SequenceDef, TableDef};
use super::{FieldId, KeyId, Schema, TableId};
use crate::btree::NodeLayout;
use crate::config::{DEFAULT_NODE_SIZE, DEFAULT_VLR_BLOCK_SIZE, MAX_KEYS_PER_TABLE, MAX_KEY_SIZE, MIN_VLR_BLOCK_SIZE};
use crate::keys::{FieldType, REF_ENTRY_SIZE};

#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    tables: Vec<TableBuilder>,
    sequences: Vec<SequenceDef>,
}

#[derive(Debug)]
struct FieldSpec {
    name: String,
    ty: FieldType,
    len: Option<usize>,
    count_field: Option<String>,
}

#[derive(Debug)]
enum KeySpecKind {
    Primary,
    Alternate { unique: bool },
    Foreign { parent: String },
}

#[derive(Debug)]
struct KeySpec {
    name: String,
    kind: KeySpecKind,
    fields: Vec<String>,
    descending: HashSet<String>,
    optional: Option<String>,
}

#[derive(Debug)]
pub struct TableBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    keys: Vec<KeySpec>,
    variable_length: bool,
    node_size: usize,
    block_size: usize,
    problems: Vec<String>,
}

impl TableBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            fields: Vec::new(),
            keys: Vec::new(),
            variable_length: false,
            node_size: DEFAULT_NODE_SIZE,
            block_size: DEFAULT_VLR_BLOCK_SIZE,
            problems: Vec::new(),
        }
    }

    /// A scalar field.
    pub fn field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push(FieldSpec { name: name.into(), ty, len: None, count_field: None });
        self
    }

    /// A fixed array of `len` elements, or a string of `len` bytes.
    pub fn array_field(mut self, name: &str, ty: FieldType, len: usize) -> Self {
        self.fields.push(FieldSpec { name: name.into(), ty, len: Some(len), count_field: None });
        self
    }

    /// An array of up to `capacity` elements whose used length is held in
    /// `count_field`. Only the used elements are stored, which makes the
    /// table variable-length.
    pub fn variable_field(mut self, name: &str, ty: FieldType, capacity: usize, count_field: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            len: Some(capacity),
            count_field: Some(count_field.into()),
        });
        self.variable_length = true;
        self
    }

    pub fn primary_key(self, name: &str, fields: &[&str]) -> Self {
        self.key(name, KeySpecKind::Primary, fields)
    }

    pub fn alternate_key(self, name: &str, fields: &[&str], unique: bool) -> Self {
        self.key(name, KeySpecKind::Alternate { unique }, fields)
    }

    pub fn foreign_key(self, name: &str, parent: &str, fields: &[&str]) -> Self {
        self.key(name, KeySpecKind::Foreign { parent: parent.into() }, fields)
    }

    fn key(mut self, name: &str, kind: KeySpecKind, fields: &[&str]) -> Self {
        self.keys.push(KeySpec {
            name: name.into(),
            kind,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            descending: HashSet::new(),
            optional: None,
        });
        self
    }

    /// Makes the last key optional: it is null while the one-byte field
    /// `indicator` is zero.
    pub fn optional(mut self, indicator: &str) -> Self {
        match self.keys.last_mut() {
            Some(key) => key.optional = Some(indicator.into()),
            None => self.problems.push(format!("optional('{}') before any key", indicator)),
        }
        self
    }

    /// Orders `field` of the last key in descending order.
    pub fn descending(mut self, field: &str) -> Self {
        match self.keys.last_mut() {
            Some(key) => {
                key.descending.insert(field.into());
            }
            None => self.problems.push(format!("descending('{}') before any key", field)),
        }
        self
    }

    /// Stores the table in a block file even without variable fields.
    pub fn variable_length(mut self) -> Self {
        self.variable_length = true;
        self
    }

    pub fn node_size(mut self, node_size: usize) -> Self {
        self.node_size = node_size;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
            sequences: Vec::new(),
        }
    }

    pub fn table(mut self, name: &str, define: impl FnOnce(TableBuilder) -> TableBuilder) -> Self {
        self.tables.push(define(TableBuilder::new(name.into())));
        self
    }

    pub fn sequence(mut self, name: &str, start: u64, step: u64, ascending: bool) -> Self {
        self.sequences.push(SequenceDef { name: name.into(), start, step, ascending });
        self
    }

    pub fn build(self) -> Result<Schema> {
        ensure!(!self.name.is_empty(), "schema name must not be empty");

        let mut table_ids = HashMap::new();
        for (i, table) in self.tables.iter().enumerate() {
            ensure!(!table.name.is_empty(), "table {} has no name", i);
            if let Some(problem) = table.problems.first() {
                bail!("table '{}': {}", table.name, problem);
            }
            if table_ids.insert(table.name.as_str(), TableId::new(i)).is_some() {
                bail!("table '{}' is declared twice", table.name);
            }
        }

        let mut schema = Schema {
            name: self.name.clone(),
            tables: Vec::with_capacity(self.tables.len()),
            fields: Vec::new(),
            keys: Vec::new(),
            sequences: Vec::new(),
        };

        for (i, spec) in self.tables.iter().enumerate() {
            let table = build_table(&mut schema, TableId::new(i), spec, &table_ids)?;
            schema.tables.push(table);
        }

        link_foreign_keys(&mut schema)?;

        let mut seen = HashSet::new();
        for seq in self.sequences {
            ensure!(seen.insert(seq.name.clone()), "sequence '{}' is declared twice", seq.name);
            schema.sequences.push(seq);
        }
        Ok(schema)
    }
}

fn build_table(
    schema: &mut Schema,
    id: TableId,
    spec: &TableBuilder,
    table_ids: &HashMap<&str, TableId>,
) -> Result<TableDef> {
    let name = &spec.name;
    ensure!(!spec.fields.is_empty(), "table '{}' has no fields", name);
    ensure!(
        spec.block_size >= MIN_VLR_BLOCK_SIZE,
        "table '{}': block size {} is below {}",
        name,
        spec.block_size,
        MIN_VLR_BLOCK_SIZE
    );

    let mut by_name: HashMap<&str, FieldId> = HashMap::new();
    let mut fields = Vec::with_capacity(spec.fields.len());
    let mut offset = 0;
    let mut first_variable = None;

    for field in &spec.fields {
        let (size, elem_size) = match (field.ty.scalar_size(), field.len) {
            (None, Some(len)) => (len, 1),
            (None, None) => bail!("table '{}': string field '{}' needs a width", name, field.name),
            (Some(scalar), None) => (scalar, scalar),
            (Some(scalar), Some(len)) => (scalar * len, scalar),
        };
        ensure!(size > 0, "table '{}': field '{}' has no size", name, field.name);

        let fid = FieldId::new(schema.fields.len());
        if by_name.insert(field.name.as_str(), fid).is_some() {
            bail!("table '{}': field '{}' is declared twice", name, field.name);
        }
        if field.count_field.is_some() {
            first_variable.get_or_insert(fid);
        } else if first_variable.is_some() {
            bail!(
                "table '{}': fixed field '{}' follows a variable-length field",
                name,
                field.name
            );
        }

        schema.fields.push(FieldDef {
            name: field.name.clone(),
            table: id,
            offset,
            size,
            elem_size,
            ty: field.ty,
            count_field: None,
            key: None,
        });
        fields.push(fid);
        offset += size;
    }

    for (field, &fid) in spec.fields.iter().zip(&fields) {
        let Some(count) = &field.count_field else { continue };
        let count_id = *by_name
            .get(count.as_str())
            .ok_or_else(|| eyre!("table '{}': unknown count field '{}'", name, count))?;
        let count_def = &schema.fields[count_id.index()];
        ensure!(
            count_def.count_field.is_none()
                && count_def.size == count_def.elem_size
                && !matches!(count_def.ty, FieldType::Str | FieldType::Float | FieldType::Double),
            "table '{}': count field '{}' must be an integer scalar",
            name,
            count
        );
        schema.fields[fid.index()].count_field = Some(count_id);
    }

    let mut keys = Vec::new();
    let mut primary = None;
    let ordered = spec
        .keys
        .iter()
        .filter(|k| matches!(k.kind, KeySpecKind::Primary))
        .chain(spec.keys.iter().filter(|k| matches!(k.kind, KeySpecKind::Alternate { .. })))
        .chain(spec.keys.iter().filter(|k| matches!(k.kind, KeySpecKind::Foreign { .. })));
    ensure!(
        spec.keys.len() <= MAX_KEYS_PER_TABLE,
        "table '{}' has {} keys, at most {} are allowed",
        name,
        spec.keys.len(),
        MAX_KEYS_PER_TABLE
    );

    let mut key_names = HashSet::new();
    let mut foreign_count = 0;
    for key in ordered {
        ensure!(key_names.insert(key.name.as_str()), "table '{}': key '{}' is declared twice", name, key.name);
        ensure!(!key.fields.is_empty(), "table '{}': key '{}' has no fields", name, key.name);

        let kind = match &key.kind {
            KeySpecKind::Primary => {
                ensure!(primary.is_none(), "table '{}' has more than one primary key", name);
                ensure!(key.optional.is_none(), "table '{}': a primary key cannot be optional", name);
                KeyKind::Primary
            }
            KeySpecKind::Alternate { .. } => KeyKind::Alternate,
            KeySpecKind::Foreign { parent } => {
                foreign_count += 1;
                let parent = *table_ids
                    .get(parent.as_str())
                    .ok_or_else(|| eyre!("table '{}': key '{}' references unknown table '{}'", name, key.name, parent))?;
                KeyKind::Foreign { parent }
            }
        };

        let mut parts = Vec::with_capacity(key.fields.len());
        let mut key_size = 0;
        for field_name in &key.fields {
            let fid = *by_name
                .get(field_name.as_str())
                .ok_or_else(|| eyre!("table '{}': key '{}' uses unknown field '{}'", name, key.name, field_name))?;
            let field = &schema.fields[fid.index()];
            ensure!(
                field.count_field.is_none() && (field.ty == FieldType::Str || field.size == field.elem_size),
                "table '{}': field '{}' cannot be part of a key",
                name,
                field_name
            );
            parts.push(KeyPart {
                field: fid,
                record_offset: field.offset,
                key_offset: key_size,
                size: field.size,
                ty: field.ty,
                descending: key.descending.contains(field_name),
            });
            key_size += field.size;
        }
        for field_name in &key.descending {
            ensure!(
                key.fields.contains(field_name),
                "table '{}': descending field '{}' is not part of key '{}'",
                name,
                field_name,
                key.name
            );
        }
        ensure!(
            key_size <= MAX_KEY_SIZE,
            "table '{}': key '{}' is {} bytes, the maximum is {}",
            name,
            key.name,
            key_size,
            MAX_KEY_SIZE
        );

        let null_indicator = match &key.optional {
            Some(indicator) => {
                let fid = by_name
                    .get(indicator.as_str())
                    .ok_or_else(|| eyre!("table '{}': unknown null indicator '{}'", name, indicator))?;
                Some(schema.fields[fid.index()].offset)
            }
            None => None,
        };

        let kid = KeyId::new(schema.keys.len());
        if !matches!(kind, KeyKind::Foreign { .. }) {
            NodeLayout::new(spec.node_size, key_size)
                .map_err(|e| eyre!("table '{}': key '{}': {}", name, key.name, e))?;
            if let [only] = parts.as_slice() {
                schema.fields[only.field.index()].key.get_or_insert(kid);
            }
        }
        if kind == KeyKind::Primary {
            primary = Some(kid);
        }

        schema.keys.push(KeyDef {
            name: key.name.clone(),
            table: id,
            kind,
            parts,
            size: key_size,
            unique: match key.kind {
                KeySpecKind::Primary => true,
                KeySpecKind::Alternate { unique } => unique,
                KeySpecKind::Foreign { .. } => false,
            },
            null_indicator,
        });
        keys.push(kid);
    }

    Ok(TableDef {
        name: name.clone(),
        id,
        size: offset,
        fields,
        keys,
        variable_length: spec.variable_length,
        first_variable,
        node_size: spec.node_size,
        block_size: spec.block_size,
        dependents: Vec::new(),
        primary,
        foreign_count,
    })
}

fn link_foreign_keys(schema: &mut Schema) -> Result<()> {
    let mut links = Vec::new();
    for key in &schema.keys {
        let Some(parent_id) = key.parent() else { continue };
        let child = &schema.tables[key.table.index()];
        let parent = &schema.tables[parent_id.index()];

        let pk = parent
            .primary_key()
            .ok_or_else(|| eyre!("table '{}' is referenced by '{}' but has no primary key", parent.name, child.name))?;
        ensure!(
            !parent.variable_length,
            "variable-length table '{}' cannot be referenced by foreign key '{}.{}'",
            parent.name,
            child.name,
            key.name
        );

        let pk = &schema.keys[pk.index()];
        let matches = pk.parts.len() == key.parts.len()
            && pk
                .parts
                .iter()
                .zip(&key.parts)
                .all(|(p, c)| p.ty == c.ty && p.size == c.size);
        ensure!(
            matches,
            "foreign key '{}.{}' does not match the primary key of '{}'",
            child.name,
            key.name,
            parent.name
        );
        NodeLayout::new(parent.node_size, REF_ENTRY_SIZE)
            .map_err(|e| eyre!("table '{}': reference index: {}", parent.name, e))?;

        links.push((parent_id, key.table));
    }

    for (parent, child) in links {
        let dependents = &mut schema.tables[parent.index()].dependents;
        if !dependents.contains(&child) {
            dependents.push(child);
        }
    }
    Ok(())
}
