//! # Handle Cache Test Suite
//!
//! Several databases share one descriptor ceiling. These tests run real
//! workloads against databases whose combined file count is far above the
//! ceiling and check that the cache keeps them working within it.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test handle_cache
//! ```

use std::sync::Arc;

use tempfile::tempdir;
use typhoon::{Database, FieldType, HandleCache, OpenMode, ResultExt, Schema};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Two tables, three indexes, one reference index and the sequence file:
/// seven files per database.
const FILES_PER_DATABASE: usize = 7;

fn catalog_schema() -> Schema {
    Schema::builder("catalog")
        .table("part", |t| {
            t.field("id", FieldType::Int)
                .array_field("name", FieldType::Str, 8)
                .primary_key("id", &["id"])
                .alternate_key("name", &["name"], true)
        })
        .table("stock", |t| {
            t.field("id", FieldType::Int)
                .field("part", FieldType::Int)
                .primary_key("id", &["id"])
                .foreign_key("of_part", "part", &["part"])
        })
        .sequence("batch", 1, 1, true)
        .build()
        .expect("valid schema")
}

fn part(id: i32) -> Vec<u8> {
    let mut rec = id.to_le_bytes().to_vec();
    let mut name = [0u8; 8];
    let label = format!("p{id}");
    name[..label.len()].copy_from_slice(label.as_bytes());
    rec.extend_from_slice(&name);
    rec
}

fn stock(id: i32, part: i32) -> Vec<u8> {
    [id, part].iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn fill(db: &mut Database, schema: &Schema, rows: i32) {
    let parts = schema.table_id("part").unwrap();
    let stocks = schema.table_id("stock").unwrap();
    let batch = schema.sequence_id("batch").unwrap();
    for id in 1..=rows {
        db.fill_new(parts, &part(id)).unwrap();
        db.fill_new(stocks, &stock(id, id)).unwrap();
        db.next_sequence(batch).unwrap();
    }
}

fn verify(db: &mut Database, schema: &Schema, rows: i32) {
    let parts = schema.table_id("part").unwrap();
    let stocks = schema.table_id("stock").unwrap();
    let by_name = schema.key_id(parts, "name").unwrap();
    let by_id = schema.key_id(stocks, "id").unwrap();
    for id in 1..=rows {
        let mut name = [0u8; 8];
        let label = format!("p{id}");
        name[..label.len()].copy_from_slice(label.as_bytes());
        db.key_find(by_name, &name).unwrap();
        assert_eq!(db.rec_read().unwrap(), part(id));
        db.key_find(by_id, &id.to_le_bytes()).unwrap();
        assert_eq!(db.rec_read().unwrap(), stock(id, id));
    }
    assert_eq!(db.record_count(parts).unwrap(), rows as u32);
}

// ============================================================================
// CEILING TESTS
// ============================================================================

#[test]
fn databases_share_a_small_ceiling() {
    let dir = tempdir().expect("Failed to create temp dir");
    let schema = catalog_schema();
    let cache = HandleCache::new(3).unwrap();
    let open = |name: &str| {
        Database::builder()
            .path(dir.path().join(name))
            .handle_cache(Arc::clone(&cache))
            .open(&schema)
            .expect("open")
    };
    let mut east = open("east");
    let mut west = open("west");

    fill(&mut east, &schema, 40);
    fill(&mut west, &schema, 25);
    verify(&mut east, &schema, 40);
    verify(&mut west, &schema, 25);

    let stats = cache.stats();
    assert!(stats.peak_open <= 3, "peak {} above ceiling", stats.peak_open);
    assert!(stats.evictions > 0);
    assert_eq!(stats.registered, 2 * FILES_PER_DATABASE);
}

#[test]
fn closing_a_database_deregisters_its_files() {
    let dir = tempdir().expect("Failed to create temp dir");
    let schema = catalog_schema();
    let cache = HandleCache::new(4).unwrap();
    let open = |name: &str| {
        Database::builder()
            .path(dir.path().join(name))
            .handle_cache(Arc::clone(&cache))
            .open(&schema)
            .expect("open")
    };
    let first = open("first");
    let mut second = open("second");

    first.close().unwrap();

    assert_eq!(cache.stats().registered, FILES_PER_DATABASE);
    assert!(cache.open_count() <= 4);
    fill(&mut second, &schema, 5);
    verify(&mut second, &schema, 5);
}

#[test]
fn shrinking_the_ceiling_under_load() {
    let dir = tempdir().expect("Failed to create temp dir");
    let schema = catalog_schema();
    let cache = HandleCache::new(16).unwrap();
    let mut db = Database::builder()
        .path(dir.path().join("db"))
        .handle_cache(Arc::clone(&cache))
        .open(&schema)
        .unwrap();
    fill(&mut db, &schema, 10);
    assert_eq!(cache.open_count(), FILES_PER_DATABASE);

    cache.set_max_open(2).unwrap();
    assert!(cache.open_count() <= 2);

    fill_more(&mut db, &schema);
    verify(&mut db, &schema, 20);
    assert!(cache.stats().open_now <= 2);
}

fn fill_more(db: &mut Database, schema: &Schema) {
    let parts = schema.table_id("part").unwrap();
    let stocks = schema.table_id("stock").unwrap();
    for id in 11..=20 {
        db.fill_new(parts, &part(id)).unwrap();
        db.fill_new(stocks, &stock(id, id)).unwrap();
    }
}

#[test]
fn shared_mode_files_reopen_after_eviction() {
    let dir = tempdir().expect("Failed to create temp dir");
    let schema = catalog_schema();
    let cache = HandleCache::new(2).unwrap();
    let mut db = Database::builder()
        .path(dir.path().join("db"))
        .mode(OpenMode::Shared)
        .handle_cache(Arc::clone(&cache))
        .open(&schema)
        .unwrap();

    fill(&mut db, &schema, 12);
    verify(&mut db, &schema, 12);

    let parts = schema.table_id("part").unwrap();
    let by_id = schema.key_id(parts, "id").unwrap();
    assert!(db.key_find(by_id, &99i32.to_le_bytes()).optional().unwrap().is_none());
    assert!(cache.stats().peak_open <= 2);
}
