//! Record file benchmarks for Typhoon
//!
//! Fixed-length slots against variable-length block chains, through the
//! record engines directly and through the database API.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;
use typhoon::records::{RecordFile, VlrFile};
use typhoon::storage::FileKind;
use typhoon::{Database, FieldType, HandleCache, Schema};

fn bench_fixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_records");
    let count = 1000u32;
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function("add", |b| {
        b.iter_with_setup(
            || (tempdir().unwrap(), HandleCache::new(4).unwrap()),
            |(dir, cache)| {
                let file = cache.register(dir.path().join("bench.dat"), FileKind::Data, false).unwrap();
                let mut records = RecordFile::open(file, 64, false).unwrap();
                let data = [7u8; 64];
                for _ in 0..count {
                    records.add(&data).unwrap();
                }
                (dir, cache)
            },
        );
    });

    let dir = tempdir().unwrap();
    let cache = HandleCache::new(4).unwrap();
    let file = cache.register(dir.path().join("bench.dat"), FileKind::Data, false).unwrap();
    let mut records = RecordFile::open(file, 64, false).unwrap();
    let added: Vec<_> = (0..count).map(|_| records.add(&[1u8; 64]).unwrap()).collect();

    group.bench_function("read", |b| {
        b.iter(|| {
            for &recno in &added {
                black_box(records.read(recno).unwrap());
            }
        });
    });
    group.bench_function("chain_scan", |b| {
        b.iter(|| {
            let mut seen = 0;
            let mut step = records.first();
            while step.is_ok() {
                seen += 1;
                step = records.next();
            }
            black_box(seen)
        });
    });
    group.finish();
}

fn bench_vlr(c: &mut Criterion) {
    let mut group = c.benchmark_group("vlr_records");

    for size in [40usize, 400, 4000] {
        group.throughput(Throughput::Bytes((size * 100) as u64));
        group.bench_with_input(BenchmarkId::new("add", size), &size, |b, &size| {
            b.iter_with_setup(
                || (tempdir().unwrap(), HandleCache::new(4).unwrap()),
                |(dir, cache)| {
                    let file = cache.register(dir.path().join("bench.vlr"), FileKind::Vlr, false).unwrap();
                    let mut vlr = VlrFile::open(file, 256, "bench", false).unwrap();
                    let data = vec![3u8; size];
                    for _ in 0..100 {
                        vlr.add(&data).unwrap();
                    }
                    (dir, cache)
                },
            );
        });

        let dir = tempdir().unwrap();
        let cache = HandleCache::new(4).unwrap();
        let file = cache.register(dir.path().join("bench.vlr"), FileKind::Vlr, false).unwrap();
        let mut vlr = VlrFile::open(file, 256, "bench", false).unwrap();
        let data = vec![5u8; size];
        let addrs: Vec<_> = (0..100).map(|_| vlr.add(&data).unwrap()).collect();

        group.bench_with_input(BenchmarkId::new("read", size), &size, |b, _| {
            b.iter(|| {
                for &addr in &addrs {
                    black_box(vlr.read(addr).unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_database_insert(c: &mut Criterion) {
    let schema = Schema::builder("bench")
        .table("row", |t| {
            t.field("id", FieldType::Int)
                .array_field("name", FieldType::Str, 24)
                .field("score", FieldType::Int)
                .primary_key("id", &["id"])
                .alternate_key("score", &["score"], false)
        })
        .build()
        .unwrap();
    let table = schema.table_id("row").unwrap();

    let mut group = c.benchmark_group("database");
    let count: i32 = 500;
    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("fill_new_two_keys", |b| {
        b.iter_with_setup(
            || {
                let dir = tempdir().unwrap();
                let db = Database::builder()
                    .path(dir.path())
                    .handle_cache(HandleCache::new(8).unwrap())
                    .open(&schema)
                    .unwrap();
                (dir, db)
            },
            |(dir, mut db)| {
                for id in 0..count {
                    let mut rec = vec![0u8; 32];
                    rec[..4].copy_from_slice(&id.to_le_bytes());
                    rec[28..].copy_from_slice(&(id % 17).to_le_bytes());
                    db.fill_new(table, &rec).unwrap();
                }
                (dir, db)
            },
        );
    });
    group.finish();
}

criterion_group!(benches, bench_fixed, bench_vlr, bench_database_insert);
criterion_main!(benches);
