//! Benchmarks for the storage engine (WAL + Memtable).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ringstore_common::{Cell, DecoratedKey, Mutation, PartitionRange, ReadCommand, TokenRange};
use ringstore_storage::wal::Wal;
use ringstore_storage::{FsyncPolicy, StorageEngine, WalRecord};
use tempfile::TempDir;

fn make_mutation(key: &str, value_size: usize, ts: i64) -> Mutation {
    Mutation::new("bench", "t", DecoratedKey::new(key.as_bytes().to_vec()))
        .with_cell(b"c".to_vec(), Cell::live(vec![0x42u8; value_size], ts))
}

fn bench_engine_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_apply");

    for size in [64, 1024, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();

            let mut i = 0u64;
            b.iter(|| {
                engine
                    .apply(&make_mutation(&format!("key_{i}"), size, 1))
                    .unwrap();
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_engine_read_partition(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();
    for i in 0..1000 {
        engine.apply(&make_mutation(&format!("key_{i:04}"), 256, 1)).unwrap();
    }
    let cmd = ReadCommand::new("bench", "t");

    c.bench_function("engine_read_partition", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let range = PartitionRange::key(format!("key_{:04}", i % 1000).into_bytes());
            black_box(engine.read(&cmd, &range));
            i += 1;
        });
    });
}

fn bench_engine_digest_full_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();
    for i in 0..1000 {
        engine.apply(&make_mutation(&format!("key_{i:04}"), 64, 1)).unwrap();
    }
    let cmd = ReadCommand::new("bench", "t");
    let range = PartitionRange::Tokens(TokenRange::full());

    c.bench_function("engine_digest_full_scan", |b| {
        b.iter(|| black_box(engine.digest(&cmd, &range)));
    });
}

fn bench_wal_append(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let wal_path = dir.path().join("bench.wal");
    let mut wal = Wal::open(&wal_path, FsyncPolicy::None).unwrap();

    c.bench_function("wal_append", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let record = WalRecord::Apply(make_mutation(&format!("k_{i}"), 128, 1));
            wal.append(&record).unwrap();
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_engine_apply,
    bench_engine_read_partition,
    bench_engine_digest_full_scan,
    bench_wal_append
);
criterion_main!(benches);
