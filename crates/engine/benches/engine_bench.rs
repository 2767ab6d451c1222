use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Config, Database, OpenMode, StoreMode};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn bench_config() -> Config {
    Config {
        block_size: 4096,
        ..Config::default()
    }
}

fn populate(db: &mut Database) {
    for i in 0..N_KEYS {
        db.store(
            format!("key{}", i).as_bytes(),
            &[b'x'; VALUE_SIZE],
            StoreMode::Insert,
        )
        .unwrap();
    }
}

fn store_benchmark(c: &mut Criterion) {
    c.bench_function("store_insert_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Database::open(dir.path().join("bench.db"), OpenMode::NewDb, &bench_config())
                    .unwrap();
                (dir, db)
            },
            |(_dir, mut db)| populate(&mut db),
            BatchSize::SmallInput,
        );
    });
}

fn fetch_hit_benchmark(c: &mut Criterion) {
    c.bench_function("fetch_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mut db =
                    Database::open(dir.path().join("bench.db"), OpenMode::NewDb, &bench_config())
                        .unwrap();
                populate(&mut db);
                (dir, db)
            },
            |(_dir, mut db)| {
                for i in 0..N_KEYS {
                    let v = db.fetch(format!("key{}", i).as_bytes()).unwrap();
                    assert_eq!(v.len(), VALUE_SIZE);
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn fetch_miss_benchmark(c: &mut Criterion) {
    c.bench_function("exists_miss_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mut db =
                    Database::open(dir.path().join("bench.db"), OpenMode::NewDb, &bench_config())
                        .unwrap();
                populate(&mut db);
                (dir, db)
            },
            |(_dir, mut db)| {
                for i in 0..N_KEYS {
                    assert!(!db.exists(format!("missing{}", i).as_bytes()).unwrap());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn iterate_benchmark(c: &mut Criterion) {
    c.bench_function("iterate_keys_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mut db =
                    Database::open(dir.path().join("bench.db"), OpenMode::NewDb, &bench_config())
                        .unwrap();
                populate(&mut db);
                (dir, db)
            },
            |(_dir, mut db)| {
                let n = db.keys().filter_map(|k| k.ok()).count();
                assert_eq!(n, N_KEYS);
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    store_benchmark,
    fetch_hit_benchmark,
    fetch_miss_benchmark,
    iterate_benchmark
);
criterion_main!(benches);
