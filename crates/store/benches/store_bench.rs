use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use store::{Config, Store};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn bench_config(dir: &std::path::Path) -> Config {
    let mut config = Config::new(dir);
    // Batched WAL syncs: benchmark the engine, not the disk cache.
    config.wal_flush_every_write = false;
    config
}

fn populated_store() -> (tempfile::TempDir, Store) {
    let dir = tempdir().unwrap();
    let store = Store::open(bench_config(dir.path())).unwrap();
    for i in 0..N_KEYS {
        store
            .put(format!("key-{:08}", i).as_bytes(), &vec![b'x'; VALUE_SIZE])
            .unwrap();
    }
    store.flush_memtable().unwrap();
    (dir, store)
}

fn write_benchmark(c: &mut Criterion) {
    c.bench_function("store_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = Store::open(bench_config(dir.path())).unwrap();
                (dir, store)
            },
            |(_dir, store)| {
                for i in 0..N_KEYS {
                    store
                        .put(format!("key-{:08}", i).as_bytes(), &vec![b'x'; VALUE_SIZE])
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn read_benchmark(c: &mut Criterion) {
    c.bench_function("store_get_hit_10k", |b| {
        b.iter_batched(
            populated_store,
            |(_dir, store)| {
                for i in 0..N_KEYS {
                    let value = store.get(format!("key-{:08}", i).as_bytes()).unwrap();
                    assert!(value.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, write_benchmark, read_benchmark);
criterion_main!(benches);
