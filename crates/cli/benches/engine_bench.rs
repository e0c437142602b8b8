use config::{EngineConfig, MemtableKind};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::Engine;
use std::path::Path;
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn bench_config(dir: &Path, kind: MemtableKind) -> EngineConfig {
    EngineConfig::new(dir)
        .with_wal_sync(false)
        .with_memtable_kind(kind)
        .with_memtable_capacity(1_000)
}

fn filled_engine(dir: &Path) -> Engine {
    let mut engine = Engine::open(bench_config(dir, MemtableKind::SkipList)).unwrap();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..N_KEYS {
        engine.put(&format!("key{:05}", i), &value).unwrap();
    }
    engine.flush().unwrap();
    engine
}

fn engine_put_benchmark(c: &mut Criterion) {
    for kind in [MemtableKind::BTree, MemtableKind::SkipList, MemtableKind::HashMap] {
        c.bench_function(&format!("engine_put_10k_{:?}", kind), |b| {
            b.iter_batched(
                || {
                    let dir = tempdir().unwrap();
                    let engine = Engine::open(bench_config(dir.path(), kind)).unwrap();
                    (dir, engine)
                },
                |(_dir, mut engine)| {
                    let value = vec![b'x'; VALUE_SIZE];
                    for i in 0..N_KEYS {
                        engine.put(&format!("key{:05}", i), &value).unwrap();
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
}

fn engine_get_hit_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = filled_engine(dir.path());
    c.bench_function("engine_get_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let v = engine.get(&format!("key{:05}", i)).unwrap();
                assert!(v.is_some());
            }
        });
    });
}

fn engine_get_miss_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = filled_engine(dir.path());
    c.bench_function("engine_get_miss_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let v = engine.get(&format!("missing{:05}", i)).unwrap();
                assert!(v.is_none());
            }
        });
    });
}

fn engine_range_scan_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = filled_engine(dir.path());
    c.bench_function("engine_range_scan_page_100", |b| {
        b.iter(|| {
            let page = engine.range_scan("key01000", "key09000", 5, 100).unwrap();
            assert_eq!(page.len(), 100);
        });
    });
}

criterion_group!(
    benches,
    engine_put_benchmark,
    engine_get_hit_benchmark,
    engine_get_miss_benchmark,
    engine_range_scan_benchmark
);
criterion_main!(benches);
