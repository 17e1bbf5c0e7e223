use bucketd_store::{Store, StoreOptions};
use criterion::{criterion_group, criterion_main, Criterion};

fn open_store(dir: &std::path::Path) -> Store {
    let store = Store::open(StoreOptions::new(dir.join("bench.db"))).unwrap();
    store.ensure_namespace().unwrap();
    store
}

fn bench_put(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let mut i = 0u64;
    c.bench_function("store_put_durable", |b| {
        b.iter(|| {
            store.put(&format!("key-{i}"), "value").unwrap();
            i += 1;
        });
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    for i in 0..1000 {
        store.put(&format!("key-{i}"), "value").unwrap();
    }
    c.bench_function("store_get_hit", |b| {
        b.iter(|| store.get("key-500").unwrap());
    });
}

fn bench_get_miss(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    c.bench_function("store_get_miss", |b| {
        b.iter(|| store.get("absent").unwrap());
    });
}

fn bench_delete_absent(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    c.bench_function("store_delete_absent", |b| {
        b.iter(|| store.delete("absent").unwrap());
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_get_hit,
    bench_get_miss,
    bench_delete_absent
);
criterion_main!(benches);
