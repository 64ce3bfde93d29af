//! Performance benchmarks for studysync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::sync::Arc;
use studysync_engine::{keys, merge, LocalStore, MemoryRemote, Snapshot, SyncEngine};

fn tasks(range: std::ops::Range<usize>, side: &str) -> Value {
    range
        .map(|i| {
            json!({
                "id": format!("t{i}"),
                "content": format!("{side} task {i}"),
                "completed": false,
            })
        })
        .collect::<Vec<_>>()
        .into()
}

fn history(days: usize, offset: usize) -> Value {
    let map: serde_json::Map<String, Value> = (0..days)
        .map(|d| (format!("day-{}", d + offset), json!(d % 7)))
        .collect();
    Value::Object(map)
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10, 100, 1000].iter() {
        // Half of each side overlaps the other
        let local = tasks(0..*size, "local");
        let remote = tasks(size / 2..size + size / 2, "remote");
        group.bench_with_input(BenchmarkId::new("record_lists", size), size, |b, _| {
            b.iter(|| merge::merge_record_lists(black_box(&local), black_box(&remote)))
        });

        let local = history(*size, 0);
        let remote = history(*size, size / 2);
        group.bench_with_input(BenchmarkId::new("counter_maps", size), size, |b, _| {
            b.iter(|| merge::merge_flat_maps(black_box(&local), black_box(&remote)))
        });
    }

    group.bench_function("nested_record_lists", |b| {
        let day = |n: usize| -> Value {
            (0..n)
                .map(|i| json!({"word": format!("w{i}")}))
                .collect::<Vec<_>>()
                .into()
        };
        let local = json!({"2025-01-01": day(50), "2025-01-02": day(20)});
        let remote = json!({"2025-01-01": day(60), "2025-01-03": day(10)});

        b.iter(|| merge::merge_nested_record_lists(black_box(&local), black_box(&remote)))
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    group.bench_function("set_tasks", |b| {
        let store = LocalStore::in_memory();
        let value = tasks(0..100, "local");
        b.iter(|| store.set(black_box(keys::TASKS), black_box(&value)))
    });

    group.bench_function("get_raw_tasks", |b| {
        let store = LocalStore::in_memory();
        let _ = store.set(keys::TASKS, &tasks(0..100, "local"));
        b.iter(|| store.get_raw(black_box(keys::TASKS)))
    });

    group.finish();
}

fn bench_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconciliation");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("sign_in", size), size, |b, &size| {
            b.iter(|| {
                let store = Arc::new(LocalStore::in_memory());
                let _ = store.set(keys::TASKS, &tasks(0..size, "local"));
                let _ = store.set(keys::STUDY_HISTORY, &history(size, 0));

                let remote: Snapshot = [
                    (keys::TASKS.to_string(), tasks(size / 2..size * 2, "remote")),
                    (keys::STUDY_HISTORY.to_string(), history(size, size / 2)),
                ]
                .into_iter()
                .collect();
                let remote = Arc::new(MemoryRemote::new().with_document("u1", remote));

                let engine = SyncEngine::new(store, remote);
                runtime.block_on(engine.sign_in(black_box("u1")))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_store, bench_reconciliation);
criterion_main!(benches);
