//! Snapshot Benchmarks
//!
//! Measures encode and decode throughput over synthetic object graphs.
//!
//! Run with: `cargo bench -p otter-snapshot`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use otter_snapshot::{
    Heap, ReferenceTables, Roots, Serializer, Slot, SnapshotConfig, Space, SyncTag,
};
use std::hint::black_box;

/// Build a graph of `n` objects where each links to its predecessor and to a
/// shared hub, plus a run of raw data
fn build_graph(n: usize) -> (Heap, Roots) {
    let mut heap = Heap::new();
    let meta = heap.allocate_meta_map(vec![]);
    let map = heap.allocate_object(Space::Map, meta, vec![Slot::Raw(0)]);
    let hub = heap.allocate_object(Space::Old, map, vec![Slot::Raw(1); 4]);

    let mut previous = hub;
    let mut live = Vec::with_capacity(n);
    for i in 0..n {
        let object = heap.allocate_object(
            if i % 4 == 0 { Space::New } else { Space::Old },
            map,
            vec![
                Slot::Strong(previous),
                Slot::Strong(hub),
                Slot::Raw(i as u64),
                Slot::Raw(!(i as u64)),
                Slot::Strong(hub),
                Slot::Strong(hub),
            ],
        );
        live.push(Slot::Strong(object));
        previous = object;
    }

    let mut roots = Roots::new();
    roots.push_list(SyncTag::StrongRoots, vec![Slot::Strong(hub)]);
    roots.push_list(SyncTag::GlobalHandles, live);
    (heap, roots)
}

fn config() -> SnapshotConfig {
    SnapshotConfig {
        max_recursion_depth: 16,
        ..SnapshotConfig::default()
    }
}

/// Benchmark serialization throughput for various graph sizes
fn serialize_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    let tables = ReferenceTables::default();

    for num_objects in [100, 1000, 10000].iter() {
        let (heap, roots) = build_graph(*num_objects);
        group.throughput(Throughput::Elements(*num_objects as u64));
        group.bench_with_input(
            BenchmarkId::new("objects", num_objects),
            num_objects,
            |b, _| {
                b.iter(|| {
                    let snapshot = Serializer::new(&heap, &tables, config())
                        .unwrap()
                        .serialize(&roots)
                        .unwrap();
                    black_box(snapshot.data.len())
                });
            },
        );
    }

    group.finish();
}

/// Benchmark deserialization throughput for various graph sizes
fn deserialize_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("deserialize");
    let tables = ReferenceTables::default();

    for num_objects in [100, 1000, 10000].iter() {
        let (heap, roots) = build_graph(*num_objects);
        let snapshot = Serializer::new(&heap, &tables, config())
            .unwrap()
            .serialize(&roots)
            .unwrap();

        group.throughput(Throughput::Bytes(snapshot.data.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("objects", num_objects),
            &snapshot.data,
            |b, data| {
                b.iter(|| {
                    let mut target = Heap::new();
                    let mut loaded = roots.empty_like();
                    let stats = otter_snapshot::deserialize(data, &mut target, &mut loaded, &tables)
                        .unwrap();
                    black_box(stats.total_objects())
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the cost of the hot-object cache on a hub-heavy graph
fn hot_objects_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hot_objects");
    let tables = ReferenceTables::default();
    let (heap, roots) = build_graph(1000);

    for enabled in [true, false] {
        let settings = SnapshotConfig {
            use_hot_objects: enabled,
            ..config()
        };
        group.bench_function(if enabled { "enabled" } else { "disabled" }, |b| {
            b.iter(|| {
                let snapshot = Serializer::new(&heap, &tables, settings.clone())
                    .unwrap()
                    .serialize(&roots)
                    .unwrap();
                black_box(snapshot.stats.hot_hits)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    serialize_benchmark,
    deserialize_benchmark,
    hot_objects_benchmark
);
criterion_main!(benches);
