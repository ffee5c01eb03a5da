//! Heap benchmarks: allocation throughput and scavenge pause times.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use loam_heap::object::{Array, Value, WORD_SIZE};
use loam_heap::{Heap, HeapConfig};

fn bench_heap() -> Heap {
    Heap::new(HeapConfig {
        verify: false,
        ..HeapConfig::default()
    })
}

/// Bump allocation of small arrays, the interpreter's hottest path.
fn allocation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap/allocation");

    for slots in [2usize, 8, 32, 128].iter() {
        group.throughput(Throughput::Bytes(((2 + slots) * WORD_SIZE) as u64 * 1000));
        group.bench_with_input(BenchmarkId::new("array", slots), slots, |b, &slots| {
            let mut heap = bench_heap();
            let store = heap.allocate_array(1);
            store.set_element(0, Value::ZERO);
            heap.initialize_root(store);

            b.iter(|| {
                for _ in 0..1000 {
                    // Unrooted: each collection drops the batch.
                    let array = heap.allocate_array(black_box(slots));
                    for i in 0..slots {
                        array.set_element(i, Value::ZERO);
                    }
                    black_box(array.value());
                }
            });
        });
    }

    group.finish();
}

/// Scavenge cost as a function of the live set.
fn scavenge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap/scavenge");
    group.sample_size(20);

    for live_kb in [64usize, 512, 2048].iter() {
        group.throughput(Throughput::Bytes((live_kb * 1024) as u64));
        group.bench_with_input(
            BenchmarkId::new("live_set", live_kb),
            live_kb,
            |b, &live_kb| {
                let mut heap = bench_heap();
                let slots_per_array = 1024 / WORD_SIZE - 2; // 1KB each
                let store = heap.allocate_array(live_kb);
                for i in 0..store.len() {
                    store.set_element(i, Value::ZERO);
                }
                heap.initialize_root(store);

                for i in 0..live_kb {
                    let filler = heap.allocate_array(slots_per_array);
                    for j in 0..slots_per_array {
                        filler.set_element(j, Value::ZERO);
                    }
                    Array::from_value(heap.object_store()).set_element(i, filler.value());
                }

                b.iter(|| {
                    heap.scavenge(black_box("bench"));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, allocation_benchmark, scavenge_benchmark);
criterion_main!(benches);
