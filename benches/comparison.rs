//! Comparison benchmarks: petek vs DashMap.
//!
//! Not apples to apples — DashMap resizes and replaces on duplicate
//! keys — but it anchors the numbers to a familiar baseline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

use dashmap::DashMap;
use petek::{ReadMap, TakeMap};

const OPS: usize = 50_000;
const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(OPS as u64));

    group.bench_function("petek_read_map", |b| {
        b.iter(|| {
            let map: ReadMap<u32, u64> = ReadMap::with_capacity(OPS);
            for k in 0..OPS as u32 {
                map.add(black_box(k), u64::from(k));
            }
            map
        });
    });

    group.bench_function("dashmap", |b| {
        b.iter(|| {
            let map: DashMap<u32, u64> = DashMap::with_capacity(OPS);
            for k in 0..OPS as u32 {
                map.insert(black_box(k), u64::from(k));
            }
            map
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(OPS as u64));

    group.bench_function("petek_read_map", |b| {
        let map: ReadMap<u32, u64> = ReadMap::with_capacity(OPS);
        for k in 0..OPS as u32 {
            map.add(k, u64::from(k));
        }
        b.iter(|| {
            let mut sum = 0u64;
            for k in 0..OPS as u32 {
                if let Some(v) = map.read(&black_box(k)) {
                    sum += v;
                }
            }
            sum
        });
    });

    group.bench_function("dashmap", |b| {
        let map: DashMap<u32, u64> = DashMap::with_capacity(OPS);
        for k in 0..OPS as u32 {
            map.insert(k, u64::from(k));
        }
        b.iter(|| {
            let mut sum = 0u64;
            for k in 0..OPS as u32 {
                if let Some(v) = map.get(&black_box(k)) {
                    sum += *v;
                }
            }
            sum
        });
    });

    group.finish();
}

fn bench_concurrent_insert_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_insert_remove");
    group.sample_size(10);

    for &threads in THREAD_COUNTS {
        let per_thread = OPS / threads;
        group.throughput(Throughput::Elements(OPS as u64));

        group.bench_with_input(
            BenchmarkId::new("petek_take_map", threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let map: Arc<TakeMap<u32, u64>> = Arc::new(TakeMap::with_capacity(OPS));
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let m = Arc::clone(&map);
                            thread::spawn(move || {
                                let base = (t * per_thread) as u32;
                                for i in 0..per_thread as u32 {
                                    m.add(base + i, 1);
                                    black_box(m.take(&(base + i)));
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("dashmap", threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let map: Arc<DashMap<u32, u64>> = Arc::new(DashMap::with_capacity(OPS));
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let m = Arc::clone(&map);
                            thread::spawn(move || {
                                let base = (t * per_thread) as u32;
                                for i in 0..per_thread as u32 {
                                    m.insert(base + i, 1);
                                    black_box(m.remove(&(base + i)));
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_get, bench_concurrent_insert_remove);
criterion_main!(benches);
