use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rayon::prelude::*;
use tracekv::table::lockfree::LockFreeStore;
use tracekv::{Backend, WorkerCtx};

const ITER: u64 = 32 * 1024;

fn task_insert(store: &LockFreeStore, threads: usize) {
    (0..threads).into_par_iter().for_each(|worker| {
        let mut ctx = WorkerCtx::new(worker);
        let span = (ITER + threads as u64 - 1) / threads as u64;
        let base = worker as u64 * span;
        for key in base..(base + span).min(ITER) {
            store.insert(&mut ctx, key, key.wrapping_mul(3));
        }
    });
}

fn create_and_insert_u64_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("LockFreeStore/create_and_insert_u64_pairs");
    group.throughput(Throughput::Elements(ITER));
    let max = num_cpus::get();

    for threads in (1..=max).filter(|thread| *thread == 1 || *thread % 4 == 0) {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |bencher, &threads| {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
                pool.install(|| {
                    bencher.iter(|| {
                        let store = LockFreeStore::new(1 << 14, false);
                        task_insert(&store, threads);
                    })
                });
            },
        );
    }

    group.finish();
}

fn lookup_inserted_u64_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("LockFreeStore/lookup_inserted_u64_pairs");
    group.throughput(Throughput::Elements(ITER));
    let max = num_cpus::get();

    for threads in (1..=max).filter(|thread| *thread == 1 || *thread % 4 == 0) {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |bencher, &threads| {
                let store = LockFreeStore::new(1 << 14, false);
                task_insert(&store, threads);
                let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
                pool.install(|| {
                    bencher.iter(|| {
                        (0..ITER).into_par_iter().for_each(|key| {
                            assert_eq!(store.lookup(key), key.wrapping_mul(3));
                        })
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, create_and_insert_u64_pairs, lookup_inserted_u64_pairs);
criterion_main!(benches);
