//! Pooled versus fresh decoding.
//!
//! Each decode targets a record with a 4 KiB buffer. The fresh variant
//! allocates a record per decode; the pooled variants reuse one from a
//! resource pool.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

use tether_concurrency::pool::{record, Student};
use tether_concurrency::ResourcePool;

fn bench_decode(c: &mut Criterion) {
    let input = Student::new("Geektutu", 25).encode().unwrap();

    let mut group = c.benchmark_group("record/decode");
    group.throughput(Throughput::Bytes(input.len() as u64));

    group.bench_function("fresh", |b| {
        b.iter(|| black_box(record::decode_fresh(&input).unwrap()));
    });

    let pool = ResourcePool::new(Student::default);
    group.bench_function("pooled", |b| {
        b.iter(|| {
            let mut student = pool.acquire();
            record::decode_into(&mut student, &input).unwrap();
            black_box(&student);
            pool.release(student);
        });
    });

    let shared = Arc::new(ResourcePool::new(Student::default));
    group.bench_function("pooled_handle", |b| {
        b.iter(|| {
            let mut student = shared.checkout();
            record::decode_into(&mut student, &input).unwrap();
            black_box(&*student);
        });
    });

    group.finish();
}

fn bench_pool_overhead(c: &mut Criterion) {
    let pool = ResourcePool::new(|| vec![0u8; 4096]);

    c.bench_function("pool/acquire_release", |b| {
        b.iter(|| {
            let buffer = pool.acquire();
            pool.release(black_box(buffer));
        });
    });

    c.bench_function("pool/allocate", |b| {
        b.iter(|| black_box(vec![0u8; 4096]));
    });
}

criterion_group!(benches, bench_decode, bench_pool_overhead);
criterion_main!(benches);
