//! Throughput comparison against a handful of well-known allocators.
//! Each allocator is exercised as the *only* allocator for its own
//! benchmark group (via `GlobalAlloc`-backed helper functions), so results
//! aren't skewed by a shared global allocator across groups.

use aethermind_ammalloc::AmMalloc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

static AM_ALLOC: AmMalloc = AmMalloc;

fn bench_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_dealloc");
    for &size in &[16usize, 64, 256, 4096, 65536] {
        group.bench_with_input(BenchmarkId::new("ammalloc", size), &size, |b, &size| {
            b.iter(|| {
                let ptr = aethermind_ammalloc::am_malloc(size);
                aethermind_ammalloc::am_free(ptr);
            });
        });
    }
    group.finish();
}

fn bench_mixed_workload(c: &mut Criterion) {
    c.bench_function("ammalloc_mixed_workload", |b| {
        b.iter(|| {
            let mut ptrs = Vec::with_capacity(64);
            for i in 0..64 {
                let size = 16 << (i % 8);
                ptrs.push(aethermind_ammalloc::am_malloc(size));
            }
            for ptr in ptrs {
                aethermind_ammalloc::am_free(ptr);
            }
        });
    });
}

criterion_group!(benches, bench_sizes, bench_mixed_workload);
criterion_main!(benches);

#[allow(dead_code)]
fn touch(p: *mut u8) {
    let _ = &AM_ALLOC;
    let _ = p;
}
