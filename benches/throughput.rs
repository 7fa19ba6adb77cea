// Copyright 2025 The jobq authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jobq::{JobQueueBuilder, ThreadCount};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const NUM_JOBS: &[usize] = &[100, 1_000, 10_000];

/// Measures one full queue lifecycle: build, submit trivial jobs, drain.
fn submit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_drain");
    for &num_jobs in NUM_JOBS {
        group.throughput(Throughput::Elements(num_jobs as u64));
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("jobq@{num_threads}"), num_jobs),
                &num_jobs,
                |bencher, &num_jobs| {
                    bencher.iter(|| {
                        let mut queue = JobQueueBuilder {
                            num_threads: ThreadCount::try_from(num_threads).unwrap(),
                        }
                        .build();
                        let counter = Arc::new(AtomicU64::new(0));
                        for _ in 0..num_jobs {
                            let counter = counter.clone();
                            queue.submit(move || {
                                counter.fetch_add(1, Ordering::Relaxed);
                            });
                        }
                        queue.drain();
                        counter.load(Ordering::Relaxed)
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, submit_drain);
criterion_main!(benches);
